use std::collections::{HashSet, VecDeque};

/// Queue of device ids whose metadata needs a lazy fetch. At most `limit`
/// fetches run concurrently; ids that failed once are skipped until the next
/// snapshot cycle so a flapping device cannot starve the queue.
#[derive(Debug)]
pub struct FetchQueue {
    queued: VecDeque<String>,
    queued_set: HashSet<String>,
    in_flight: HashSet<String>,
    failed: HashSet<String>,
    limit: usize,
}

impl FetchQueue {
    pub fn new(limit: usize) -> Self {
        FetchQueue {
            queued: VecDeque::new(),
            queued_set: HashSet::new(),
            in_flight: HashSet::new(),
            failed: HashSet::new(),
            limit,
        }
    }

    /// Returns true if the id was actually added. Duplicates, in-flight ids
    /// and ids that already failed this cycle are ignored.
    pub fn enqueue(&mut self, device_id: &str) -> bool {
        if self.queued_set.contains(device_id) || self.in_flight.contains(device_id) || self.failed.contains(device_id) {
            return false;
        }
        self.queued.push_back(device_id.to_string());
        self.queued_set.insert(device_id.to_string());
        true
    }

    /// Takes the next id to fetch, respecting the concurrency limit.
    pub fn start_next(&mut self) -> Option<String> {
        if self.in_flight.len() >= self.limit {
            return None;
        }
        let device_id = self.queued.pop_front()?;
        self.queued_set.remove(&device_id);
        self.in_flight.insert(device_id.clone());
        Some(device_id)
    }

    pub fn complete(&mut self, device_id: &str, ok: bool) {
        self.in_flight.remove(device_id);
        if !ok {
            self.failed.insert(device_id.to_string());
        }
    }

    pub fn has_queued(&self) -> bool {
        !self.queued.is_empty()
    }

    pub fn is_idle(&self) -> bool {
        self.queued.is_empty() && self.in_flight.is_empty()
    }

    pub fn has_failed(&self, device_id: &str) -> bool {
        self.failed.contains(device_id)
    }

    /// Forgets per-cycle failures so the next snapshot cycle can try again.
    pub fn begin_cycle(&mut self) {
        self.failed.clear();
    }
}
