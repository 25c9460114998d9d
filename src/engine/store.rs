use crate::domain::resource::{ResourceType, SNAPSHOT_TYPES};
use serde_json::Value;
use std::collections::HashMap;
use tracing::warn;

/// Failed snapshot fetches are retried this many times per cycle before the
/// type is given up on and substituted with an empty array.
pub const SNAPSHOT_RETRY_LIMIT: u32 = 3;

#[derive(Debug, Default)]
struct TypeSlot {
    resources: Vec<Value>,
    retry_count: u32,
    pending: bool,
    loaded: bool,
    failed: bool,
}

/// Schemaless cache of the bridge's resources, one slot per type. Snapshots
/// replace a slot wholesale; push fragments are deep-merged into it.
#[derive(Debug, Default)]
pub struct ResourceStore {
    slots: HashMap<ResourceType, TypeSlot>,
}

#[derive(PartialEq, Eq, Debug)]
pub enum PatchOutcome {
    Merged,
    /// The fragment referenced a resource the store has not seen; it is kept
    /// as a partial resource until the next snapshot replaces the slot.
    Buffered,
}

impl ResourceStore {
    pub fn new() -> Self {
        ResourceStore::default()
    }

    /// Marks every snapshot type as pending and clears per-cycle bookkeeping.
    /// Existing resources stay readable until their replacement arrives.
    pub fn begin_cycle(&mut self) {
        for rtype in SNAPSHOT_TYPES {
            let slot = self.slots.entry(rtype).or_default();
            slot.pending = true;
            slot.retry_count = 0;
            slot.failed = false;
        }
    }

    pub fn put_snapshot(&mut self, rtype: ResourceType, resources: Vec<Value>) {
        let slot = self.slots.entry(rtype).or_default();
        slot.resources = resources;
        slot.pending = false;
        slot.loaded = true;
        slot.failed = false;
        slot.retry_count = 0;
    }

    /// Records a failed snapshot fetch. Returns the attempt number when
    /// another retry is allowed; `None` once the type is exhausted, at which
    /// point it holds an empty array and the cycle completes degraded.
    pub fn record_failure(&mut self, rtype: ResourceType) -> Option<u32> {
        let slot = self.slots.entry(rtype).or_default();
        slot.retry_count += 1;
        if slot.retry_count <= SNAPSHOT_RETRY_LIMIT {
            return Some(slot.retry_count);
        }

        warn!("⚠️ Giving up on the {} snapshot after {} retries", rtype, SNAPSHOT_RETRY_LIMIT);
        slot.resources.clear();
        slot.pending = false;
        slot.loaded = true;
        slot.failed = true;
        None
    }

    pub fn is_failed(&self, rtype: ResourceType) -> bool {
        self.slots.get(&rtype).map(|slot| slot.failed).unwrap_or(false)
    }

    /// True once no snapshot type is awaiting a fetch result.
    pub fn cycle_complete(&self) -> bool {
        SNAPSHOT_TYPES
            .iter()
            .all(|rtype| self.slots.get(rtype).map(|slot| !slot.pending && slot.loaded).unwrap_or(false))
    }

    pub fn resources(&self, rtype: ResourceType) -> &[Value] {
        self.slots.get(&rtype).map(|slot| slot.resources.as_slice()).unwrap_or(&[])
    }

    pub fn find(&self, rtype: ResourceType, id: &str) -> Option<&Value> {
        self.resources(rtype).iter().find(|resource| resource["id"] == id)
    }

    /// Replaces a resource by id, or inserts it when absent. Used for lazy
    /// single-resource fetches between snapshots.
    pub fn upsert(&mut self, rtype: ResourceType, resource: Value) {
        let slot = self.slots.entry(rtype).or_default();
        let id = resource["id"].clone();
        match slot.resources.iter_mut().find(|existing| existing["id"] == id) {
            Some(existing) => *existing = resource,
            None => slot.resources.push(resource),
        }
    }

    pub fn remove(&mut self, rtype: ResourceType, id: &str) -> bool {
        let Some(slot) = self.slots.get_mut(&rtype) else {
            return false;
        };
        let before = slot.resources.len();
        slot.resources.retain(|resource| resource["id"] != id);
        slot.resources.len() != before
    }

    /// Merges a push fragment into the stored resource it references.
    pub fn patch_from_event(&mut self, rtype: ResourceType, delta: &Value) -> PatchOutcome {
        let slot = self.slots.entry(rtype).or_default();
        let id = &delta["id"];
        match slot.resources.iter_mut().find(|existing| &existing["id"] == id) {
            Some(existing) => {
                deep_merge(existing, delta);
                PatchOutcome::Merged
            }
            None => {
                slot.resources.push(delta.clone());
                PatchOutcome::Buffered
            }
        }
    }
}

/// Objects merge key by key, recursively; arrays and scalars are replaced.
pub fn deep_merge(target: &mut Value, delta: &Value) {
    match (target, delta) {
        (Value::Object(target_map), Value::Object(delta_map)) => {
            for (key, value) in delta_map {
                match target_map.get_mut(key) {
                    Some(existing) => deep_merge(existing, value),
                    None => {
                        target_map.insert(key.clone(), value.clone());
                    }
                }
            }
        }
        (target, delta) => *target = delta.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn deep_merge_merges_nested_objects_and_replaces_scalars() {
        let mut target = json!({ "on": { "on": true }, "dimming": { "brightness": 80.0, "min_dim_level": 2.0 } });
        let delta = json!({ "dimming": { "brightness": 42.5 } });

        deep_merge(&mut target, &delta);

        assert_eq!(target["on"]["on"], true);
        assert_eq!(target["dimming"]["brightness"], 42.5);
        assert_eq!(target["dimming"]["min_dim_level"], 2.0);
    }

    #[test]
    fn deep_merge_replaces_arrays_wholesale() {
        let mut target = json!({ "children": [{ "rid": "a" }, { "rid": "b" }] });
        let delta = json!({ "children": [{ "rid": "c" }] });

        deep_merge(&mut target, &delta);

        assert_eq!(target["children"], json!([{ "rid": "c" }]));
    }

    #[test]
    fn patch_merges_into_an_existing_resource() {
        let mut store = ResourceStore::new();
        store.put_snapshot(ResourceType::Light, vec![json!({ "id": "l1", "on": { "on": false } })]);

        let outcome = store.patch_from_event(ResourceType::Light, &json!({ "id": "l1", "on": { "on": true } }));

        assert_eq!(outcome, PatchOutcome::Merged);
        assert_eq!(store.find(ResourceType::Light, "l1").unwrap()["on"]["on"], true);
    }

    #[test]
    fn patch_buffers_fragments_for_unknown_resources() {
        let mut store = ResourceStore::new();
        store.put_snapshot(ResourceType::Light, vec![]);

        let outcome = store.patch_from_event(ResourceType::Light, &json!({ "id": "l9", "on": { "on": true } }));

        assert_eq!(outcome, PatchOutcome::Buffered);
        assert!(store.find(ResourceType::Light, "l9").is_some());
    }

    #[test]
    fn record_failure_allows_three_retries_then_degrades_the_type() {
        let mut store = ResourceStore::new();
        store.begin_cycle();
        store.patch_from_event(ResourceType::Button, &json!({ "id": "b1" }));

        assert_eq!(store.record_failure(ResourceType::Button), Some(1));
        assert_eq!(store.record_failure(ResourceType::Button), Some(2));
        assert_eq!(store.record_failure(ResourceType::Button), Some(3));
        assert_eq!(store.record_failure(ResourceType::Button), None);

        assert!(store.is_failed(ResourceType::Button));
        assert!(store.resources(ResourceType::Button).is_empty());
    }

    #[test]
    fn cycle_completes_once_every_type_resolved() {
        let mut store = ResourceStore::new();
        store.begin_cycle();
        assert!(!store.cycle_complete());

        for rtype in SNAPSHOT_TYPES {
            store.put_snapshot(rtype, vec![]);
        }
        assert!(store.cycle_complete());
    }

    #[test]
    fn a_new_cycle_clears_the_failed_flag_but_keeps_resources() {
        let mut store = ResourceStore::new();
        store.put_snapshot(ResourceType::Light, vec![json!({ "id": "l1" })]);
        store.begin_cycle();
        for _ in 0..4 {
            store.record_failure(ResourceType::Button);
        }
        assert!(store.is_failed(ResourceType::Button));

        store.begin_cycle();

        assert!(!store.is_failed(ResourceType::Button));
        assert_eq!(store.resources(ResourceType::Light).len(), 1);
    }

    #[test]
    fn remove_drops_the_resource_by_id() {
        let mut store = ResourceStore::new();
        store.put_snapshot(ResourceType::Device, vec![json!({ "id": "d1" }), json!({ "id": "d2" })]);

        assert!(store.remove(ResourceType::Device, "d1"));
        assert!(!store.remove(ResourceType::Device, "d1"));
        assert_eq!(store.resources(ResourceType::Device).len(), 1);
    }
}
