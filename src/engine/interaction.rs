use crate::domain::channel::ButtonEvent;
use crate::domain::resource::ChannelKey;
use std::collections::HashMap;

/// Tracks short releases per button channel and aggregates rapid sequences
/// into double/triple/... presses. The tracker itself is timer-free: the
/// reactor arms a window timer with the returned token and reports back via
/// `on_window_elapsed`, so stale timers are rejected by token comparison.
#[derive(Debug)]
pub struct MultiPressTracker {
    reset_gap_ms: i64,
    states: HashMap<ChannelKey, PressState>,
}

#[derive(Debug, Default)]
struct PressState {
    count: u32,
    token: u64,
    last_release_ms: i64,
}

impl MultiPressTracker {
    pub fn new(reset_gap_ms: i64) -> Self {
        MultiPressTracker {
            reset_gap_ms,
            states: HashMap::new(),
        }
    }

    /// An initial press that arrives well after the previous release flushes
    /// the pending sequence early. Returns the aggregate to emit, if any.
    pub fn on_initial_press(&mut self, key: &ChannelKey, now_ms: i64) -> Option<ButtonEvent> {
        let state = self.states.get_mut(key)?;
        if state.count == 0 || now_ms - state.last_release_ms < self.reset_gap_ms {
            return None;
        }

        let count = state.count;
        state.count = 0;
        state.token += 1; // invalidates the armed window timer
        ButtonEvent::aggregate(count)
    }

    /// Counts a short release and re-arms the aggregation window. The caller
    /// schedules a timer carrying the returned token.
    pub fn on_short_release(&mut self, key: &ChannelKey, now_ms: i64) -> u64 {
        let state = self.states.entry(key.clone()).or_default();
        state.count += 1;
        state.last_release_ms = now_ms;
        state.token += 1;
        state.token
    }

    /// Window expiry. Emits the aggregate for two or more releases; a single
    /// release needs nothing extra since it was already emitted live.
    pub fn on_window_elapsed(&mut self, key: &ChannelKey, token: u64) -> Option<ButtonEvent> {
        let state = self.states.get_mut(key)?;
        if state.token != token {
            return None;
        }

        let count = state.count;
        state.count = 0;
        ButtonEvent::aggregate(count)
    }
}

/// Token bookkeeping for dial reset timers: after each rotation delta the
/// reactor re-emits zero once the channel has been quiet briefly.
#[derive(Debug, Default)]
pub struct DialResetTracker {
    tokens: HashMap<ChannelKey, u64>,
}

impl DialResetTracker {
    pub fn new() -> Self {
        DialResetTracker::default()
    }

    pub fn arm(&mut self, key: &ChannelKey) -> u64 {
        let token = self.tokens.entry(key.clone()).or_insert(0);
        *token += 1;
        *token
    }

    /// True when the timer that fired is still the latest one armed.
    pub fn fires(&self, key: &ChannelKey, token: u64) -> bool {
        self.tokens.get(key) == Some(&token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn key() -> ChannelKey {
        ChannelKey::new("d1", "button1")
    }

    #[test]
    fn three_rapid_releases_aggregate_into_one_triple_press() {
        let mut tracker = MultiPressTracker::new(500);

        let t1 = tracker.on_short_release(&key(), 0);
        let t2 = tracker.on_short_release(&key(), 300);
        let t3 = tracker.on_short_release(&key(), 600);

        // The first two window timers were superseded
        assert_eq!(tracker.on_window_elapsed(&key(), t1), None);
        assert_eq!(tracker.on_window_elapsed(&key(), t2), None);
        assert_eq!(tracker.on_window_elapsed(&key(), t3), Some(ButtonEvent::TriplePress));
    }

    #[test]
    fn a_lone_release_emits_no_aggregate() {
        let mut tracker = MultiPressTracker::new(500);

        let token = tracker.on_short_release(&key(), 0);

        assert_eq!(tracker.on_window_elapsed(&key(), token), None);
    }

    #[test]
    fn the_window_only_fires_once() {
        let mut tracker = MultiPressTracker::new(500);
        tracker.on_short_release(&key(), 0);
        let token = tracker.on_short_release(&key(), 100);

        assert_eq!(tracker.on_window_elapsed(&key(), token), Some(ButtonEvent::DoublePress));
        assert_eq!(tracker.on_window_elapsed(&key(), token), None);
    }

    #[test]
    fn a_late_initial_press_flushes_the_pending_sequence() {
        let mut tracker = MultiPressTracker::new(500);
        tracker.on_short_release(&key(), 0);
        let token = tracker.on_short_release(&key(), 200);

        let flushed = tracker.on_initial_press(&key(), 800);

        assert_eq!(flushed, Some(ButtonEvent::DoublePress));
        // The armed window timer was invalidated by the flush
        assert_eq!(tracker.on_window_elapsed(&key(), token), None);
    }

    #[test]
    fn a_quick_initial_press_keeps_the_sequence_running() {
        let mut tracker = MultiPressTracker::new(500);
        tracker.on_short_release(&key(), 0);

        assert_eq!(tracker.on_initial_press(&key(), 200), None);

        let token = tracker.on_short_release(&key(), 300);
        assert_eq!(tracker.on_window_elapsed(&key(), token), Some(ButtonEvent::DoublePress));
    }

    #[test]
    fn separate_channels_track_independently() {
        let mut tracker = MultiPressTracker::new(500);
        let other = ChannelKey::new("d1", "button2");

        tracker.on_short_release(&key(), 0);
        let token_a = tracker.on_short_release(&key(), 100);
        let token_b = tracker.on_short_release(&other, 100);

        assert_eq!(tracker.on_window_elapsed(&key(), token_a), Some(ButtonEvent::DoublePress));
        assert_eq!(tracker.on_window_elapsed(&other, token_b), None);
    }

    #[test]
    fn dial_reset_tokens_supersede_each_other() {
        let mut dial = DialResetTracker::new();
        let key = ChannelKey::new("d1", "dial");

        let first = dial.arm(&key);
        let second = dial.arm(&key);

        assert!(!dial.fires(&key, first));
        assert!(dial.fires(&key, second));
    }
}
