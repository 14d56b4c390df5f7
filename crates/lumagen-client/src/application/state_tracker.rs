//! StateTracker: owns the device-state snapshot and notifies subscribers.
//!
//! Reports are folded into a working snapshot as they arrive.  Subscribers
//! are not called per report: the read loop calls [`StateTracker::publish`]
//! once per socket read, and a single [`StateDelta`] describes everything
//! that changed since the previous publish.  A burst such as
//! `Z1Warming` + `Z1Active` arriving in one read therefore produces one event.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use lumagen_core::protocol::reports::parse_status_response;
use lumagen_core::{ApplyResult, DeviceState, Report, StateDelta};
use tracing::{debug, info, warn};

/// Callback invoked with every published delta.
///
/// Runs on the connection's read task: keep it short and never block.
pub type StateCallback = Arc<dyn Fn(&StateDelta) + Send + Sync>;

/// Handle returned by [`StateTracker::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

#[derive(Default)]
struct TrackerInner {
    /// Snapshot including changes not yet published.
    current: DeviceState,
    /// Snapshot as of the last publish.
    published: DeviceState,
    subscribers: Vec<(SubscriptionId, StateCallback)>,
}

/// Device-state owner shared by the read loop and the client facade.
#[derive(Default)]
pub struct StateTracker {
    inner: Mutex<TrackerInner>,
    next_id: AtomicU64,
}

impl StateTracker {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, TrackerInner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Folds an unsolicited report into the working snapshot.
    pub fn apply(&self, report: &Report) -> ApplyResult {
        let result = self.lock().current.apply(report);
        match result {
            ApplyResult::Changed => debug!(?report, "state updated"),
            ApplyResult::Unchanged => {}
            ApplyResult::IllegalTransition { from, to } => {
                warn!(%from, %to, "ignoring illegal power transition");
            }
        }
        result
    }

    /// Folds state carried by a query response: the power state or an
    /// input label.
    pub fn apply_response(&self, payload: &str) -> Option<ApplyResult> {
        match parse_status_response(payload)? {
            Ok(report) => Some(self.apply(&report)),
            Err(e) => {
                warn!(response = %payload, error = %e, "unusable status response");
                None
            }
        }
    }

    /// Emits at most one delta covering everything applied since the last
    /// publish.  Callbacks run after the lock is released.
    pub fn publish(&self) -> Option<StateDelta> {
        let (delta, subscribers) = {
            let mut inner = self.lock();
            let changes = inner.current.diff(&inner.published);
            if changes.is_empty() {
                return None;
            }
            inner.published = inner.current.clone();
            let delta = StateDelta {
                changes,
                state: inner.current.clone(),
            };
            let subscribers: Vec<StateCallback> =
                inner.subscribers.iter().map(|(_, cb)| Arc::clone(cb)).collect();
            (delta, subscribers)
        };

        debug!(
            changes = delta.changes.len(),
            subscribers = subscribers.len(),
            "publishing state delta"
        );
        for callback in &subscribers {
            callback(&delta);
        }
        Some(delta)
    }

    /// Forces power to Unknown after the link drops and publishes at once.
    pub fn mark_disconnected(&self) -> Option<StateDelta> {
        if self.lock().current.invalidate_power() {
            info!("power state unknown until the device reports again");
        }
        self.publish()
    }

    /// Latest working snapshot.
    pub fn snapshot(&self) -> DeviceState {
        self.lock().current.clone()
    }

    pub fn subscribe(&self, callback: StateCallback) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.lock().subscribers.push((id, callback));
        id
    }

    /// Removes a subscriber.  Returns `false` if the id was not registered.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut inner = self.lock();
        let before = inner.subscribers.len();
        inner.subscribers.retain(|(sid, _)| *sid != id);
        inner.subscribers.len() != before
    }

    pub fn subscriber_count(&self) -> usize {
        self.lock().subscribers.len()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use lumagen_core::{PowerState, StateChange};

    type Seen = Arc<Mutex<Vec<StateDelta>>>;

    fn recording_subscriber(tracker: &StateTracker) -> (SubscriptionId, Seen) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let id = tracker.subscribe(Arc::new(move |d: &StateDelta| {
            sink.lock().unwrap().push(d.clone());
        }));
        (id, seen)
    }

    #[test]
    fn test_burst_within_one_cycle_publishes_once() {
        // Arrange
        let tracker = StateTracker::new();
        tracker.apply(&Report::Power(PowerState::Standby));
        tracker.publish();
        let (_id, seen) = recording_subscriber(&tracker);

        // Act
        tracker.apply(&Report::Power(PowerState::Warming));
        tracker.apply(&Report::Power(PowerState::Active));
        tracker.publish();

        // Assert
        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].power(), Some(PowerState::Active));
    }

    #[test]
    fn test_each_cycle_publishes_its_own_delta() {
        let tracker = StateTracker::new();
        tracker.apply(&Report::Power(PowerState::Standby));
        tracker.publish();
        let (_id, seen) = recording_subscriber(&tracker);

        tracker.apply(&Report::Power(PowerState::Warming));
        tracker.publish();
        tracker.apply(&Report::Power(PowerState::Active));
        tracker.publish();

        let powers: Vec<_> = seen.lock().unwrap().iter().filter_map(StateDelta::power).collect();
        assert_eq!(powers, vec![PowerState::Warming, PowerState::Active]);
    }

    #[test]
    fn test_publish_without_changes_is_silent() {
        let tracker = StateTracker::new();
        let (_id, seen) = recording_subscriber(&tracker);

        assert!(tracker.publish().is_none());
        tracker.apply(&Report::InputChanged(1));
        tracker.publish();
        tracker.apply(&Report::InputChanged(1));
        assert!(tracker.publish().is_none());

        assert_eq!(seen.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_change_and_revert_within_cycle_publishes_nothing() {
        let tracker = StateTracker::new();
        tracker.apply(&Report::InputChanged(1));
        tracker.publish();

        tracker.apply(&Report::InputChanged(4));
        tracker.apply(&Report::InputChanged(1));

        assert!(tracker.publish().is_none());
    }

    #[test]
    fn test_illegal_transition_is_ignored() {
        // Arrange
        let tracker = StateTracker::new();

        // Act
        let result = tracker.apply(&Report::Power(PowerState::Warming));

        // Assert
        assert!(matches!(result, ApplyResult::IllegalTransition { .. }));
        assert_eq!(tracker.snapshot().power, PowerState::Unknown);
        assert!(tracker.publish().is_none());
    }

    #[test]
    fn test_power_response_updates_state() {
        let tracker = StateTracker::new();

        assert_eq!(tracker.apply_response("!S02,1"), Some(ApplyResult::Changed));
        assert_eq!(tracker.apply_response("!S00,Ok"), None);
        assert_eq!(tracker.apply_response("!S02,x"), None);
        assert_eq!(tracker.snapshot().power, PowerState::Active);
    }

    #[test]
    fn test_label_response_lands_in_the_source_list() {
        // Arrange
        let tracker = StateTracker::new();
        let (_id, seen) = recording_subscriber(&tracker);

        // Act
        tracker.apply_response("!S1A2,Blu-ray");
        tracker.publish();

        // Assert
        assert_eq!(tracker.snapshot().input_for_label("blu-ray"), Some(3));
        let seen = seen.lock().unwrap();
        assert!(matches!(
            seen[0].changes.as_slice(),
            [StateChange::InputLabels(labels)] if labels[2] == "Blu-ray"
        ));
    }

    #[test]
    fn test_mark_disconnected_publishes_unknown_power() {
        let tracker = StateTracker::new();
        tracker.apply(&Report::Power(PowerState::Active));
        tracker.publish();
        let (_id, seen) = recording_subscriber(&tracker);

        let delta = tracker.mark_disconnected().expect("power changed");

        assert_eq!(delta.changes, vec![StateChange::Power(PowerState::Unknown)]);
        assert_eq!(seen.lock().unwrap().len(), 1);
        assert!(tracker.mark_disconnected().is_none());
    }

    #[test]
    fn test_unsubscribe_stops_notifications() {
        let tracker = StateTracker::new();
        let (id, seen) = recording_subscriber(&tracker);

        assert!(tracker.unsubscribe(id));
        assert!(!tracker.unsubscribe(id));
        tracker.apply(&Report::InputChanged(3));
        tracker.publish();

        assert!(seen.lock().unwrap().is_empty());
        assert_eq!(tracker.subscriber_count(), 0);
    }

    #[test]
    fn test_callback_may_read_snapshot_without_deadlock() {
        let tracker = Arc::new(StateTracker::new());
        let observed = Arc::new(Mutex::new(None));
        let (t, o) = (Arc::clone(&tracker), Arc::clone(&observed));
        tracker.subscribe(Arc::new(move |_d: &StateDelta| {
            *o.lock().unwrap() = t.snapshot().active_source_id;
        }));

        tracker.apply(&Report::InputChanged(9));
        tracker.publish();

        assert_eq!(*observed.lock().unwrap(), Some(9));
    }
}
