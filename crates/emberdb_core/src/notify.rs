//! Notification capture and relay.

use emberdb_engine::PublishHook;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;

/// One committed notification, as handed to the polling host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    /// Channel the notification was published on.
    pub channel: String,
    /// Payload; empty string when none was supplied.
    pub payload: String,
    /// Process id of the publishing session.
    pub origin_pid: u32,
}

/// FIFO queue fed by the engine's publish hook and drained by polling.
///
/// The relay hands the engine a hook closure over its queue; the engine
/// invokes it whenever a committed notify surfaces. Arrival order is
/// preserved and each record is consumed exactly once.
#[derive(Debug, Clone, Default)]
pub(crate) struct NotificationRelay {
    queue: Arc<Mutex<VecDeque<Notification>>>,
}

impl NotificationRelay {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Builds the publish hook to install into the engine.
    pub(crate) fn hook(&self) -> PublishHook {
        let queue = Arc::clone(&self.queue);
        Arc::new(move |channel: &str, payload: &str, origin_pid: u32| {
            queue.lock().push_back(Notification {
                channel: channel.to_string(),
                payload: payload.to_string(),
                origin_pid,
            });
        })
    }

    /// Pops the oldest pending record, if any.
    pub(crate) fn poll_next(&self) -> Option<Notification> {
        self.queue.lock().pop_front()
    }

    /// Drains and discards everything still queued.
    pub(crate) fn reset(&self) {
        self.queue.lock().clear();
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.queue.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hook_appends_in_arrival_order() {
        let relay = NotificationRelay::new();
        let hook = relay.hook();
        hook("jobs", "a", 42);
        hook("jobs", "b", 42);
        hook("other", "", 42);

        assert_eq!(relay.len(), 3);
        let first = relay.poll_next().unwrap();
        assert_eq!(first.channel, "jobs");
        assert_eq!(first.payload, "a");
        assert_eq!(first.origin_pid, 42);
        assert_eq!(relay.poll_next().unwrap().payload, "b");
        assert_eq!(relay.poll_next().unwrap().payload, "");
        assert!(relay.poll_next().is_none());
    }

    #[test]
    fn reset_discards_pending_records() {
        let relay = NotificationRelay::new();
        let hook = relay.hook();
        hook("jobs", "a", 1);
        relay.reset();
        assert!(relay.poll_next().is_none());
    }

    #[test]
    fn hook_outlives_relay_clone() {
        let relay = NotificationRelay::new();
        let hook = relay.hook();
        let other = relay.clone();
        hook("jobs", "x", 1);
        assert_eq!(other.poll_next().unwrap().payload, "x");
    }
}
