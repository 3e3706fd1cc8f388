//! Session events and their delivery.
//!
//! Subscribers each get their own channel; the session holds the senders for
//! as long as it lives. A subscriber that drops its receiver is pruned on the
//! next publish.

use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Mutex;

use super::lock;
use super::state::ConnectionState;

/// Exit code reported when the real one could not be obtained.
pub const UNKNOWN_EXIT_CODE: u32 = u32::MAX;

/// Session events
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SessionEvent {
    /// Decoded text read from the pseudo console, in pipe order
    Output(String),
    /// The connection moved to a new state
    StateChanged {
        state: ConnectionState,
        exit_code: Option<u32>,
    },
    /// The child process exited on its own
    Disconnected { exit_code: u32 },
}

#[derive(Debug, Default)]
pub struct EventHub {
    subscribers: Mutex<Vec<Sender<SessionEvent>>>,
}

impl EventHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self) -> Receiver<SessionEvent> {
        let (tx, rx) = mpsc::channel();
        lock(&self.subscribers).push(tx);
        rx
    }

    pub fn publish(&self, event: SessionEvent) {
        let mut subscribers = lock(&self.subscribers);
        subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }

    pub fn subscriber_count(&self) -> usize {
        lock(&self.subscribers).len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_subscriber_sees_events_in_order() {
        let hub = EventHub::new();
        let first = hub.subscribe();
        let second = hub.subscribe();

        hub.publish(SessionEvent::Output("a".into()));
        hub.publish(SessionEvent::Disconnected { exit_code: 7 });

        for rx in [first, second] {
            assert_eq!(rx.try_recv().unwrap(), SessionEvent::Output("a".into()));
            assert_eq!(rx.try_recv().unwrap(), SessionEvent::Disconnected { exit_code: 7 });
            assert!(rx.try_recv().is_err());
        }
    }

    #[test]
    fn test_dropped_subscriber_is_pruned() {
        let hub = EventHub::new();
        let kept = hub.subscribe();
        drop(hub.subscribe());

        hub.publish(SessionEvent::Output("x".into()));

        assert_eq!(hub.subscriber_count(), 1);
        assert!(kept.try_recv().is_ok());
    }
}
