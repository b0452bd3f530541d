//! Network connectivity monitor.
//!
//! Single source of truth for "are we online". The runtime feeds
//! reachability events in through [`ConnectivityMonitor::set_reachable`];
//! subscribers hear about each real transition exactly once.

use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::watch;
use tracing::{info, warn};

/// Reachability state.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Connectivity {
    /// The remote can be reached.
    Online,
    /// The remote cannot be reached.
    Offline,
}

impl Connectivity {
    /// Map a reachability flag to a state.
    #[must_use]
    pub const fn from_reachable(reachable: bool) -> Self {
        if reachable {
            Self::Online
        } else {
            Self::Offline
        }
    }

    /// Whether this is the offline state.
    #[must_use]
    pub const fn is_offline(self) -> bool {
        matches!(self, Self::Offline)
    }
}

impl std::fmt::Display for Connectivity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Online => f.write_str("online"),
            Self::Offline => f.write_str("offline"),
        }
    }
}

type Callback = Box<dyn Fn(Connectivity) + Send + Sync>;

struct Listener {
    active: AtomicBool,
    callback: Callback,
}

struct Shared {
    state: Mutex<State>,
    tx: watch::Sender<Connectivity>,
    next_id: AtomicU64,
}

struct State {
    current: Connectivity,
    listeners: BTreeMap<u64, Arc<Listener>>,
    // Transitions not yet delivered, oldest first
    outbox: VecDeque<(Connectivity, Vec<Arc<Listener>>)>,
    delivering: bool,
}

/// Subscribable online/offline state.
#[derive(Clone)]
pub struct ConnectivityMonitor {
    shared: Arc<Shared>,
}

impl ConnectivityMonitor {
    /// Create a monitor seeded with the runtime's current reachability.
    #[must_use]
    pub fn new(reachable: bool) -> Self {
        let initial = Connectivity::from_reachable(reachable);
        let (tx, _) = watch::channel(initial);

        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(State {
                    current: initial,
                    listeners: BTreeMap::new(),
                    outbox: VecDeque::new(),
                    delivering: false,
                }),
                tx,
                next_id: AtomicU64::new(1),
            }),
        }
    }

    /// `true` while offline.
    #[must_use]
    pub fn current(&self) -> bool {
        self.connectivity().is_offline()
    }

    /// Current state.
    #[must_use]
    pub fn connectivity(&self) -> Connectivity {
        self.shared.state.lock().current
    }

    /// Check if online.
    #[must_use]
    pub fn is_online(&self) -> bool {
        !self.current()
    }

    /// Receiver that observes every state change, for async consumers.
    #[must_use]
    pub fn watch(&self) -> watch::Receiver<Connectivity> {
        self.shared.tx.subscribe()
    }

    /// Register a callback for transitions.
    ///
    /// The callback runs once per online/offline transition with the new
    /// state. It is never called for the state current at subscription
    /// time. Dropping the handle keeps the subscription alive; call
    /// [`Subscription::unsubscribe`] to stop it.
    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(Connectivity) + Send + Sync + 'static,
    {
        let id = self.shared.next_id.fetch_add(1, Ordering::Relaxed);
        let listener = Arc::new(Listener {
            active: AtomicBool::new(true),
            callback: Box::new(callback),
        });

        self.shared
            .state
            .lock()
            .listeners
            .insert(id, Arc::clone(&listener));

        Subscription {
            id,
            listener,
            shared: Arc::downgrade(&self.shared),
        }
    }

    /// Feed a runtime reachability event.
    ///
    /// Returns whether the state changed. Repeating the current state is
    /// swallowed.
    ///
    /// Transitions are delivered in the order they happened. A transition
    /// signalled from inside a callback, or from another thread while one
    /// is being delivered, is queued and delivered by the caller already
    /// delivering once the current transition has reached every listener.
    pub fn set_reachable(&self, reachable: bool) -> bool {
        let next = Connectivity::from_reachable(reachable);

        {
            let mut state = self.shared.state.lock();
            if state.current == next {
                return false;
            }
            state.current = next;
            self.shared.tx.send_replace(next);
            match next {
                Connectivity::Online => info!("Network: online"),
                Connectivity::Offline => warn!("Network: offline"),
            }
            let listeners = state.listeners.values().cloned().collect();
            state.outbox.push_back((next, listeners));
            if state.delivering {
                return true;
            }
            state.delivering = true;
        }

        self.drain();
        true
    }

    /// Deliver queued transitions until none are left.
    fn drain(&self) {
        loop {
            let (state, listeners) = {
                let mut shared = self.shared.state.lock();
                match shared.outbox.pop_front() {
                    Some(entry) => entry,
                    None => {
                        shared.delivering = false;
                        return;
                    },
                }
            };

            // Callbacks run outside the state lock so they may call back in
            for listener in listeners {
                if listener.active.load(Ordering::SeqCst) {
                    (listener.callback)(state);
                }
            }
        }
    }

    /// Number of live subscriptions.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.shared.state.lock().listeners.len()
    }
}

impl std::fmt::Debug for ConnectivityMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectivityMonitor")
            .field("connectivity", &self.connectivity())
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

/// Handle for a transition callback.
pub struct Subscription {
    id: u64,
    listener: Arc<Listener>,
    shared: Weak<Shared>,
}

impl Subscription {
    /// Stop further callbacks. Safe to call more than once.
    pub fn unsubscribe(&self) {
        if !self.listener.active.swap(false, Ordering::SeqCst) {
            return;
        }
        if let Some(shared) = self.shared.upgrade() {
            shared.state.lock().listeners.remove(&self.id);
        }
    }

    /// Whether callbacks are still delivered.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.listener.active.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn recorder() -> (Arc<Mutex<Vec<Connectivity>>>, impl Fn(Connectivity) + Send + Sync) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        (seen, move |c| sink.lock().push(c))
    }

    #[test]
    fn test_initial_state() {
        assert!(ConnectivityMonitor::new(false).current());
        assert!(!ConnectivityMonitor::new(true).current());
        assert!(ConnectivityMonitor::new(true).is_online());
    }

    #[test]
    fn test_one_callback_per_transition() {
        let monitor = ConnectivityMonitor::new(true);
        let (seen, callback) = recorder();
        let _sub = monitor.subscribe(callback);

        assert!(!monitor.set_reachable(true));
        assert!(monitor.set_reachable(false));
        assert!(!monitor.set_reachable(false));
        assert!(!monitor.set_reachable(false));
        assert!(monitor.set_reachable(true));

        assert_eq!(
            *seen.lock(),
            vec![Connectivity::Offline, Connectivity::Online]
        );
    }

    #[test]
    fn test_unsubscribe_is_idempotent() {
        let monitor = ConnectivityMonitor::new(true);
        let (seen, callback) = recorder();
        let sub = monitor.subscribe(callback);

        monitor.set_reachable(false);
        sub.unsubscribe();
        sub.unsubscribe();
        monitor.set_reachable(true);

        assert_eq!(*seen.lock(), vec![Connectivity::Offline]);
        assert!(!sub.is_active());
        assert_eq!(monitor.subscriber_count(), 0);
    }

    #[test]
    fn test_dropped_handle_keeps_subscription() {
        let monitor = ConnectivityMonitor::new(true);
        let (seen, callback) = recorder();
        drop(monitor.subscribe(callback));

        monitor.set_reachable(false);

        assert_eq!(seen.lock().len(), 1);
    }

    #[test]
    fn test_unsubscribe_after_monitor_dropped() {
        let monitor = ConnectivityMonitor::new(true);
        let sub = monitor.subscribe(|_| {});
        drop(monitor);

        sub.unsubscribe();
        assert!(!sub.is_active());
    }

    #[test]
    fn test_callback_may_reenter_monitor() {
        let monitor = ConnectivityMonitor::new(true);
        let observed = Arc::new(AtomicUsize::new(0));

        let inner = monitor.clone();
        let counter = Arc::clone(&observed);
        let _sub = monitor.subscribe(move |state| {
            // Reading state and re-signalling from inside a callback is fine
            assert_eq!(inner.connectivity(), state);
            inner.set_reachable(state == Connectivity::Online);
            counter.fetch_add(1, Ordering::SeqCst);
        });

        monitor.set_reachable(false);
        assert_eq!(observed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_nested_transition_reaches_later_listeners_last() {
        let monitor = ConnectivityMonitor::new(true);

        let inner = monitor.clone();
        let _reconnect = monitor.subscribe(move |state| {
            if state == Connectivity::Offline {
                inner.set_reachable(true);
            }
        });
        let (seen, callback) = recorder();
        let _banner = monitor.subscribe(callback);

        monitor.set_reachable(false);

        assert_eq!(monitor.connectivity(), Connectivity::Online);
        assert_eq!(
            *seen.lock(),
            vec![Connectivity::Offline, Connectivity::Online]
        );
    }

    #[test]
    fn test_concurrent_signals_deliver_final_state_last() {
        let monitor = ConnectivityMonitor::new(true);
        let (seen, callback) = recorder();
        let _sub = monitor.subscribe(callback);

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let monitor = monitor.clone();
                std::thread::spawn(move || {
                    for _ in 0..50 {
                        monitor.set_reachable(i % 2 == 0);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let seen = seen.lock();
        assert!(seen.windows(2).all(|pair| pair[0] != pair[1]));
        assert_eq!(
            seen.last().copied().unwrap_or(Connectivity::Online),
            monitor.connectivity()
        );
    }

    #[tokio::test]
    async fn test_watch_sees_transitions() {
        let monitor = ConnectivityMonitor::new(false);
        let mut rx = monitor.watch();
        assert_eq!(*rx.borrow(), Connectivity::Offline);

        monitor.set_reachable(true);
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow_and_update(), Connectivity::Online);
    }
}
