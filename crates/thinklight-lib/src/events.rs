//! Fire-and-forget event delivery.
//!
//! Each [`Subscribers::dispatch`] snapshots the registered handlers and calls
//! them on a freshly spawned thread, so a slow or panicking subscriber never
//! stalls the monitor or keeper loop that produced the event.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;

use crate::error::BacklightError;

/// Handle returned by [`Subscribers::subscribe`], used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(u64);

type Handler<T> = Arc<dyn Fn(&T) + Send + Sync>;

/// Ordered list of event handlers, safe to modify while dispatching.
pub struct Subscribers<T> {
    name: &'static str,
    handlers: Mutex<Vec<(HandlerId, Handler<T>)>>,
    next_id: AtomicU64,
}

impl<T> Subscribers<T>
where
    T: Send + Sync + 'static,
{
    /// `name` labels the delivery threads (e.g. `"changed"`).
    pub fn new(name: &'static str) -> Self {
        Subscribers {
            name,
            handlers: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    fn handlers(&self) -> MutexGuard<'_, Vec<(HandlerId, Handler<T>)>> {
        self.handlers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a handler. Handlers run in registration order.
    pub fn subscribe(&self, handler: impl Fn(&T) + Send + Sync + 'static) -> HandlerId {
        let id = HandlerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.handlers().push((id, Arc::new(handler)));
        id
    }

    /// Register an optional handler. `None` is a no-op.
    pub fn subscribe_opt<F>(&self, handler: Option<F>) -> Option<HandlerId>
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        handler.map(|h| self.subscribe(h))
    }

    /// Remove a handler. Returns `false` if it was not registered.
    pub fn unsubscribe(&self, id: HandlerId) -> bool {
        let mut handlers = self.handlers();
        let before = handlers.len();
        handlers.retain(|(hid, _)| *hid != id);
        handlers.len() != before
    }

    pub fn len(&self) -> usize {
        self.handlers().len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers().is_empty()
    }

    /// Deliver `event` to every handler registered right now.
    ///
    /// Returns `None` without spawning when nobody is subscribed. The
    /// returned handle may be dropped; delivery continues detached.
    pub fn dispatch(&self, event: T) -> Option<JoinHandle<()>> {
        let snapshot: Vec<Handler<T>> = self
            .handlers()
            .iter()
            .map(|(_, h)| Arc::clone(h))
            .collect();
        if snapshot.is_empty() {
            return None;
        }
        let name = self.name;
        let spawned = std::thread::Builder::new()
            .name(format!("thinklight-{name}"))
            .spawn(move || {
                for handler in snapshot {
                    if catch_unwind(AssertUnwindSafe(|| handler(&event))).is_err() {
                        log::warn!("{name} handler panicked");
                    }
                }
            });
        match spawned {
            Ok(handle) => Some(handle),
            Err(e) => {
                log::warn!("could not spawn {name} delivery thread: {e}");
                None
            }
        }
    }
}

impl<T> std::fmt::Debug for Subscribers<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let count = self
            .handlers
            .lock()
            .map(|h| h.len())
            .unwrap_or_default();
        f.debug_struct("Subscribers")
            .field("name", &self.name)
            .field("handlers", &count)
            .finish()
    }
}

/// The two notification streams of a backlight.
#[derive(Debug)]
pub struct BacklightEvents {
    /// New level after the hardware state changed.
    pub changed: Subscribers<u8>,
    /// Runtime error caught inside a background loop or a failed write.
    pub exception: Subscribers<Arc<BacklightError>>,
}

impl Default for BacklightEvents {
    fn default() -> Self {
        BacklightEvents {
            changed: Subscribers::new("changed"),
            exception: Subscribers::new("exception"),
        }
    }
}

impl BacklightEvents {
    pub fn notify_changed(&self, level: u8) -> Option<JoinHandle<()>> {
        self.changed.dispatch(level)
    }

    pub fn notify_exception(&self, error: BacklightError) -> Option<JoinHandle<()>> {
        log::debug!("exception notification: {error}");
        self.exception.dispatch(Arc::new(error))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::time::Duration;

    #[test]
    fn dispatch_without_subscribers_spawns_nothing() {
        let subs: Subscribers<u8> = Subscribers::new("test");
        assert!(subs.dispatch(1).is_none());
    }

    #[test]
    fn dispatch_reaches_every_handler() {
        let subs: Subscribers<u8> = Subscribers::new("test");
        let (tx, rx) = mpsc::channel();
        let tx2 = tx.clone();
        subs.subscribe(move |v| tx.send(("a", *v)).unwrap());
        subs.subscribe(move |v| tx2.send(("b", *v)).unwrap());

        subs.dispatch(7).unwrap().join().unwrap();
        let got: Vec<_> = rx.try_iter().collect();
        assert_eq!(got, vec![("a", 7), ("b", 7)]);
    }

    #[test]
    fn dispatch_runs_off_the_calling_thread() {
        let subs: Subscribers<u8> = Subscribers::new("test");
        let (tx, rx) = mpsc::channel();
        subs.subscribe(move |_| tx.send(std::thread::current().id()).unwrap());

        subs.dispatch(0).unwrap().join().unwrap();
        let handler_thread = rx.recv_timeout(Duration::from_secs(1)).unwrap();
        assert_ne!(handler_thread, std::thread::current().id());
    }

    #[test]
    fn slow_handler_does_not_block_dispatcher() {
        let subs: Subscribers<u8> = Subscribers::new("test");
        let (release_tx, release_rx) = mpsc::channel::<()>();
        let release_rx = Mutex::new(release_rx);
        subs.subscribe(move |_| {
            let _ = release_rx.lock().unwrap().recv();
        });

        // Returns while the handler is still blocked.
        let handle = subs.dispatch(1).unwrap();
        assert!(!handle.is_finished());
        release_tx.send(()).unwrap();
        handle.join().unwrap();
    }

    #[test]
    fn panicking_handler_does_not_stop_others() {
        let subs: Subscribers<u8> = Subscribers::new("test");
        let (tx, rx) = mpsc::channel();
        subs.subscribe(|_| panic!("subscriber bug"));
        subs.subscribe(move |v| tx.send(*v).unwrap());

        subs.dispatch(3).unwrap().join().unwrap();
        assert_eq!(rx.try_recv().unwrap(), 3);
    }

    #[test]
    fn unsubscribe_removes_handler() {
        let subs: Subscribers<u8> = Subscribers::new("test");
        let id = subs.subscribe(|_| {});
        assert_eq!(subs.len(), 1);
        assert!(subs.unsubscribe(id));
        assert!(subs.is_empty());
        assert!(!subs.unsubscribe(id), "second removal is a no-op");
    }

    #[test]
    fn subscribe_none_is_noop() {
        let subs: Subscribers<u8> = Subscribers::new("test");
        let id = subs.subscribe_opt(None::<fn(&u8)>);
        assert!(id.is_none());
        assert!(subs.is_empty());
    }

    #[test]
    fn handler_may_unsubscribe_itself_during_dispatch() {
        let subs: Arc<Subscribers<u8>> = Arc::new(Subscribers::new("test"));
        let weak = Arc::downgrade(&subs);
        let id_cell: Arc<Mutex<Option<HandlerId>>> = Arc::default();
        let id_for_handler = Arc::clone(&id_cell);
        let id = subs.subscribe(move |_| {
            if let (Some(s), Some(id)) = (weak.upgrade(), *id_for_handler.lock().unwrap()) {
                s.unsubscribe(id);
            }
        });
        *id_cell.lock().unwrap() = Some(id);

        subs.dispatch(1).unwrap().join().unwrap();
        assert!(subs.is_empty());
    }

    #[test]
    fn exception_event_carries_error() {
        let events = BacklightEvents::default();
        let (tx, rx) = mpsc::channel();
        events.exception.subscribe(move |e| tx.send(e.to_string()).unwrap());

        events
            .notify_exception(BacklightError::DriverAccess("boom".into()))
            .unwrap()
            .join()
            .unwrap();
        assert!(rx.try_recv().unwrap().contains("boom"));
    }
}
