use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DisconnectHandlerId(u64);

type Handler = Arc<dyn Fn() + Send + Sync>;

/// Ordered list of zero-argument disconnect callbacks.
#[derive(Default)]
pub(crate) struct DisconnectHandlers {
    entries: Mutex<Vec<(u64, Handler)>>,
    next_id: AtomicU64,
}

impl DisconnectHandlers {
    pub(crate) fn add(&self, handler: impl Fn() + Send + Sync + 'static) -> DisconnectHandlerId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.entries.lock().push((id, Arc::new(handler)));
        DisconnectHandlerId(id)
    }

    pub(crate) fn remove(&self, id: DisconnectHandlerId) -> bool {
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|(entry, _)| *entry != id.0);
        entries.len() != before
    }

    pub(crate) fn clear(&self) {
        self.entries.lock().clear();
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.lock().len()
    }

    fn contains(&self, id: u64) -> bool {
        self.entries.lock().iter().any(|(entry, _)| *entry == id)
    }

    /// Runs every handler in registration order and returns how many ran.
    ///
    /// Works on a snapshot taken up front: handlers added during the pass wait
    /// for the next one, handlers removed before their turn are skipped.
    pub(crate) fn fire(&self) -> usize {
        let snapshot: Vec<(u64, Handler)> = self.entries.lock().clone();
        let mut invoked = 0;
        for (id, handler) in snapshot {
            if !self.contains(id) {
                continue;
            }
            handler();
            invoked += 1;
        }
        invoked
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Weak;

    #[test]
    fn fires_in_registration_order() {
        let handlers = DisconnectHandlers::default();
        let log = Arc::new(Mutex::new(Vec::new()));
        for name in ["a", "b", "c"] {
            let log = log.clone();
            handlers.add(move || log.lock().push(name));
        }
        assert_eq!(handlers.fire(), 3);
        assert_eq!(handlers.fire(), 3);
        assert_eq!(*log.lock(), vec!["a", "b", "c", "a", "b", "c"]);
    }

    #[test]
    fn self_removal_neither_skips_nor_repeats() {
        let handlers = Arc::new(DisconnectHandlers::default());
        let log = Arc::new(Mutex::new(Vec::new()));

        let first = {
            let log = log.clone();
            handlers.add(move || log.lock().push("first"))
        };
        let slot: Arc<Mutex<Option<DisconnectHandlerId>>> = Arc::new(Mutex::new(None));
        let once = {
            let log = log.clone();
            let slot = slot.clone();
            let weak: Weak<DisconnectHandlers> = Arc::downgrade(&handlers);
            handlers.add(move || {
                log.lock().push("once");
                if let (Some(handlers), Some(id)) = (weak.upgrade(), *slot.lock()) {
                    handlers.remove(id);
                }
            })
        };
        *slot.lock() = Some(once);
        {
            let log = log.clone();
            handlers.add(move || log.lock().push("last"));
        }

        assert_eq!(handlers.fire(), 3);
        assert_eq!(handlers.fire(), 2);
        assert_eq!(
            *log.lock(),
            vec!["first", "once", "last", "first", "last"]
        );
        assert!(handlers.remove(first));
        assert_eq!(handlers.len(), 1);
    }

    #[test]
    fn removal_by_earlier_handler_skips_later_one() {
        let handlers = Arc::new(DisconnectHandlers::default());
        let log = Arc::new(Mutex::new(Vec::new()));
        let victim_slot: Arc<Mutex<Option<DisconnectHandlerId>>> = Arc::new(Mutex::new(None));
        {
            let weak = Arc::downgrade(&handlers);
            let victim_slot = victim_slot.clone();
            handlers.add(move || {
                if let (Some(handlers), Some(id)) = (weak.upgrade(), *victim_slot.lock()) {
                    handlers.remove(id);
                }
            });
        }
        let victim = {
            let log = log.clone();
            handlers.add(move || log.lock().push("victim"))
        };
        *victim_slot.lock() = Some(victim);

        assert_eq!(handlers.fire(), 1);
        assert!(log.lock().is_empty());
    }

    #[test]
    fn handlers_added_during_pass_wait_for_next_trigger() {
        let handlers = Arc::new(DisconnectHandlers::default());
        let log = Arc::new(Mutex::new(Vec::new()));
        {
            let weak = Arc::downgrade(&handlers);
            let log = log.clone();
            handlers.add(move || {
                if let Some(handlers) = weak.upgrade() {
                    let log = log.clone();
                    handlers.add(move || log.lock().push("late"));
                }
            });
        }
        assert_eq!(handlers.fire(), 1);
        assert!(log.lock().is_empty());
        handlers.clear();
        assert_eq!(handlers.fire(), 0);
    }
}
