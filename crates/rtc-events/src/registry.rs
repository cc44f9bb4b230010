use slab::Slab;

/// Handle returned by `Connection::on`.
///
/// Carries the arena slot plus a generation, so an id kept past its removal
/// can never remove a later listener that reused the slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId {
    key: usize,
    generation: u64,
}

type Disposer = Box<dyn FnOnce() + Send>;

pub(crate) struct Registration {
    pub(crate) channel: String,
    pub(crate) event: String,
    generation: u64,
    disposer: Disposer,
}

impl Registration {
    /// Detaches the low-level message listener.
    pub(crate) fn dispose(self) {
        (self.disposer)();
    }
}

#[derive(Default)]
pub(crate) struct ListenerRegistry {
    entries: Slab<Registration>,
    next_generation: u64,
}

impl ListenerRegistry {
    pub(crate) fn insert(
        &mut self,
        channel: &str,
        event: &str,
        disposer: impl FnOnce() + Send + 'static,
    ) -> ListenerId {
        let generation = self.next_generation;
        self.next_generation += 1;
        let key = self.entries.insert(Registration {
            channel: channel.to_string(),
            event: event.to_string(),
            generation,
            disposer: Box::new(disposer),
        });
        ListenerId { key, generation }
    }

    /// Removes one entry; the caller disposes it after releasing its lock.
    pub(crate) fn remove(&mut self, id: ListenerId) -> Option<Registration> {
        match self.entries.get(id.key) {
            Some(entry) if entry.generation == id.generation => Some(self.entries.remove(id.key)),
            _ => None,
        }
    }

    pub(crate) fn remove_where(
        &mut self,
        mut predicate: impl FnMut(&Registration) -> bool,
    ) -> Vec<Registration> {
        let keys: Vec<usize> = self
            .entries
            .iter()
            .filter(|(_, entry)| predicate(entry))
            .map(|(key, _)| key)
            .collect();
        keys.into_iter().map(|key| self.entries.remove(key)).collect()
    }

    pub(crate) fn drain(&mut self) -> Vec<Registration> {
        self.entries.drain().collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn count_on(&self, channel: &str) -> usize {
        self.entries
            .iter()
            .filter(|(_, entry)| entry.channel == channel)
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting(counter: &Arc<AtomicUsize>) -> impl FnOnce() + Send + 'static {
        let counter = counter.clone();
        move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn remove_disposes_exactly_one() {
        let disposed = Arc::new(AtomicUsize::new(0));
        let mut registry = ListenerRegistry::default();
        let first = registry.insert("control", "chat", counting(&disposed));
        let _second = registry.insert("control", "chat", counting(&disposed));

        registry.remove(first).unwrap().dispose();
        assert_eq!(disposed.load(Ordering::SeqCst), 1);
        assert_eq!(registry.len(), 1);
        assert!(registry.remove(first).is_none());
    }

    #[test]
    fn stale_id_does_not_hit_reused_slot() {
        let mut registry = ListenerRegistry::default();
        let stale = registry.insert("control", "chat", || {});
        registry.remove(stale).unwrap().dispose();
        let fresh = registry.insert("control", "chat", || {});
        assert!(registry.remove(stale).is_none());
        assert_eq!(registry.len(), 1);
        assert!(registry.remove(fresh).is_some());
    }

    #[test]
    fn remove_where_filters_by_channel_and_event() {
        let mut registry = ListenerRegistry::default();
        registry.insert("control", "chat", || {});
        registry.insert("control", "move", || {});
        registry.insert("data", "chat", || {});

        let removed = registry.remove_where(|r| r.channel == "control" && r.event == "chat");
        assert_eq!(removed.len(), 1);
        assert_eq!(registry.count_on("control"), 1);
        assert_eq!(registry.count_on("data"), 1);

        let drained = registry.drain();
        assert_eq!(drained.len(), 2);
        assert_eq!(registry.len(), 0);
    }
}
