use std::collections::HashMap;

use parking_lot::Mutex;

/// Tracks which configured channels have opened and reports, exactly once,
/// the moment the last one does.
pub(crate) struct ReadinessBarrier {
    inner: Mutex<BarrierState>,
}

struct BarrierState {
    opened: HashMap<String, bool>,
    fired: bool,
}

impl ReadinessBarrier {
    pub(crate) fn new<I, S>(labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let opened = labels.into_iter().map(|label| (label.into(), false)).collect();
        Self {
            inner: Mutex::new(BarrierState {
                opened,
                fired: false,
            }),
        }
    }

    /// Records an open notification. Returns `true` only for the call that
    /// completed the set; unknown labels are ignored.
    pub(crate) fn mark_open(&self, label: &str) -> bool {
        let mut state = self.inner.lock();
        match state.opened.get_mut(label) {
            Some(flag) => *flag = true,
            None => return false,
        }
        if state.fired || state.opened.is_empty() || !state.opened.values().all(|open| *open) {
            return false;
        }
        state.fired = true;
        true
    }

    #[cfg(test)]
    fn is_ready(&self) -> bool {
        self.inner.lock().fired
    }

    /// Configured labels that have not opened yet, sorted.
    pub(crate) fn pending(&self) -> Vec<String> {
        let state = self.inner.lock();
        let mut pending: Vec<String> = state
            .opened
            .iter()
            .filter(|(_, open)| !**open)
            .map(|(label, _)| label.clone())
            .collect();
        pending.sort();
        pending
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fires_after_last_channel_in_any_order() {
        let barrier = ReadinessBarrier::new(["control", "data", "bulk"]);
        assert!(!barrier.mark_open("data"));
        assert!(!barrier.mark_open("bulk"));
        assert_eq!(barrier.pending(), vec!["control".to_string()]);
        assert!(!barrier.is_ready());
        assert!(barrier.mark_open("control"));
        assert!(barrier.is_ready());
    }

    #[test]
    fn never_refires() {
        let barrier = ReadinessBarrier::new(["control"]);
        assert!(barrier.mark_open("control"));
        assert!(!barrier.mark_open("control"));
        assert!(barrier.is_ready());
    }

    #[test]
    fn repeated_opens_count_once() {
        let barrier = ReadinessBarrier::new(["control", "data"]);
        assert!(!barrier.mark_open("control"));
        assert!(!barrier.mark_open("control"));
        assert!(!barrier.is_ready());
        assert!(barrier.mark_open("data"));
    }

    #[test]
    fn ignores_unknown_labels() {
        let barrier = ReadinessBarrier::new(["control"]);
        assert!(!barrier.mark_open("stray"));
        assert_eq!(barrier.pending(), vec!["control".to_string()]);
    }

    #[test]
    fn empty_barrier_never_fires() {
        let barrier = ReadinessBarrier::new(Vec::<String>::new());
        assert!(!barrier.mark_open("control"));
        assert!(!barrier.is_ready());
    }
}
