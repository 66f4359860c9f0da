//! Per-entity ordering of local applies
//!
//! Every entity key (a thread or a message) remembers the completion signal
//! of the last task that claimed it. A new task waits on the signals of all
//! its keys, so conflicting tasks apply one after another in claim order
//! while tasks with disjoint keys run side by side.

use std::collections::{BTreeSet, HashMap};

use tokio::sync::watch;

#[derive(Default)]
pub(crate) struct ConflictChains {
    tails: HashMap<String, watch::Receiver<bool>>,
}

impl ConflictChains {
    /// Claim `keys` for a new task
    ///
    /// Returns what the task must wait for and the slot it holds while
    /// applying. Callers must claim in enqueue order.
    pub(crate) fn claim(&mut self, keys: &BTreeSet<String>) -> (Predecessors, ApplySlot) {
        // Finished tails block nobody
        self.tails.retain(|_, done| !*done.borrow());

        let (tx, rx) = watch::channel(false);
        let mut waiting_on = Vec::new();
        for key in keys {
            if let Some(previous) = self.tails.insert(key.clone(), rx.clone()) {
                waiting_on.push(previous);
            }
        }

        (Predecessors(waiting_on), ApplySlot { done: tx })
    }

    #[cfg(test)]
    fn tracked_keys(&self) -> usize {
        self.tails.len()
    }
}

/// Completion signals of the tasks ahead on the same entities
pub(crate) struct Predecessors(Vec<watch::Receiver<bool>>);

impl Predecessors {
    pub(crate) fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Resolves once every predecessor released its slot
    pub(crate) async fn wait(self) {
        for mut done in self.0 {
            // A dropped sender has already published `true`
            let _ = done.wait_for(|finished| *finished).await;
        }
    }
}

/// Held by a task for the duration of its local apply
///
/// Dropping the slot releases the tasks queued behind it, including when
/// the apply panicked.
pub(crate) struct ApplySlot {
    done: watch::Sender<bool>,
}

impl Drop for ApplySlot {
    fn drop(&mut self) {
        self.done.send_replace(true);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::{assert_pending, assert_ready, task};

    fn keys(items: &[&str]) -> BTreeSet<String> {
        items.iter().map(|k| k.to_string()).collect()
    }

    #[test]
    fn test_disjoint_claims_do_not_wait() {
        let mut chains = ConflictChains::default();
        let (first, _slot_a) = chains.claim(&keys(&["message:m1"]));
        let (second, _slot_b) = chains.claim(&keys(&["message:m2"]));

        assert!(first.is_empty());
        assert!(second.is_empty());
    }

    #[test]
    fn test_overlapping_claim_waits_for_release() {
        let mut chains = ConflictChains::default();
        let (_, slot_a) = chains.claim(&keys(&["message:m1", "thread:t1"]));
        let (behind, _slot_b) = chains.claim(&keys(&["thread:t1"]));
        assert!(!behind.is_empty());

        let mut waiting = task::spawn(behind.wait());
        assert_pending!(waiting.poll());

        drop(slot_a);
        assert!(waiting.is_woken());
        assert_ready!(waiting.poll());
    }

    #[test]
    fn test_chain_is_transitive() {
        let mut chains = ConflictChains::default();
        let (_, slot_a) = chains.claim(&keys(&["message:m1"]));
        let (_, slot_b) = chains.claim(&keys(&["message:m1"]));
        let (third, _slot_c) = chains.claim(&keys(&["message:m1"]));

        let mut waiting = task::spawn(third.wait());
        drop(slot_a);
        assert_pending!(waiting.poll());

        drop(slot_b);
        assert_ready!(waiting.poll());
    }

    #[test]
    fn test_finished_tails_are_pruned() {
        let mut chains = ConflictChains::default();
        let (_, slot) = chains.claim(&keys(&["message:m1", "message:m2"]));
        drop(slot);

        let (predecessors, _slot) = chains.claim(&keys(&["message:m3"]));
        assert!(predecessors.is_empty());
        assert_eq!(chains.tracked_keys(), 1);
    }
}
