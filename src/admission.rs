//! Single-active-job admission control.
//!
//! [`AdmissionQueue`] holds the only admission state in the system: the slot
//! of the job currently running and the FIFO of jobs waiting behind it. It
//! knows nothing about job contents; the registry mirrors the positions it
//! reports onto the jobs themselves.

use std::collections::VecDeque;

/// Decision taken for a new submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Nothing was running; the job now holds the active slot.
    RunNow,
    /// The job waits at this 1-based position.
    Queued { position: usize },
}

#[derive(Debug, Default)]
pub struct AdmissionQueue {
    active: Option<String>,
    waiting: VecDeque<String>,
}

impl AdmissionQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn active(&self) -> Option<&str> {
        self.active.as_deref()
    }

    pub fn is_busy(&self) -> bool {
        self.active.is_some()
    }

    pub fn len(&self) -> usize {
        self.waiting.len()
    }

    pub fn is_empty(&self) -> bool {
        self.waiting.is_empty()
    }

    /// Admit `id`: take the active slot if it is free, otherwise append.
    pub fn submit(&mut self, id: String) -> Admission {
        if self.active.is_none() {
            self.active = Some(id);
            return Admission::RunNow;
        }
        self.waiting.push_back(id);
        Admission::Queued {
            position: self.waiting.len(),
        }
    }

    /// Release the active slot and promote the next waiting job.
    ///
    /// Entries for which `is_queued` is false (for example jobs canceled while
    /// waiting) are dropped on the way.
    pub fn advance(&mut self, is_queued: impl Fn(&str) -> bool) -> Option<String> {
        self.active = None;
        while let Some(next) = self.waiting.pop_front() {
            if is_queued(&next) {
                self.active = Some(next.clone());
                return Some(next);
            }
        }
        None
    }

    /// Drop a waiting entry. Returns false when `id` was not waiting.
    pub fn remove(&mut self, id: &str) -> bool {
        match self.waiting.iter().position(|queued| queued == id) {
            Some(index) => {
                self.waiting.remove(index);
                true
            }
            None => false,
        }
    }

    /// Current 1..N positions of the waiting jobs, in arrival order.
    pub fn positions(&self) -> impl Iterator<Item = (&str, usize)> + '_ {
        self.waiting
            .iter()
            .enumerate()
            .map(|(index, id)| (id.as_str(), index + 1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn positions(queue: &AdmissionQueue) -> Vec<(String, usize)> {
        queue
            .positions()
            .map(|(id, pos)| (id.to_string(), pos))
            .collect()
    }

    #[test]
    fn first_submission_runs_immediately() {
        let mut queue = AdmissionQueue::new();
        assert_eq!(queue.submit("a".into()), Admission::RunNow);
        assert_eq!(queue.active(), Some("a"));
        assert!(queue.is_empty());
    }

    #[test]
    fn later_submissions_queue_in_order() {
        let mut queue = AdmissionQueue::new();
        queue.submit("a".into());
        assert_eq!(queue.submit("b".into()), Admission::Queued { position: 1 });
        assert_eq!(queue.submit("c".into()), Admission::Queued { position: 2 });
        assert_eq!(
            positions(&queue),
            vec![("b".to_string(), 1), ("c".to_string(), 2)]
        );
    }

    #[test]
    fn remove_recomputes_without_gaps() {
        let mut queue = AdmissionQueue::new();
        for id in ["a", "b", "c", "d"] {
            queue.submit(id.into());
        }
        assert!(queue.remove("c"));
        assert!(!queue.remove("c"));
        assert_eq!(
            positions(&queue),
            vec![("b".to_string(), 1), ("d".to_string(), 2)]
        );
    }

    #[test]
    fn advance_promotes_head() {
        let mut queue = AdmissionQueue::new();
        for id in ["a", "b", "c"] {
            queue.submit(id.into());
        }
        assert_eq!(queue.advance(|_| true), Some("b".to_string()));
        assert_eq!(queue.active(), Some("b"));
        assert_eq!(positions(&queue), vec![("c".to_string(), 1)]);
    }

    #[test]
    fn advance_skips_entries_no_longer_queued() {
        let mut queue = AdmissionQueue::new();
        for id in ["a", "b", "c"] {
            queue.submit(id.into());
        }
        assert_eq!(queue.advance(|id| id != "b"), Some("c".to_string()));
        assert!(queue.is_empty());
    }

    #[test]
    fn advance_on_empty_frees_slot() {
        let mut queue = AdmissionQueue::new();
        queue.submit("a".into());
        assert_eq!(queue.advance(|_| true), None);
        assert!(!queue.is_busy());
        assert_eq!(queue.submit("b".into()), Admission::RunNow);
    }
}
