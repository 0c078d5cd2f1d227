//! Deferred cleanup obligations.
//!
//! Each resource created during a run registers an obligation to remove it.
//! Obligations fire in reverse registration order when the stack is dropped,
//! on every return path. A failing obligation is logged and does not stop the
//! ones registered before it.

use ctrun_common::error::Result;

type Action<'a> = Box<dyn FnOnce() -> Result<()> + 'a>;

struct Obligation<'a> {
    label: &'static str,
    action: Action<'a>,
}

/// LIFO stack of cleanup actions run on drop.
#[derive(Default)]
pub struct Obligations<'a> {
    stack: Vec<Obligation<'a>>,
}

impl<'a> Obligations<'a> {
    /// Creates an empty stack.
    #[must_use]
    pub fn new() -> Self {
        Self { stack: Vec::new() }
    }

    /// Registers an obligation.
    pub fn push(&mut self, label: &'static str, action: impl FnOnce() -> Result<()> + 'a) {
        tracing::trace!(obligation = label, "cleanup registered");
        self.stack.push(Obligation {
            label,
            action: Box::new(action),
        });
    }

    /// Number of pending obligations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.stack.len()
    }

    /// Returns `true` if nothing is pending.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.stack.is_empty()
    }

    /// Runs the most recently registered obligation now.
    pub fn run_last(&mut self) {
        if let Some(obligation) = self.stack.pop() {
            fire(obligation);
        }
    }

    /// Runs every pending obligation, newest first.
    pub fn run_all(&mut self) {
        while let Some(obligation) = self.stack.pop() {
            fire(obligation);
        }
    }
}

fn fire(obligation: Obligation<'_>) {
    match (obligation.action)() {
        Ok(()) => tracing::debug!(obligation = obligation.label, "cleanup done"),
        Err(e) => tracing::warn!(obligation = obligation.label, error = %e, "cleanup failed"),
    }
}

impl Drop for Obligations<'_> {
    fn drop(&mut self) {
        self.run_all();
    }
}

impl std::fmt::Debug for Obligations<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.stack.iter().map(|o| o.label))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ctrun_common::error::CtrunError;
    use std::cell::RefCell;

    #[test]
    fn drop_runs_in_reverse_order() {
        let log = RefCell::new(Vec::new());
        {
            let mut obligations = Obligations::new();
            obligations.push("first", || {
                log.borrow_mut().push("first");
                Ok(())
            });
            obligations.push("second", || {
                log.borrow_mut().push("second");
                Ok(())
            });
            assert_eq!(obligations.len(), 2);
        }
        assert_eq!(*log.borrow(), vec!["second", "first"]);
    }

    #[test]
    fn failure_does_not_stop_earlier_obligations() {
        let log = RefCell::new(Vec::new());
        {
            let mut obligations = Obligations::new();
            obligations.push("container", || {
                log.borrow_mut().push("container");
                Ok(())
            });
            obligations.push("task", || {
                Err(CtrunError::Config {
                    message: "boom".into(),
                })
            });
        }
        assert_eq!(*log.borrow(), vec!["container"]);
    }

    #[test]
    fn run_last_fires_only_the_newest() {
        let log = RefCell::new(Vec::new());
        let mut obligations = Obligations::new();
        obligations.push("a", || {
            log.borrow_mut().push("a");
            Ok(())
        });
        obligations.push("b", || {
            log.borrow_mut().push("b");
            Ok(())
        });
        obligations.run_last();
        assert_eq!(*log.borrow(), vec!["b"]);
        assert_eq!(obligations.len(), 1);
        drop(obligations);
        assert_eq!(*log.borrow(), vec!["b", "a"]);
    }

    #[test]
    fn empty_stack_drops_quietly() {
        let obligations = Obligations::new();
        assert!(obligations.is_empty());
    }
}
