//! Sequential action execution.
//!
//! A chain is a pipeline: each action assumes the previous ones succeeded (a
//! `filter` gating a `run`, for instance). [`ActionChain::run`] therefore stops
//! at the first failure; later actions never execute.

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, warn};

use crate::{ActionFailure, ActionName, ChainReport};

/// A configured unit of work executed against a decoded payload.
///
/// Implemented by the plugin crate; the chain driver only sees this trait.
#[async_trait]
pub trait Action: Send + Sync {
    /// Runs the action. `Ok` carries the output recorded in the report.
    async fn execute(&self, payload: &Value) -> Result<Value, ActionFailure>;
}

/// Borrowed view of an endpoint's ordered actions for one delivery.
#[derive(Debug)]
pub struct ActionChain<'a, A> {
    actions: &'a [(ActionName, A)],
}

impl<'a, A: Action> ActionChain<'a, A> {
    /// Wraps an ordered action list.
    pub fn new(actions: &'a [(ActionName, A)]) -> Self {
        Self { actions }
    }

    /// Executes the actions in order, stopping at the first failure.
    pub async fn run(&self, payload: &Value) -> ChainReport {
        let mut report = ChainReport::new();

        for (name, action) in self.actions {
            match action.execute(payload).await {
                Ok(output) => {
                    debug!(action = %name, "action completed");
                    report.push_output(name.clone(), output);
                }
                Err(failure) => {
                    warn!(action = %name, error = %failure, "action failed, stopping chain");
                    report.push_failure(name.clone(), failure);
                    break;
                }
            }
        }

        report
    }

    /// Number of configured actions.
    pub fn len(&self) -> usize {
        self.actions.len()
    }

    /// Returns `true` if there are no actions.
    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use super::*;
    use serde_json::json;

    struct Counted {
        calls: Arc<AtomicUsize>,
        result: Result<Value, ActionFailure>,
    }

    #[async_trait]
    impl Action for Counted {
        async fn execute(&self, _payload: &Value) -> Result<Value, ActionFailure> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.result.clone()
        }
    }

    fn counted(result: Result<Value, ActionFailure>) -> (Arc<AtomicUsize>, Counted) {
        let calls = Arc::new(AtomicUsize::new(0));
        let counted = Counted {
            calls: Arc::clone(&calls),
            result,
        };
        (calls, counted)
    }

    fn name(s: &str) -> ActionName {
        ActionName::new(s).unwrap()
    }

    #[tokio::test]
    async fn test_all_actions_succeed() {
        let (_, a1) = counted(Ok(json!(1)));
        let (_, a2) = counted(Ok(json!(2)));
        let actions = vec![(name("a1"), a1), (name("a2"), a2)];

        let report = ActionChain::new(&actions).run(&json!({})).await;

        assert_eq!(report.len(), 2);
        assert!(report.failure().is_none());
        let outputs: Vec<_> = report.outputs().map(|(_, v)| v.clone()).collect();
        assert_eq!(outputs, vec![json!(1), json!(2)]);
    }

    #[tokio::test]
    async fn test_chain_stops_at_first_failure() {
        let (c1, a1) = counted(Ok(json!("first")));
        let (c2, a2) = counted(Err(ActionFailure::with_output("broken", json!({"code": 1}))));
        let (c3, a3) = counted(Ok(json!("third")));
        let actions = vec![(name("a1"), a1), (name("a2"), a2), (name("a3"), a3)];

        let report = ActionChain::new(&actions).run(&json!({})).await;

        assert_eq!(report.len(), 2);
        assert_eq!(report.results()[0].action.as_str(), "a1");
        let (failed, failure) = report.failure().unwrap();
        assert_eq!(failed.as_str(), "a2");
        assert_eq!(failure.message, "broken");
        assert_eq!(failure.output, Some(json!({"code": 1})));

        assert_eq!(c1.load(Ordering::SeqCst), 1);
        assert_eq!(c2.load(Ordering::SeqCst), 1);
        assert_eq!(c3.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_empty_chain_reports_nothing() {
        let actions: Vec<(ActionName, Counted)> = Vec::new();
        let report = ActionChain::new(&actions).run(&Value::Null).await;
        assert!(report.is_empty());
    }
}
