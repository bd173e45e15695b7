//! Shared value types for the delivery pipeline.
//!
//! [`ActionResult`] and [`ChainReport`] record what an action chain did;
//! [`DeliveryReport`] is the wire envelope handed back to the sender.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{ActionFailure, ActionName, DeliveryId};

// ---------------------------------------------------------------------------
// Action results
// ---------------------------------------------------------------------------

/// What a single action produced.
#[derive(Debug, Clone, PartialEq)]
pub enum ActionOutcome {
    /// The action succeeded with an opaque output (e.g. exit code and streams).
    Completed(Value),
    /// The action failed; the chain stopped here.
    Failed(ActionFailure),
}

/// Per-action outcome, tagged with the name the action was configured under.
#[derive(Debug, Clone, PartialEq)]
pub struct ActionResult {
    /// Plugin name from the `do` block.
    pub action: ActionName,
    /// Success output or failure.
    pub outcome: ActionOutcome,
}

impl ActionResult {
    /// Returns `true` if the action failed.
    pub fn is_failure(&self) -> bool {
        matches!(self.outcome, ActionOutcome::Failed(_))
    }
}

// ---------------------------------------------------------------------------

/// Ordered results of one chain execution.
///
/// Always a prefix of the configured action list. Only the last entry can be a
/// failure; once a failure is recorded nothing more can be appended.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChainReport {
    results: Vec<ActionResult>,
}

impl ChainReport {
    /// Creates an empty report.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a successful action.
    ///
    /// Ignored once the report is terminated by a failure.
    pub fn push_output(&mut self, action: ActionName, output: Value) {
        if !self.is_failed() {
            self.results.push(ActionResult {
                action,
                outcome: ActionOutcome::Completed(output),
            });
        }
    }

    /// Records the terminal failure.
    ///
    /// Ignored if the report already carries one.
    pub fn push_failure(&mut self, action: ActionName, failure: ActionFailure) {
        if !self.is_failed() {
            self.results.push(ActionResult {
                action,
                outcome: ActionOutcome::Failed(failure),
            });
        }
    }

    /// All recorded results, in execution order.
    pub fn results(&self) -> &[ActionResult] {
        &self.results
    }

    /// Successful results only.
    pub fn outputs(&self) -> impl Iterator<Item = (&ActionName, &Value)> {
        self.results.iter().filter_map(|r| match &r.outcome {
            ActionOutcome::Completed(output) => Some((&r.action, output)),
            ActionOutcome::Failed(_) => None,
        })
    }

    /// The terminal failure, if the chain stopped early.
    pub fn failure(&self) -> Option<(&ActionName, &ActionFailure)> {
        self.results.last().and_then(|r| match &r.outcome {
            ActionOutcome::Failed(failure) => Some((&r.action, failure)),
            ActionOutcome::Completed(_) => None,
        })
    }

    /// Returns `true` if the chain stopped at a failing action.
    pub fn is_failed(&self) -> bool {
        self.results.last().is_some_and(ActionResult::is_failure)
    }

    /// Number of actions that ran (including the failing one).
    pub fn len(&self) -> usize {
        self.results.len()
    }

    /// Returns `true` if no action ran.
    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Wire envelope
// ---------------------------------------------------------------------------

/// One successful entry in the `do` list of a [`DeliveryReport`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportedOutput {
    pub plugin_name: ActionName,
    pub output: Value,
}

/// The `error` member of a [`DeliveryReport`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportedFailure {
    pub plugin_name: ActionName,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
}

/// Response body for a processed push delivery.
///
/// `status` is always 200: a failing action is reported in `error`, it does not
/// change the envelope status.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliveryReport {
    pub status: u16,
    pub error: Option<ReportedFailure>,
    pub guid: DeliveryId,
    #[serde(rename = "do")]
    pub actions: Vec<ReportedOutput>,
}

impl DeliveryReport {
    /// Builds the envelope for `chain`, executed for delivery `guid`.
    pub fn new(guid: DeliveryId, chain: &ChainReport) -> Self {
        let actions = chain
            .outputs()
            .map(|(action, output)| ReportedOutput {
                plugin_name: action.clone(),
                output: output.clone(),
            })
            .collect();
        let error = chain.failure().map(|(action, failure)| ReportedFailure {
            plugin_name: action.clone(),
            message: failure.message.clone(),
            output: failure.output.clone(),
        });

        Self {
            status: 200,
            error,
            guid,
            actions,
        }
    }
}

// ---------------------------------------------------------------------------
// Time
// ---------------------------------------------------------------------------

/// A UTC wall-clock timestamp.
///
/// Wraps [`chrono::DateTime<Utc>`] so callers never depend on `chrono` types
/// directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Timestamp(DateTime<Utc>);

impl Timestamp {
    /// Returns the current UTC time as a [`Timestamp`].
    pub fn now() -> Self {
        Self(Utc::now())
    }

    /// Creates a [`Timestamp`] from a [`DateTime<Utc>`].
    pub fn from_utc(dt: DateTime<Utc>) -> Self {
        Self(dt)
    }

    /// Returns the underlying [`DateTime<Utc>`].
    pub fn as_datetime(self) -> DateTime<Utc> {
        self.0
    }

    /// Time elapsed from `earlier` to `self`; zero if `earlier` is in the future.
    pub fn since(self, earlier: Timestamp) -> std::time::Duration {
        (self.0 - earlier.0).to_std().unwrap_or_default()
    }
}

impl std::fmt::Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.to_rfc3339())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use uuid::Uuid;

    fn name(s: &str) -> ActionName {
        ActionName::new(s).unwrap()
    }

    #[test]
    fn test_chain_report_stops_accepting_after_failure() {
        let mut report = ChainReport::new();
        report.push_output(name("filter"), Value::Null);
        report.push_failure(name("run"), ActionFailure::new("boom"));
        report.push_output(name("run"), json!({"code": 0}));

        assert_eq!(report.len(), 2);
        assert!(report.is_failed());
        assert_eq!(report.failure().unwrap().0.as_str(), "run");
    }

    #[test]
    fn test_delivery_report_serialization() {
        let mut report = ChainReport::new();
        report.push_output(name("filter"), Value::Null);
        report.push_failure(
            name("run"),
            ActionFailure::with_output("Non-zero exit code (2)", json!({"code": 2})),
        );

        let guid = DeliveryId::from_uuid(Uuid::nil());
        let body = serde_json::to_value(DeliveryReport::new(guid, &report)).unwrap();

        assert_eq!(
            body,
            json!({
                "status": 200,
                "error": {
                    "plugin_name": "run",
                    "message": "Non-zero exit code (2)",
                    "output": {"code": 2}
                },
                "guid": "00000000-0000-0000-0000-000000000000",
                "do": [{"plugin_name": "filter", "output": null}]
            })
        );
    }

    #[test]
    fn test_delivery_report_omits_missing_failure_output() {
        let mut report = ChainReport::new();
        report.push_failure(name("filter"), ActionFailure::new("no match"));

        let body =
            serde_json::to_value(DeliveryReport::new(DeliveryId::from_uuid(Uuid::nil()), &report))
                .unwrap();
        assert_eq!(body["error"], json!({"plugin_name": "filter", "message": "no match"}));
        assert_eq!(body["do"], json!([]));
    }

    #[test]
    fn test_timestamp_since_saturates() {
        let now = Timestamp::now();
        let later = Timestamp::from_utc(now.as_datetime() + chrono::Duration::seconds(5));
        assert_eq!(now.since(later), std::time::Duration::ZERO);
        assert_eq!(later.since(now), std::time::Duration::from_secs(5));
    }
}
