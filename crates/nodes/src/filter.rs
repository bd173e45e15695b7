//! The `filter` plugin: halt the chain unless the pushed branch matches.

use pipeline::{ActionFailure, ActionSettings};
use serde::Deserialize;
use serde_json::Value;

/// Registered plugin name.
pub const FILTER_PLUGIN: &str = "filter";

/// Prefix of a branch ref in a push payload.
pub const BRANCH_REF_PREFIX: &str = "refs/heads/";

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum BranchSpec {
    One(String),
    Many(Vec<String>),
}

#[derive(Debug, Deserialize)]
struct FilterSettings {
    branch: Option<String>,
    branches: Option<BranchSpec>,
    #[serde(rename = "_")]
    shorthand: Option<BranchSpec>,
}

/// Passes when the payload's `ref` names one of the configured branches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterAction {
    branches: Vec<String>,
}

impl FilterAction {
    /// A filter accepting any of `branches`.
    pub fn new<I, S>(branches: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            branches: branches.into_iter().map(Into::into).collect(),
        }
    }

    /// Builds the filter from merged settings.
    ///
    /// `branch`, `branches` and the shorthand value are combined; at least one
    /// branch is required.
    pub fn from_settings(settings: ActionSettings) -> Result<Self, String> {
        let parsed: FilterSettings =
            serde_json::from_value(Value::Object(settings)).map_err(|e| e.to_string())?;

        let mut branches: Vec<String> = Vec::new();
        branches.extend(parsed.branch);
        for spec in [parsed.branches, parsed.shorthand].into_iter().flatten() {
            match spec {
                BranchSpec::One(branch) => branches.push(branch),
                BranchSpec::Many(list) => branches.extend(list),
            }
        }

        if branches.is_empty() {
            return Err("Filter requires a branch or branches setting.".into());
        }
        Ok(Self { branches })
    }

    /// Accepted branch names.
    pub fn branches(&self) -> &[String] {
        &self.branches
    }

    /// Checks the payload's `ref`. Success output is `null`; failures carry no
    /// output.
    pub fn execute(&self, payload: &Value) -> Result<Value, ActionFailure> {
        let git_ref = payload
            .get("ref")
            .and_then(Value::as_str)
            .ok_or_else(|| ActionFailure::new("Incoming payload has no ref to filter on."))?;

        let branch = git_ref
            .strip_prefix(BRANCH_REF_PREFIX)
            .map(str::trim)
            .ok_or_else(|| {
                ActionFailure::new(format!(
                    "Incoming ref ({git_ref}) is not a branch and cannot match filter ({}).",
                    self.describe()
                ))
            })?;

        if self.branches.iter().any(|b| b == branch) {
            Ok(Value::Null)
        } else {
            Err(ActionFailure::new(format!(
                "Incoming ref ({branch}) does not match filter ({}).",
                self.describe()
            )))
        }
    }

    fn describe(&self) -> String {
        self.branches.join(", ")
    }
}
