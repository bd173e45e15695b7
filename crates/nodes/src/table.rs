//! The closed set of built-in actions and their registration table.

use std::collections::BTreeMap;

use async_trait::async_trait;
use pipeline::{Action, ActionBuildError, ActionFactory, ActionFailure, ActionName, ActionSettings};
use serde_json::Value;

use crate::{FilterAction, RunAction, FILTER_PLUGIN, RUN_PLUGIN};

/// Every action a `do` block can name.
///
/// Adding a plugin means adding a variant here, a dispatch arm in
/// [`Action::execute`] and an entry in [`PluginTable::builtin`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuiltinAction {
    /// Shell command execution.
    Run(RunAction),
    /// Branch gate.
    Filter(FilterAction),
}

#[async_trait]
impl Action for BuiltinAction {
    async fn execute(&self, payload: &Value) -> Result<Value, ActionFailure> {
        match self {
            Self::Run(action) => action.execute(payload).await,
            Self::Filter(action) => action.execute(payload),
        }
    }
}

/// Constructor registered for a plugin name.
pub type PluginConstructor = fn(ActionSettings) -> Result<BuiltinAction, String>;

/// Name → constructor table consulted once per action at registry-build time.
#[derive(Debug, Clone, Default)]
pub struct PluginTable {
    constructors: BTreeMap<&'static str, PluginConstructor>,
}

impl PluginTable {
    /// A table with no plugins.
    pub fn empty() -> Self {
        Self::default()
    }

    /// A table with `run` and `filter` registered.
    pub fn builtin() -> Self {
        let mut table = Self::empty();
        table.register(RUN_PLUGIN, |settings| {
            RunAction::from_settings(settings).map(BuiltinAction::Run)
        });
        table.register(FILTER_PLUGIN, |settings| {
            FilterAction::from_settings(settings).map(BuiltinAction::Filter)
        });
        table
    }

    /// Registers `constructor` under `name`.
    ///
    /// Returns `false` (and leaves the table unchanged) if the name is taken.
    pub fn register(&mut self, name: &'static str, constructor: PluginConstructor) -> bool {
        if self.constructors.contains_key(name) {
            return false;
        }
        self.constructors.insert(name, constructor);
        true
    }

    /// Registered plugin names, sorted.
    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.constructors.keys().copied()
    }
}

impl ActionFactory for PluginTable {
    type Action = BuiltinAction;

    fn build(
        &self,
        name: &ActionName,
        settings: ActionSettings,
    ) -> Result<BuiltinAction, ActionBuildError> {
        let constructor = self
            .constructors
            .get(name.as_str())
            .ok_or_else(|| ActionBuildError::UnknownPlugin(name.to_string()))?;

        constructor(settings).map_err(|message| ActionBuildError::InvalidSettings {
            plugin: name.to_string(),
            message,
        })
    }
}
