//! Built-in action plugins.
//!
//! This crate provides the plugins an endpoint's `do` block can name and the
//! [`PluginTable`] that turns a plugin name plus merged settings into a bound
//! [`BuiltinAction`]:
//!
//! - `run` ([`RunAction`]): executes `sh -c <command>` and captures the exit
//!   code, stdout and stderr. A non-zero exit fails the chain.
//! - `filter` ([`FilterAction`]): passes only when the payload's `ref` names
//!   a configured branch; used to gate later actions.
//!
//! ## Architectural Layer
//!
//! **Orchestration layer.** Plugins implement [`pipeline::Action`]; the chain
//! driver and every validation rule live in the [`pipeline`] crate.
//!
//! ## Known limitation
//!
//! A `run` action without a `timeout` setting waits for its command however
//! long it takes, holding that delivery's request open. A timeout kills only
//! the direct child (`sh`, or `sudo` when `as` is set), not its descendants.

mod filter;
mod run;
mod table;

pub use filter::{FilterAction, BRANCH_REF_PREFIX, FILTER_PLUGIN};
pub use run::{RunAction, RUN_PLUGIN};
pub use table::{BuiltinAction, PluginConstructor, PluginTable};
