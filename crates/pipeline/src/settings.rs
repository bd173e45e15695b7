//! Action settings and the defaults overlay.
//!
//! Each entry of an endpoint's `do` block is a single-key record
//! `{<plugin>: <settings>}`. The endpoint's `do-default` map is overlaid by the
//! entry's own settings once, at registry-build time.

use serde_json::{Map, Value};

/// Resolved settings handed to a plugin constructor.
pub type ActionSettings = Map<String, Value>;

/// Key under which a scalar action value is stored (`run: "make"` becomes
/// `{"_": "make"}`).
pub const SHORTHAND_KEY: &str = "_";

/// Returns `defaults` overlaid by `specific`; keys in `specific` win.
pub fn overlay(defaults: &ActionSettings, specific: ActionSettings) -> ActionSettings {
    let mut merged = defaults.clone();
    merged.extend(specific);
    merged
}

/// Turns the value of a `do` entry into a settings map.
///
/// Maps are used as-is; `null` is an empty map; any other value is stored
/// under [`SHORTHAND_KEY`].
pub fn settings_from_value(value: Value) -> ActionSettings {
    match value {
        Value::Object(map) => map,
        Value::Null => Map::new(),
        other => {
            let mut map = Map::new();
            map.insert(SHORTHAND_KEY.to_string(), other);
            map
        }
    }
}
