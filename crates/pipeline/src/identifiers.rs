//! Newtype domain identifiers.
//!
//! Every name or token that identifies something in the delivery pipeline is a
//! distinct newtype. An [`EndpointName`] can never be confused with an
//! [`ActionName`] even though both wrap a `String`.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Macro for String-wrapped newtypes.
// Generates: struct, new() returning Option<Self>, as_str(), Display.
// ---------------------------------------------------------------------------
macro_rules! string_id {
    (
        $(#[$attr:meta])*
        $name:ident
    ) => {
        $(#[$attr])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub struct $name(String);

        impl $name {
            /// Returns the identifier as a string slice.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

// ---------------------------------------------------------------------------
// Identifiers: string-backed (configuration names)
// ---------------------------------------------------------------------------

string_id! {
    /// Identifies a registered endpoint, i.e. the path segment a delivery is
    /// posted to.
    ///
    /// Always stored in normalised form: surrounding `/` and whitespace are
    /// stripped, so `" /deploy/ "` and `"deploy"` name the same endpoint.
    EndpointName
}

impl EndpointName {
    /// Normalises `raw` and returns the endpoint name, or `None` if nothing
    /// is left after normalisation.
    pub fn new(raw: impl AsRef<str>) -> Option<Self> {
        let normalized = Self::normalize(raw.as_ref());
        if normalized.is_empty() {
            None
        } else {
            Some(Self(normalized.to_string()))
        }
    }

    /// Strips leading and trailing `/` and whitespace.
    pub fn normalize(raw: &str) -> &str {
        raw.trim_matches(|c: char| c == '/' || c.is_whitespace())
    }
}

string_id! {
    /// Identifies a plugin in an endpoint's action chain (e.g. `"run"`).
    ///
    /// This is the key of the single-entry record in the `do` block; it is
    /// echoed back as `plugin_name` in the delivery report.
    ActionName
}

impl ActionName {
    /// Creates a new action name, returning `None` if the value is empty.
    pub fn new(value: impl Into<String>) -> Option<Self> {
        let v = value.into();
        if v.is_empty() {
            None
        } else {
            Some(Self(v))
        }
    }
}

// ---------------------------------------------------------------------------
// Identifiers: UUID-backed (assigned by the sender)
// ---------------------------------------------------------------------------

/// Identifies one inbound delivery attempt.
///
/// Assigned by the upstream sender and carried in the delivery header. Used as
/// the replay-guard key and echoed back as `guid` in the report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeliveryId(Uuid);

impl DeliveryId {
    /// Parses a delivery identifier from its header value.
    ///
    /// Accepts any textual form `uuid` accepts (hyphenated, simple, braced,
    /// URN). Returns `None` for anything else.
    pub fn parse(raw: &str) -> Option<Self> {
        Uuid::parse_str(raw.trim()).ok().map(Self)
    }

    /// Creates a [`DeliveryId`] from an existing UUID.
    pub fn from_uuid(id: Uuid) -> Self {
        Self(id)
    }

    /// Returns the underlying [`Uuid`].
    pub fn as_uuid(self) -> Uuid {
        self.0
    }
}

impl std::fmt::Display for DeliveryId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
