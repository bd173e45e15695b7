//! Endpoint registry.
//!
//! Built once at startup from a collection of configuration sources and
//! read-only afterwards. A source that fails to parse is skipped and reported;
//! the registry only fails as a whole if no source yields an endpoint.
//!
//! Plugin construction and the upstream provider's address ranges are
//! supplied through the [`ActionFactory`] and [`UpstreamRanges`] ports, so this
//! module does no I/O of its own.

use std::collections::HashMap;

use async_trait::async_trait;
use ipnet::IpNet;
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;
use tracing::{info, warn};

use crate::settings::{overlay, settings_from_value};
use crate::{
    AccessFilter, Action, ActionName, ActionSettings, ConfigurationError, EndpointName,
    RequestRejected, SignatureVerifier,
};

// ---------------------------------------------------------------------------
// Ports
// ---------------------------------------------------------------------------

/// A plugin could not be constructed from its settings.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ActionBuildError {
    /// No plugin is registered under this name.
    #[error("Handler not recognized: {0}")]
    UnknownPlugin(String),

    /// The merged settings are unusable for this plugin.
    #[error("Invalid settings for {plugin}: {message}")]
    InvalidSettings {
        /// Plugin name.
        plugin: String,
        /// What is wrong.
        message: String,
    },
}

/// Builds bound actions from a plugin name and its merged settings.
pub trait ActionFactory {
    /// The action type this factory produces.
    type Action: Action;

    /// Constructs the action registered under `name`.
    fn build(
        &self,
        name: &ActionName,
        settings: ActionSettings,
    ) -> Result<Self::Action, ActionBuildError>;
}

/// The upstream provider's published hook ranges could not be obtained.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Failed to download upstream hook address ranges: {0}")]
pub struct UpstreamUnavailable(pub String);

/// Source of the well-known upstream provider's delivery address ranges.
///
/// Implementations are expected to fetch once and serve from cache afterwards.
#[async_trait]
pub trait UpstreamRanges: Send + Sync {
    /// Returns the provider's hook ranges.
    async fn hook_ranges(&self) -> Result<Vec<IpNet>, UpstreamUnavailable>;
}

// ---------------------------------------------------------------------------
// Source records
// ---------------------------------------------------------------------------

/// One endpoint's configuration record, as read from its source file.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct EndpointDocument {
    /// Endpoint name (normalised on load).
    pub endpoint: Option<String>,
    /// Shared secret for signature verification.
    pub key: Option<String>,
    /// Custom allow-list entries in CIDR notation.
    pub ip_whitelist: Option<Vec<String>>,
    /// Affirmative (`true`, `"yes"`, `"true"`, `"True"`) to merge the upstream
    /// provider's hook ranges into the allow-list.
    pub ip_whitelist_github: Option<Value>,
    /// Ordered single-key action records.
    #[serde(rename = "do")]
    pub actions: Option<Vec<Value>>,
    /// Settings merged into every action; action-specific keys win.
    pub do_default: Option<ActionSettings>,
}

/// A configuration record together with where it came from.
#[derive(Debug, Clone, PartialEq)]
pub struct EndpointSource {
    /// Origin used in diagnostics (usually a file path).
    pub origin: String,
    /// The parsed record.
    pub document: EndpointDocument,
}

impl EndpointSource {
    /// Pairs `document` with its `origin`.
    pub fn new(origin: impl Into<String>, document: EndpointDocument) -> Self {
        Self {
            origin: origin.into(),
            document,
        }
    }
}

// ---------------------------------------------------------------------------
// Resolved endpoints
// ---------------------------------------------------------------------------

/// A fully resolved endpoint. Immutable once built.
pub struct EndpointConfig<A> {
    name: EndpointName,
    origin: String,
    verifier: Option<SignatureVerifier>,
    access: AccessFilter,
    actions: Vec<(ActionName, A)>,
}

impl<A> EndpointConfig<A> {
    /// Normalised endpoint name.
    pub fn name(&self) -> &EndpointName {
        &self.name
    }

    /// Source the endpoint was loaded from.
    pub fn origin(&self) -> &str {
        &self.origin
    }

    /// Signature verifier, if a secret is configured.
    pub fn verifier(&self) -> Option<&SignatureVerifier> {
        self.verifier.as_ref()
    }

    /// IP allow-list.
    pub fn access(&self) -> &AccessFilter {
        &self.access
    }

    /// Ordered action chain.
    pub fn actions(&self) -> &[(ActionName, A)] {
        &self.actions
    }
}

impl<A> std::fmt::Debug for EndpointConfig<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let actions: Vec<&str> = self.actions.iter().map(|(n, _)| n.as_str()).collect();
        f.debug_struct("EndpointConfig")
            .field("name", &self.name)
            .field("origin", &self.origin)
            .field("verifier", &self.verifier)
            .field("access", &self.access)
            .field("actions", &actions)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Registry construction failed as a whole.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// Every source was rejected (or there were none).
    #[error("No handlers defined ({} source(s) skipped)", .skipped.len())]
    NoUsableEndpoints {
        /// Why each source was skipped.
        skipped: Vec<ConfigurationError>,
    },
}

/// A successfully built registry plus the sources that were skipped.
#[derive(Debug)]
pub struct RegistryBuild<A> {
    pub registry: EndpointRegistry<A>,
    pub skipped: Vec<ConfigurationError>,
}

/// Mapping from endpoint name to its resolved configuration.
pub struct EndpointRegistry<A> {
    endpoints: HashMap<EndpointName, EndpointConfig<A>>,
}

impl<A: Action> EndpointRegistry<A> {
    /// Builds the registry from `sources`, in order.
    ///
    /// Later sources naming an endpoint already defined are skipped. Upstream
    /// ranges are only requested for sources that ask for them.
    pub async fn build<F>(
        sources: impl IntoIterator<Item = EndpointSource>,
        factory: &F,
        upstream: &dyn UpstreamRanges,
    ) -> Result<RegistryBuild<A>, RegistryError>
    where
        F: ActionFactory<Action = A>,
    {
        let mut endpoints: HashMap<EndpointName, EndpointConfig<A>> = HashMap::new();
        let mut skipped = Vec::new();

        for source in sources {
            match parse_source(&source, &endpoints, factory, upstream).await {
                Ok(config) => {
                    info!(
                        endpoint = %config.name,
                        origin = %config.origin,
                        actions = config.actions.len(),
                        signed = config.verifier.is_some(),
                        whitelisted = !config.access.is_open(),
                        "endpoint loaded"
                    );
                    endpoints.insert(config.name.clone(), config);
                }
                Err(message) => {
                    let error = ConfigurationError::new(&source.origin, message);
                    warn!(origin = %error.origin, error = %error.message, "skipping endpoint source");
                    skipped.push(error);
                }
            }
        }

        if endpoints.is_empty() {
            return Err(RegistryError::NoUsableEndpoints { skipped });
        }

        Ok(RegistryBuild {
            registry: Self { endpoints },
            skipped,
        })
    }
}

impl<A> EndpointRegistry<A> {
    /// Looks up an endpoint by its raw (unnormalised) name.
    pub fn resolve(&self, raw_name: &str) -> Result<&EndpointConfig<A>, RequestRejected> {
        let normalized = EndpointName::normalize(raw_name);
        EndpointName::new(normalized)
            .and_then(|name| self.endpoints.get(&name))
            .ok_or_else(|| RequestRejected::EndpointNotFound(normalized.to_string()))
    }

    /// Number of registered endpoints.
    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    /// Returns `true` if nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }

    /// Registered endpoint names, in no particular order.
    pub fn names(&self) -> impl Iterator<Item = &EndpointName> {
        self.endpoints.keys()
    }
}

impl<A> std::fmt::Debug for EndpointRegistry<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EndpointRegistry")
            .field("endpoints", &self.endpoints.values().collect::<Vec<_>>())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Source parsing
// ---------------------------------------------------------------------------

async fn parse_source<A, F>(
    source: &EndpointSource,
    existing: &HashMap<EndpointName, EndpointConfig<A>>,
    factory: &F,
    upstream: &dyn UpstreamRanges,
) -> Result<EndpointConfig<A>, String>
where
    A: Action,
    F: ActionFactory<Action = A>,
{
    let doc = &source.document;

    let raw_name = doc
        .endpoint
        .as_deref()
        .ok_or("Missing endpoint name.")?;
    let name = EndpointName::new(raw_name).ok_or("Empty endpoint name.")?;
    // Deliveries address an endpoint by a single path segment.
    if name.as_str().contains('/') {
        return Err(format!("Endpoint name {name} must not contain '/'."));
    }

    if let Some(previous) = existing.get(&name) {
        return Err(format!(
            "Endpoint {name} already defined in {}.",
            previous.origin
        ));
    }

    let defaults = doc.do_default.clone().unwrap_or_default();
    let records = match doc.actions.as_deref() {
        None => return Err("Missing do block.".into()),
        Some([]) => return Err("Empty do block.".into()),
        Some(records) => records,
    };

    let mut actions = Vec::with_capacity(records.len());
    for record in records {
        let (plugin, settings) = split_record(record)?;
        let merged = overlay(&defaults, settings_from_value(settings));
        let action = factory
            .build(&plugin, merged)
            .map_err(|e| e.to_string())?;
        actions.push((plugin, action));
    }

    let access = load_access_filter(doc, upstream).await?;
    let verifier = doc.key.as_ref().map(SignatureVerifier::new);

    Ok(EndpointConfig {
        name,
        origin: source.origin.clone(),
        verifier,
        access,
        actions,
    })
}

fn split_record(record: &Value) -> Result<(ActionName, Value), String> {
    let map = match record {
        Value::Object(map) => map,
        Value::Null => return Err("Empty item in do block.".into()),
        other => return Err(format!("Item in do block is not a map: {other}")),
    };

    let mut entries = map.iter();
    let (key, settings) = entries.next().ok_or("Empty item in do block.")?;
    if entries.next().is_some() {
        return Err("Multiple items in do block.".into());
    }

    let plugin = ActionName::new(key.as_str()).ok_or("Empty plugin name in do block.")?;
    Ok((plugin, settings.clone()))
}

async fn load_access_filter(
    doc: &EndpointDocument,
    upstream: &dyn UpstreamRanges,
) -> Result<AccessFilter, String> {
    let mut ranges: Vec<IpNet> = Vec::new();

    if doc.ip_whitelist_github.as_ref().is_some_and(is_affirmative) {
        let hooks = upstream.hook_ranges().await.map_err(|e| e.to_string())?;
        ranges.extend(hooks);
    }

    for block in doc.ip_whitelist.iter().flatten() {
        let net = block
            .trim()
            .parse::<IpNet>()
            .map_err(|e| format!("Cannot parse IP network block {block}: {e}"))?;
        ranges.push(net);
    }

    Ok(AccessFilter::from_ranges(ranges))
}

fn is_affirmative(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::String(s) => matches!(s.as_str(), "yes" | "true" | "True"),
        _ => false,
    }
}
