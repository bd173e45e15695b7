//! Endpoint configuration directory loading.
//!
//! Every `*.yml` file in the directory is one endpoint record. Files are read
//! in file-name order so that "first definition wins" does not depend on the
//! file system's listing order.

use std::fs;
use std::path::Path;

use anyhow::Context;
use pipeline::{ConfigurationError, EndpointDocument, EndpointSource};
use tracing::{debug, warn};

/// Extension of endpoint configuration files.
pub const CONFIG_EXTENSION: &str = "yml";

/// Result of reading a configuration directory.
#[derive(Debug, Default)]
pub struct LoadedSources {
    /// Parsed records, in file-name order.
    pub sources: Vec<EndpointSource>,
    /// Files that could not be read or parsed.
    pub errors: Vec<ConfigurationError>,
}

/// Reads every endpoint record in `dir`.
///
/// Only a missing or unlistable directory is an error; individual bad files
/// are collected in [`LoadedSources::errors`].
pub fn load_sources(dir: &Path) -> anyhow::Result<LoadedSources> {
    let mut paths = Vec::new();
    for entry in fs::read_dir(dir)
        .with_context(|| format!("cannot read configuration directory {}", dir.display()))?
    {
        let path = entry
            .with_context(|| format!("cannot list configuration directory {}", dir.display()))?
            .path();
        if path.is_file() {
            paths.push(path);
        }
    }
    paths.sort();

    let mut loaded = LoadedSources::default();
    for path in paths {
        if path.extension().and_then(|e| e.to_str()) != Some(CONFIG_EXTENSION) {
            warn!(path = %path.display(), "skipping file without .yml extension");
            continue;
        }

        match read_source(&path) {
            Ok(source) => {
                debug!(origin = %source.origin, "configuration file read");
                loaded.sources.push(source);
            }
            Err(error) => {
                warn!(origin = %error.origin, error = %error.message, "skipping configuration file");
                loaded.errors.push(error);
            }
        }
    }

    Ok(loaded)
}

fn read_source(path: &Path) -> Result<EndpointSource, ConfigurationError> {
    let origin = path.display().to_string();

    let text = fs::read_to_string(path)
        .map_err(|e| ConfigurationError::new(&origin, format!("Cannot read file: {e}")))?;

    let document: EndpointDocument = serde_yaml::from_str(&text)
        .map_err(|e| ConfigurationError::new(&origin, format!("Cannot parse YAML: {e}")))?;

    Ok(EndpointSource::new(origin, document))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn write(dir: &Path, name: &str, contents: &str) {
        fs::write(dir.join(name), contents).unwrap();
    }

    #[test]
    fn test_yml_files_loaded_in_name_order() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "20-second.yml", "endpoint: second\ndo:\n  - run: 'true'\n");
        write(dir.path(), "10-first.yml", "endpoint: first\ndo:\n  - run: 'true'\n");

        let loaded = load_sources(dir.path()).unwrap();

        let names: Vec<_> = loaded
            .sources
            .iter()
            .map(|s| s.document.endpoint.clone().unwrap())
            .collect();
        assert_eq!(names, vec!["first", "second"]);
        assert!(loaded.errors.is_empty());
    }

    #[test]
    fn test_record_fields_parsed() {
        let dir = tempfile::tempdir().unwrap();
        write(
            dir.path(),
            "deploy.yml",
            r#"
endpoint: /deploy/
key: s3cret
ip-whitelist:
  - 10.0.0.0/8
ip-whitelist-github: "yes"
do-default:
  as: www-data
do:
  - filter: main
  - run:
      command: make deploy
      cwd: /srv/app
"#,
        );

        let loaded = load_sources(dir.path()).unwrap();
        let document = &loaded.sources[0].document;

        assert_eq!(document.endpoint.as_deref(), Some("/deploy/"));
        assert_eq!(document.key.as_deref(), Some("s3cret"));
        assert_eq!(document.ip_whitelist, Some(vec!["10.0.0.0/8".to_string()]));
        assert_eq!(document.ip_whitelist_github, Some(json!("yes")));
        assert_eq!(
            document.do_default.clone().map(serde_json::Value::Object),
            Some(json!({"as": "www-data"}))
        );
        assert_eq!(
            document.actions,
            Some(vec![
                json!({"filter": "main"}),
                json!({"run": {"command": "make deploy", "cwd": "/srv/app"}}),
            ])
        );
    }

    #[test]
    fn test_other_extensions_skipped() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "notes.txt", "not yaml at all: [");
        write(dir.path(), "hook.yaml", "endpoint: ignored\n");
        write(dir.path(), "hook.yml", "endpoint: kept\ndo:\n  - run: 'true'\n");

        let loaded = load_sources(dir.path()).unwrap();

        assert_eq!(loaded.sources.len(), 1);
        assert!(loaded.errors.is_empty());
    }

    #[test]
    fn test_unparseable_file_reported() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "broken.yml", "endpoint: [unterminated\n");
        write(dir.path(), "good.yml", "endpoint: good\ndo:\n  - run: 'true'\n");

        let loaded = load_sources(dir.path()).unwrap();

        assert_eq!(loaded.sources.len(), 1);
        assert_eq!(loaded.errors.len(), 1);
        assert!(loaded.errors[0].origin.ends_with("broken.yml"));
        assert!(loaded.errors[0].message.starts_with("Cannot parse YAML"));
    }

    #[test]
    fn test_subdirectories_ignored() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("nested.yml")).unwrap();

        let loaded = load_sources(dir.path()).unwrap();
        assert!(loaded.sources.is_empty());
        assert!(loaded.errors.is_empty());
    }

    #[test]
    fn test_missing_directory_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_sources(&dir.path().join("absent")).unwrap_err();
        assert!(err.to_string().contains("cannot read configuration directory"));
    }
}
