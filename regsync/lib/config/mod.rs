//! Configuration files for the synchronization client.
//!
//! Two inputs drive a run: an auth file mapping registries (or
//! `registry/prefix` keys) to credentials, and an images file mapping
//! source references to one or more destinations. A legacy combined file
//! holding both sections is still accepted. Files are YAML or JSON,
//! detected by extension.

mod defaults;

use std::{
    collections::{BTreeMap, HashMap},
    path::Path,
};

use serde::Deserialize;

use crate::{auth::Credential, utils, RegsyncError, RegsyncResult};

//--------------------------------------------------------------------------------------------------
// Exports
//--------------------------------------------------------------------------------------------------

pub use defaults::*;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// The configuration of a synchronization run.
#[derive(Debug, Default)]
pub struct Config {
    /// Credentials keyed by registry or registry/prefix.
    pub auth: HashMap<String, Vec<Credential>>,

    /// Source reference -> destination references. Destinations have
    /// already undergone `$ENV` expansion; an empty destination string
    /// stands for the default destination registry.
    pub images: BTreeMap<String, Vec<String>>,

    /// Registry used when an images entry has an empty destination.
    pub default_registry: Option<String>,
}

/// An auth-file entry: a single credential or, for Docker Hub, a list.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum CredentialEntry {
    One(Credential),
    Many(Vec<Credential>),
}

/// An images-file value: one destination or a list of destinations.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum DestinationEntry {
    One(String),
    Many(Vec<String>),
}

/// The legacy combined configuration file.
#[derive(Debug, Deserialize)]
struct LegacyConfig {
    #[serde(default)]
    auth: HashMap<String, CredentialEntry>,

    #[serde(default)]
    images: BTreeMap<String, DestinationEntry>,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl Config {
    /// Loads configuration from an auth file and an images file, or from a
    /// legacy combined file when `legacy_path` is given instead.
    pub fn load(
        auth_path: Option<&Path>,
        images_path: Option<&Path>,
        legacy_path: Option<&Path>,
        default_registry: Option<String>,
    ) -> RegsyncResult<Self> {
        let (auth, images) = match (legacy_path, auth_path, images_path) {
            (Some(legacy), _, _) => {
                let legacy: LegacyConfig = decode_file(legacy)?;
                (legacy.auth, legacy.images)
            }
            (None, Some(auth), Some(images)) => {
                (decode_file(auth)?, decode_file(images)?)
            }
            (None, None, Some(images)) => (HashMap::new(), decode_file(images)?),
            _ => {
                return Err(RegsyncError::Config(
                    "an images file is required (--images, optionally with --auth, or legacy --config)"
                        .into(),
                ))
            }
        };

        let auth = auth
            .into_iter()
            .map(|(key, entry)| {
                let credentials = match entry {
                    CredentialEntry::One(credential) => vec![credential],
                    CredentialEntry::Many(credentials) => credentials,
                };
                (key, credentials)
            })
            .collect::<HashMap<_, _>>();

        for (key, credentials) in &auth {
            if credentials.is_empty() {
                return Err(RegsyncError::Config(format!(
                    "auth entry {} has an empty credential list",
                    key
                )));
            }
        }

        let images = images
            .into_iter()
            .map(|(source, entry)| {
                let destinations = normalize_destinations(&source, entry)?;
                Ok((source, destinations))
            })
            .collect::<RegsyncResult<BTreeMap<_, _>>>()?;

        if images.is_empty() {
            return Err(RegsyncError::Config("images file names no images".into()));
        }

        Ok(Self {
            auth,
            images,
            default_registry,
        })
    }
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Decodes a YAML or JSON file into `T`, choosing the format by extension.
fn decode_file<T: serde::de::DeserializeOwned>(path: &Path) -> RegsyncResult<T> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        RegsyncError::Config(format!("cannot read config file {}: {}", path.display(), e))
    })?;

    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or_default()
        .to_ascii_lowercase();

    match extension.as_str() {
        "json" => serde_json::from_str(&content).map_err(|e| {
            RegsyncError::Config(format!("cannot parse {}: {}", path.display(), e))
        }),
        "yaml" | "yml" => serde_yaml::from_str(&content).map_err(|e| {
            RegsyncError::Config(format!("cannot parse {}: {}", path.display(), e))
        }),
        other => Err(RegsyncError::Config(format!(
            "unsupported config extension {:?} for {} (expected .yaml, .yml or .json)",
            other,
            path.display()
        ))),
    }
}

/// Normalizes an images-file value into a duplicate-free destination list,
/// expanding environment variables. An empty value is kept as a single
/// empty destination and resolved against the default registry later.
fn normalize_destinations(
    source: &str,
    entry: DestinationEntry,
) -> RegsyncResult<Vec<String>> {
    if source.is_empty() {
        return Err(RegsyncError::Config("empty source reference".into()));
    }

    let raw = match entry {
        DestinationEntry::One(destination) => vec![destination],
        DestinationEntry::Many(destinations) if destinations.is_empty() => vec![String::new()],
        DestinationEntry::Many(destinations) => destinations,
    };

    let mut destinations = Vec::new();
    for destination in raw {
        let expanded = utils::expand_env(&destination);
        if !destinations.contains(&expanded) {
            destinations.push(expanded);
        }
    }

    Ok(destinations)
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
