//! Typed view of the flat recorder configuration.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{error, warn};

use crate::{Error, Result};

const PLATFORM_KEY: &str = "platform";
const ID_KEY: &str = "id";
const NAME_KEY: &str = "name";

/// `(platform, id)` pair naming one recording target.
///
/// Both parts compare as plain, case-sensitive strings.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Identity {
    platform: String,
    id: String,
}

impl Identity {
    pub fn new(platform: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            platform: platform.into(),
            id: id.into(),
        }
    }

    pub fn platform(&self) -> &str {
        &self.platform
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Key under which this target's active stream is registered.
    ///
    /// Afreeca uses its player host; every other platform uses
    /// `https://{platform lowercased}.com/{id}`.
    pub fn stream_key(&self) -> String {
        if self.platform == "Afreeca" {
            format!("https://play.afreecatv.com/{}", self.id)
        } else {
            format!("https://{}.com/{}", self.platform.to_lowercase(), self.id)
        }
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.platform, self.id)
    }
}

/// The flat configuration document.
///
/// `user` entries stay raw until the reconciliation scan so that one bad
/// entry cannot invalidate the rest of the file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecorderConfig {
    /// Default proxy for every worker.
    #[serde(default)]
    pub proxy: Option<String>,
    /// Default output directory for every worker.
    #[serde(default)]
    pub output: Option<String>,
    pub user: Vec<Value>,
    /// Any other top-level keys, passed to workers untouched.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Fully merged configuration for one recording target.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedRecord {
    pub identity: Identity,
    pub name: String,
    /// Every key besides `platform`, `id` and `name`.
    pub options: Map<String, Value>,
}

impl ResolvedRecord {
    pub fn new(identity: Identity, name: impl Into<String>) -> Self {
        Self {
            identity,
            name: name.into(),
            options: Map::new(),
        }
    }

    pub fn with_option(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.options.insert(key.into(), value.into());
        self
    }

    /// Validate one raw `user` entry (at `index`) and resolve it.
    pub fn from_value(index: usize, value: &Value) -> Result<Self> {
        let entry = value
            .as_object()
            .ok_or_else(|| Error::validation(index, "entry must be an object"))?;

        let platform = match entry.get(PLATFORM_KEY) {
            Some(Value::String(p)) if !p.is_empty() => p.clone(),
            Some(Value::String(_)) => return Err(Error::validation(index, "'platform' is empty")),
            Some(_) => return Err(Error::validation(index, "'platform' must be a string")),
            None => return Err(Error::validation(index, "'platform' is required")),
        };

        let id = match entry.get(ID_KEY) {
            Some(Value::String(id)) if !id.is_empty() => id.clone(),
            Some(Value::String(_)) => return Err(Error::validation(index, "'id' is empty")),
            Some(Value::Number(n)) if n.is_i64() || n.is_u64() => n.to_string(),
            Some(_) => {
                return Err(Error::validation(
                    index,
                    "'id' must be a string or an integer",
                ));
            }
            None => return Err(Error::validation(index, "'id' is required")),
        };

        let name = match entry.get(NAME_KEY) {
            Some(Value::String(name)) => name.clone(),
            None | Some(Value::Null) => id.clone(),
            Some(other) => other.to_string(),
        };

        let options = entry
            .iter()
            .filter(|(key, _)| !matches!(key.as_str(), PLATFORM_KEY | ID_KEY | NAME_KEY))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();

        Ok(Self {
            identity: Identity::new(platform, id),
            name,
            options,
        })
    }

    /// String-valued option, if set.
    pub fn option_str(&self, key: &str) -> Option<&str> {
        self.options.get(key).and_then(Value::as_str)
    }
}

/// Identities wanted by the most recently loaded configuration, in
/// document order. Rebuilt from scratch on every pass.
#[derive(Debug, Clone, Default)]
pub struct DesiredSet {
    records: Vec<ResolvedRecord>,
    index: HashMap<Identity, usize>,
    rejected: usize,
}

impl DesiredSet {
    /// Scan the `user` list, skipping (and logging) invalid and duplicate
    /// entries.
    pub fn from_config(config: &RecorderConfig) -> Self {
        let mut set = Self::default();
        for (index, raw) in config.user.iter().enumerate() {
            match ResolvedRecord::from_value(index, raw) {
                Ok(record) => {
                    if !set.insert(record) {
                        set.rejected += 1;
                    }
                }
                Err(e) => {
                    error!(index, entry = %raw, error = %e, "Skipping invalid config entry");
                    set.rejected += 1;
                }
            }
        }
        set
    }

    /// First occurrence wins; returns false for a duplicate.
    fn insert(&mut self, record: ResolvedRecord) -> bool {
        if self.index.contains_key(&record.identity) {
            warn!(
                platform = %record.identity.platform(),
                id = %record.identity.id(),
                "Duplicate config entry ignored"
            );
            return false;
        }
        self.index
            .insert(record.identity.clone(), self.records.len());
        self.records.push(record);
        true
    }

    pub fn contains(&self, identity: &Identity) -> bool {
        self.index.contains_key(identity)
    }

    pub fn get(&self, identity: &Identity) -> Option<&ResolvedRecord> {
        self.index.get(identity).map(|&i| &self.records[i])
    }

    pub fn records(&self) -> &[ResolvedRecord] {
        &self.records
    }

    pub fn identities(&self) -> impl Iterator<Item = &Identity> {
        self.records.iter().map(|r| &r.identity)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Number of entries skipped as invalid or duplicate.
    pub fn rejected(&self) -> usize {
        self.rejected
    }
}
