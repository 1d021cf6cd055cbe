//! Global → group → user resolution.

use std::collections::HashMap;
use std::fmt;

use serde_json::{Map, Value};
use tracing::{debug, error, warn};

use crate::error::CompileError;
use crate::{GROUPS_KEY, USER_KEY, USERS_KEY};

const PLATFORM_KEY: &str = "platform";
const ID_KEY: &str = "id";
const NAME_KEY: &str = "name";
const PROXY_KEY: &str = "proxy";
const OUTPUT_KEY: &str = "output";

/// Position of a user entry in the hierarchical document (both 1-based).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Location {
    pub group: usize,
    pub user: usize,
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "groups[{}].users[{}]", self.group, self.user)
    }
}

/// The flat document produced by a successful compilation.
///
/// Key order is significant and preserved: `proxy`, `output`, `user`, then
/// any other global keys in document order.
#[derive(Debug, Clone, PartialEq)]
pub struct FlatDocument(Map<String, Value>);

impl FlatDocument {
    /// Resolved user records, in document order.
    pub fn users(&self) -> &[Value] {
        self.0
            .get(USER_KEY)
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.0)
    }

    /// Serialize with two-space indentation, leaving non-ASCII text as is.
    pub fn to_json_pretty(&self) -> Result<String, CompileError> {
        Ok(serde_json::to_string_pretty(&self.0)?)
    }
}

/// Parse a YAML document and compile it.
pub fn compile_str(text: &str) -> Result<FlatDocument, CompileError> {
    let doc: Value = serde_yaml::from_str(text)?;
    compile(&doc)
}

/// Compile an already parsed hierarchical document.
///
/// Fails on the second occurrence of any `(platform, id)` pair; nothing is
/// returned for a partially valid document.
pub fn compile(doc: &Value) -> Result<FlatDocument, CompileError> {
    let root = doc
        .as_object()
        .ok_or_else(|| CompileError::schema("document root must be a mapping"))?;

    if root.contains_key(USER_KEY) {
        return Err(CompileError::schema(format!(
            "top-level key '{USER_KEY}' is reserved for the compiled user list"
        )));
    }

    let global: Map<String, Value> = root
        .iter()
        .filter(|(key, _)| key.as_str() != GROUPS_KEY)
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect();

    let groups = sequence(root.get(GROUPS_KEY), || format!("'{GROUPS_KEY}'"))?;

    let mut seen: HashMap<(String, String), Location> = HashMap::new();
    let mut users = Vec::new();

    for (group_idx, group) in groups.iter().enumerate() {
        let group_no = group_idx + 1;
        let group = group
            .as_object()
            .ok_or_else(|| CompileError::schema(format!("groups[{group_no}] must be a mapping")))?;

        let platform = group.get(PLATFORM_KEY).cloned().unwrap_or(Value::Null);
        let group_settings: Map<String, Value> = group
            .iter()
            .filter(|(key, _)| !matches!(key.as_str(), PLATFORM_KEY | USERS_KEY))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();

        let members = sequence(group.get(USERS_KEY), || {
            format!("groups[{group_no}].{USERS_KEY}")
        })?;

        for (user_idx, user) in members.iter().enumerate() {
            let location = Location {
                group: group_no,
                user: user_idx + 1,
            };
            let user = user
                .as_object()
                .ok_or_else(|| CompileError::schema(format!("{location} must be a mapping")))?;

            let id = user.get(ID_KEY).cloned().unwrap_or(Value::Null);
            let key = (render(&platform), render(&id));

            if let Some(first) = seen.get(&key) {
                error!(
                    platform = %key.0,
                    id = %key.1,
                    first = %first,
                    duplicate = %location,
                    "Duplicate user in hierarchical config"
                );
                return Err(CompileError::DuplicateIdentity {
                    platform: key.0,
                    id: key.1,
                    first: *first,
                    duplicate: location,
                });
            }
            seen.insert(key, location);

            let record = resolve_user(&global, &group_settings, &platform, id, user, location);
            users.push(Value::Object(record));
        }
    }

    debug!(users = users.len(), groups = groups.len(), "Compiled hierarchical config");

    let mut flat = Map::new();
    flat.insert(
        PROXY_KEY.to_string(),
        global.get(PROXY_KEY).cloned().unwrap_or(Value::Null),
    );
    flat.insert(
        OUTPUT_KEY.to_string(),
        global.get(OUTPUT_KEY).cloned().unwrap_or(Value::Null),
    );
    flat.insert(USER_KEY.to_string(), Value::Array(users));
    for (key, value) in &global {
        if !matches!(key.as_str(), PROXY_KEY | OUTPUT_KEY) {
            flat.insert(key.clone(), value.clone());
        }
    }

    Ok(FlatDocument(flat))
}

/// Build one flat user record.
///
/// A user value survives only if it differs from what the user would inherit
/// (group value, else global value). A group value survives only if the record
/// does not already carry the key and it differs from the global value.
fn resolve_user(
    global: &Map<String, Value>,
    group: &Map<String, Value>,
    platform: &Value,
    id: Value,
    user: &Map<String, Value>,
    location: Location,
) -> Map<String, Value> {
    let mut record = Map::new();
    let name = user.get(NAME_KEY).cloned().unwrap_or_else(|| id.clone());
    record.insert(PLATFORM_KEY.to_string(), platform.clone());
    record.insert(ID_KEY.to_string(), id);
    record.insert(NAME_KEY.to_string(), name);

    for (key, value) in user {
        match key.as_str() {
            ID_KEY | NAME_KEY => continue,
            PLATFORM_KEY => {
                warn!(%location, "Ignoring user-level 'platform'; the group decides the platform");
                continue;
            }
            _ => {}
        }

        let inherited = group.get(key).or_else(|| global.get(key));
        if inherited != Some(value) {
            record.insert(key.clone(), value.clone());
        }
    }

    for (key, value) in group {
        if record.contains_key(key) {
            continue;
        }
        if global.get(key) != Some(value) {
            record.insert(key.clone(), value.clone());
        }
    }

    record
}

/// Read an optional sequence; absent or null is empty.
fn sequence(value: Option<&Value>, what: impl FnOnce() -> String) -> Result<&[Value], CompileError> {
    match value {
        None | Some(Value::Null) => Ok(&[]),
        Some(Value::Array(items)) => Ok(items),
        Some(_) => Err(CompileError::schema(format!("{} must be a sequence", what()))),
    }
}

/// Identity component as the reconciler sees it: strings verbatim, anything
/// else in its JSON rendering (so `123` and `"123"` are the same user).
fn render(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
