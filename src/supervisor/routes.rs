//! Config/update HTTP surface: byte-in/byte-out handlers.
//!
//! The HTTP server itself lives outside this crate; an external layer
//! routes requests here and maps [`ApiError`] to a generic server-error
//! response carrying the message. Bodies are JSON `{type, value}` with
//! blob values base64-encoded.

use serde::Deserialize;
use serde_json::{Map, Number, json};

use crate::error::StoreError;
use crate::store::medium::StorageMedium;
use crate::store::value::{EntryType, Value, base64_decode, base64_encode};
use crate::store::{ConfigStore, OpenMode};

// ── API error ─────────────────────────────────────────────────

/// Human-readable failure carried back to the HTTP layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiError {
    pub message: String,
}

impl ApiError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl core::fmt::Display for ApiError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.message)
    }
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        Self::new(match e {
            StoreError::NotFound => "key or namespace not found",
            StoreError::TypeMismatch => "type does not match stored entry",
            StoreError::Encoding => "failed to decode base64 value",
            StoreError::Io => "persistence I/O error",
            StoreError::ReadOnly => "namespace opened read-only",
            StoreError::Closed => "store handle closed",
            StoreError::UnknownType => "unknown type",
            StoreError::InvalidValue => "value out of range for type",
        })
    }
}

// ── Request bodies ────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct KeyBody {
    #[serde(rename = "type")]
    ty: String,
    value: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct UpdateBody {
    url: String,
}

// ── Handlers ──────────────────────────────────────────────────

/// `POST /config/set-key?namespace=..&key=..` with `{type, value}`.
pub fn set_key<M: StorageMedium>(
    store: &ConfigStore<M>,
    namespace: &str,
    key: &str,
    body: &[u8],
) -> Result<String, ApiError> {
    let body: KeyBody =
        serde_json::from_slice(body).map_err(|_| ApiError::new("failed to parse JSON"))?;
    let ty = EntryType::from_name(&body.ty)?;

    let value = match &body.value {
        serde_json::Value::Number(n) => {
            if !ty.is_integer() {
                return Err(ApiError::new("invalid type for integer value"));
            }
            let widened = n
                .as_i64()
                .map(i128::from)
                .or_else(|| n.as_u64().map(i128::from))
                .ok_or_else(|| ApiError::new("value is not an integer"))?;
            Value::from_integer(ty, widened)?
        }
        serde_json::Value::String(s) => match ty {
            EntryType::Str => Value::Str(s.clone()),
            EntryType::Blob => Value::Blob(base64_decode(s)?),
            _ => return Err(ApiError::new("invalid type for string value")),
        },
        _ => return Err(ApiError::new("failed to parse value")),
    };

    let mut handle = store.open(namespace, OpenMode::ReadWrite)?;
    handle.set(key, value)?;
    handle.commit()?;
    handle.close();
    Ok("Configuration set\n".to_string())
}

/// `GET /config/get-key?namespace=..&key=..` → `{type, value}`.
pub fn get_key<M: StorageMedium>(
    store: &ConfigStore<M>,
    namespace: &str,
    key: &str,
) -> Result<String, ApiError> {
    let handle = store.open(namespace, OpenMode::ReadOnly)?;
    let (ty, value) = handle.get(key)?;
    Ok(json_node(ty, &value).to_string())
}

/// `GET /config/get-all` → `{namespace: {key: {type, value}}}`.
pub fn get_all<M: StorageMedium>(store: &ConfigStore<M>) -> Result<String, ApiError> {
    let mut root = Map::new();
    for entry in store.entries(None) {
        let handle = store.open(&entry.namespace, OpenMode::ReadOnly)?;
        let (ty, value) = handle.get(&entry.key)?;
        root.entry(entry.namespace.clone())
            .or_insert_with(|| serde_json::Value::Object(Map::new()))
            .as_object_mut()
            .ok_or_else(|| ApiError::new("internal: namespace node not an object"))?
            .insert(entry.key.clone(), json_node(ty, &value));
    }
    Ok(serde_json::Value::Object(root).to_string())
}

/// `DELETE /config/delete-key?namespace=..&key=..`. Immediate, no commit.
pub fn delete_key<M: StorageMedium>(
    store: &ConfigStore<M>,
    namespace: &str,
    key: &str,
) -> Result<String, ApiError> {
    let mut handle = store.open(namespace, OpenMode::ReadWrite)?;
    handle.erase_key(key)?;
    Ok("Key Deleted\n".to_string())
}

/// `DELETE /config/delete-namespace?namespace=..`. Immediate, no commit.
pub fn delete_namespace<M: StorageMedium>(
    store: &ConfigStore<M>,
    namespace: &str,
) -> Result<String, ApiError> {
    let mut handle = store.open(namespace, OpenMode::ReadWrite)?;
    handle.erase_all()?;
    Ok("Namespace Deleted\n".to_string())
}

/// Parse the `POST /firmware-upgrade` body `{url}`.
pub fn parse_update_request(body: &[u8]) -> Result<String, ApiError> {
    let body: UpdateBody =
        serde_json::from_slice(body).map_err(|_| ApiError::new("failed to parse JSON"))?;
    if body.url.is_empty() {
        return Err(ApiError::new("failed to parse URL"));
    }
    Ok(body.url)
}

// ── JSON encoding ─────────────────────────────────────────────

fn json_node(ty: EntryType, value: &Value) -> serde_json::Value {
    let encoded = match value {
        Value::Str(s) => serde_json::Value::String(s.clone()),
        Value::Blob(b) => serde_json::Value::String(base64_encode(b)),
        _ => {
            // Integers: the widened register always fits i64 or u64.
            let widened = value.as_integer().unwrap_or(0);
            if let Ok(v) = i64::try_from(widened) {
                serde_json::Value::Number(Number::from(v))
            } else {
                serde_json::Value::Number(Number::from(widened as u64))
            }
        }
    };
    json!({ "type": ty.name(), "value": encoded })
}

// ── Tests ─────────────────────────────────────────────────────
