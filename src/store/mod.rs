//! Typed persistent key/value store with explicit commit semantics.
//!
//! Entries are identified by (namespace, key) and carry a type tag from
//! the fixed set in [`value::EntryType`]. Mutations buffer in the opening
//! handle and become durable only on [`NamespaceHandle::commit`]; erase
//! operations bypass the buffer and hit the medium immediately. That
//! asymmetry mirrors the behaviour of the underlying NVS API and is relied
//! on by the config HTTP surface (delete routes reply without committing).
//!
//! Handles are not safe for concurrent writers on the same namespace;
//! callers serialise set/commit pairs and keep open-use-close short-lived,
//! never held across blocking operations.

pub mod medium;
pub mod value;

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use log::warn;

use crate::error::StoreError;
use self::medium::StorageMedium;
use self::value::{EntryType, Value};

// ── Open mode ─────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    ReadOnly,
    ReadWrite,
}

// ── Store ─────────────────────────────────────────────────────

struct Shared<M: StorageMedium> {
    medium: M,
    /// Committed view, mirroring the medium. Loaded once at construction.
    entries: BTreeMap<(String, String), Value>,
}

/// The store itself. Cheap to clone; clones share the committed view and
/// the medium.
pub struct ConfigStore<M: StorageMedium> {
    shared: Arc<Mutex<Shared<M>>>,
}

impl<M: StorageMedium> Clone for ConfigStore<M> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<M: StorageMedium> ConfigStore<M> {
    /// Open the store over a medium, loading every committed record.
    /// Records that fail to decode under their stored tag are skipped with
    /// a warning rather than poisoning the whole partition.
    pub fn new(medium: M) -> Result<Self, StoreError> {
        let records = medium.load_all()?;
        let mut entries = BTreeMap::new();
        for record in records {
            match Value::decode(record.ty, &record.bytes) {
                Ok(v) => {
                    entries.insert((record.namespace, record.key), v);
                }
                Err(_) => {
                    warn!(
                        "store: skipping corrupt record {}:{} ({})",
                        record.namespace, record.key, record.ty
                    );
                }
            }
        }
        Ok(Self {
            shared: Arc::new(Mutex::new(Shared { medium, entries })),
        })
    }

    /// Open a namespace. Read-only opens require the namespace to already
    /// hold at least one committed entry; read-write opens create it
    /// implicitly on first commit.
    pub fn open(
        &self,
        namespace: &str,
        mode: OpenMode,
    ) -> Result<NamespaceHandle<M>, StoreError> {
        if mode == OpenMode::ReadOnly {
            let shared = self.shared.lock().map_err(|_| StoreError::Io)?;
            let exists = shared.entries.keys().any(|(ns, _)| ns == namespace);
            if !exists {
                return Err(StoreError::NotFound);
            }
        }
        Ok(NamespaceHandle {
            shared: Arc::clone(&self.shared),
            namespace: namespace.to_string(),
            mode,
            pending: Vec::new(),
            closed: false,
        })
    }

    /// One-shot enumeration of committed entries, optionally filtered by
    /// namespace. The iterator is a point-in-time snapshot; request a
    /// fresh one to re-scan.
    pub fn entries(&self, namespace_filter: Option<&str>) -> EntryIter {
        let items = match self.shared.lock() {
            Ok(shared) => shared
                .entries
                .iter()
                .filter(|((ns, _), _)| namespace_filter.is_none_or(|f| f == ns.as_str()))
                .map(|((ns, key), v)| EntryInfo {
                    namespace: ns.clone(),
                    key: key.clone(),
                    ty: v.entry_type(),
                })
                .collect(),
            Err(_) => Vec::new(),
        };
        EntryIter {
            items: items.into_iter(),
        }
    }
}

// ── Entry enumeration ─────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryInfo {
    pub namespace: String,
    pub key: String,
    pub ty: EntryType,
}

/// Finite, non-restartable entry iterator.
pub struct EntryIter {
    items: std::vec::IntoIter<EntryInfo>,
}

impl Iterator for EntryIter {
    type Item = EntryInfo;

    fn next(&mut self) -> Option<EntryInfo> {
        self.items.next()
    }
}

// ── Namespace handle ──────────────────────────────────────────

/// A session on one namespace. Writes buffer here until `commit`; reads
/// see the handle's own pending writes first, then the committed view.
pub struct NamespaceHandle<M: StorageMedium> {
    shared: Arc<Mutex<Shared<M>>>,
    namespace: String,
    mode: OpenMode,
    pending: Vec<(String, Value)>,
    closed: bool,
}

impl<M: StorageMedium> NamespaceHandle<M> {
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    fn check_open(&self) -> Result<(), StoreError> {
        if self.closed {
            Err(StoreError::Closed)
        } else {
            Ok(())
        }
    }

    fn check_writable(&self) -> Result<(), StoreError> {
        self.check_open()?;
        if self.mode == OpenMode::ReadOnly {
            Err(StoreError::ReadOnly)
        } else {
            Ok(())
        }
    }

    /// Read a key with its stored type.
    pub fn get(&self, key: &str) -> Result<(EntryType, Value), StoreError> {
        self.check_open()?;
        if let Some((_, v)) = self.pending.iter().rev().find(|(k, _)| k == key) {
            return Ok((v.entry_type(), v.clone()));
        }
        let shared = self.shared.lock().map_err(|_| StoreError::Io)?;
        shared
            .entries
            .get(&(self.namespace.clone(), key.to_string()))
            .map(|v| (v.entry_type(), v.clone()))
            .ok_or(StoreError::NotFound)
    }

    /// Read a key under an expected type. `EntryType::Any` resolves to the
    /// stored type; anything else must match exactly — the stored bytes
    /// are never reinterpreted.
    pub fn get_as(&self, key: &str, ty: EntryType) -> Result<Value, StoreError> {
        let (stored, v) = self.get(key)?;
        if ty != EntryType::Any && ty != stored {
            return Err(StoreError::TypeMismatch);
        }
        Ok(v)
    }

    /// Convenience: read a UTF-8 string entry.
    pub fn get_string(&self, key: &str) -> Result<String, StoreError> {
        match self.get_as(key, EntryType::Str)? {
            Value::Str(s) => Ok(s),
            _ => Err(StoreError::TypeMismatch),
        }
    }

    /// Convenience: read any integer entry into the widened register.
    pub fn get_integer(&self, key: &str) -> Result<i128, StoreError> {
        let (_, v) = self.get(key)?;
        v.as_integer().ok_or(StoreError::TypeMismatch)
    }

    /// Buffer a write. Durable only after [`commit`](Self::commit).
    pub fn set(&mut self, key: &str, value: Value) -> Result<(), StoreError> {
        self.check_writable()?;
        self.pending.retain(|(k, _)| k != key);
        self.pending.push((key.to_string(), value));
        Ok(())
    }

    /// Flush every pending write to the medium, in set order. Each buffered
    /// mutation is persisted at most once: a successful commit drains the
    /// buffer, and a second commit is a no-op. On medium failure the
    /// unflushed tail (failed write included) stays buffered.
    pub fn commit(&mut self) -> Result<(), StoreError> {
        self.check_open()?;
        let mut shared = self.shared.lock().map_err(|_| StoreError::Io)?;
        while !self.pending.is_empty() {
            let (key, value) = self.pending[0].clone();
            let bytes = value.encode();
            if let Err(e) =
                shared
                    .medium
                    .store(&self.namespace, &key, value.entry_type(), &bytes)
            {
                return Err(e);
            }
            shared
                .entries
                .insert((self.namespace.clone(), key), value);
            self.pending.remove(0);
        }
        Ok(())
    }

    /// Remove one key. Takes effect immediately — no commit step — and
    /// also drops any pending write buffered under the same key.
    pub fn erase_key(&mut self, key: &str) -> Result<(), StoreError> {
        self.check_writable()?;
        let had_pending = self.pending.iter().any(|(k, _)| k == key);
        self.pending.retain(|(k, _)| k != key);

        let mut shared = self.shared.lock().map_err(|_| StoreError::Io)?;
        let composite = (self.namespace.clone(), key.to_string());
        if shared.entries.contains_key(&composite) {
            shared.medium.erase(&self.namespace, key)?;
            shared.entries.remove(&composite);
            Ok(())
        } else if had_pending {
            Ok(())
        } else {
            Err(StoreError::NotFound)
        }
    }

    /// Remove every key in the namespace. Immediate, like `erase_key`.
    pub fn erase_all(&mut self) -> Result<(), StoreError> {
        self.check_writable()?;
        self.pending.clear();
        let mut shared = self.shared.lock().map_err(|_| StoreError::Io)?;
        shared.medium.erase_namespace(&self.namespace)?;
        let ns = self.namespace.clone();
        shared.entries.retain(|(e_ns, _), _| *e_ns != ns);
        Ok(())
    }

    /// Release the handle, discarding uncommitted writes. Idempotent:
    /// closing twice is a no-op, not an error.
    pub fn close(&mut self) {
        self.pending.clear();
        self.closed = true;
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Number of buffered, not-yet-durable writes.
    pub fn pending_writes(&self) -> usize {
        self.pending.len()
    }
}

// ── Tests ─────────────────────────────────────────────────────
