//! Persistence medium port for the typed key/value store.
//!
//! The store core is medium-agnostic: it hands the medium pre-encoded
//! record bytes plus the type tag, and the medium persists them however the
//! platform requires. On ESP-IDF this is the NVS partition, with numerics
//! mapped to their native fixed-width slots; on the host it is a shared
//! in-memory map that survives store re-opens, so tests can simulate a
//! power cycle by constructing a second store over the same medium.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use crate::error::StoreError;
use crate::store::value::EntryType;

/// One persisted record as returned by [`StorageMedium::load_all`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub namespace: String,
    pub key: String,
    pub ty: EntryType,
    pub bytes: Vec<u8>,
}

/// Driven adapter: the durable backing for committed entries.
///
/// Writes MUST be atomic per record — no partial record survives power
/// loss. The ESP-IDF NVS API guarantees this natively; the in-memory
/// medium achieves it trivially.
pub trait StorageMedium: Send {
    /// Persist one record, replacing any previous value under the key.
    fn store(&mut self, namespace: &str, key: &str, ty: EntryType, bytes: &[u8])
    -> Result<(), StoreError>;

    /// Remove one record. Removing an absent record is not an error here;
    /// existence policy belongs to the store layer.
    fn erase(&mut self, namespace: &str, key: &str) -> Result<(), StoreError>;

    /// Remove every record in a namespace.
    fn erase_namespace(&mut self, namespace: &str) -> Result<(), StoreError>;

    /// Enumerate all persisted records. Called once at store construction.
    fn load_all(&self) -> Result<Vec<Record>, StoreError>;
}

// ── In-memory medium (host + tests) ───────────────────────────

/// Host-side medium. Clones share the same backing map, which is what lets
/// a test drop one `ConfigStore` and open another "after reboot".
#[derive(Clone, Default)]
pub struct MemoryMedium {
    cells: Arc<Mutex<BTreeMap<(String, String), (EntryType, Vec<u8>)>>>,
}

impl MemoryMedium {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StorageMedium for MemoryMedium {
    fn store(
        &mut self,
        namespace: &str,
        key: &str,
        ty: EntryType,
        bytes: &[u8],
    ) -> Result<(), StoreError> {
        self.cells
            .lock()
            .map_err(|_| StoreError::Io)?
            .insert((namespace.into(), key.into()), (ty, bytes.to_vec()));
        Ok(())
    }

    fn erase(&mut self, namespace: &str, key: &str) -> Result<(), StoreError> {
        self.cells
            .lock()
            .map_err(|_| StoreError::Io)?
            .remove(&(namespace.into(), key.into()));
        Ok(())
    }

    fn erase_namespace(&mut self, namespace: &str) -> Result<(), StoreError> {
        self.cells
            .lock()
            .map_err(|_| StoreError::Io)?
            .retain(|(ns, _), _| ns != namespace);
        Ok(())
    }

    fn load_all(&self) -> Result<Vec<Record>, StoreError> {
        Ok(self
            .cells
            .lock()
            .map_err(|_| StoreError::Io)?
            .iter()
            .map(|((ns, key), (ty, bytes))| Record {
                namespace: ns.clone(),
                key: key.clone(),
                ty: *ty,
                bytes: bytes.clone(),
            })
            .collect())
    }
}

// ── ESP-IDF NVS medium ────────────────────────────────────────

#[cfg(target_os = "espidf")]
pub use esp_nvs::NvsMedium;

#[cfg(target_os = "espidf")]
mod esp_nvs {
    use esp_idf_svc::sys::*;
    use log::{info, warn};

    use super::{Record, StorageMedium, StoreError};
    use crate::store::value::{EntryType, Value};

    /// NVS-backed medium. Numerics are stored through the native typed NVS
    /// setters so the on-flash layout matches the tag exactly; strings and
    /// blobs use `nvs_set_str`/`nvs_set_blob`.
    pub struct NvsMedium;

    impl NvsMedium {
        /// Initialise the NVS flash partition. On first boot or after a
        /// version mismatch the partition is erased and re-initialised.
        pub fn new() -> Result<Self, StoreError> {
            // SAFETY: nvs_flash_init / nvs_flash_erase are called from the
            // single main-task context before any concurrent NVS access.
            let ret = unsafe { nvs_flash_init() };
            if ret == ESP_ERR_NVS_NO_FREE_PAGES || ret == ESP_ERR_NVS_NEW_VERSION_FOUND {
                warn!("NVS: erasing and re-initialising flash partition");
                if unsafe { nvs_flash_erase() } != ESP_OK {
                    return Err(StoreError::Io);
                }
                if unsafe { nvs_flash_init() } != ESP_OK {
                    return Err(StoreError::Io);
                }
            } else if ret != ESP_OK {
                return Err(StoreError::Io);
            }
            info!("NvsMedium: flash partition ready");
            Ok(Self)
        }

        fn cstr_buf(s: &str) -> [u8; 16] {
            let mut buf = [0u8; 16];
            let bytes = s.as_bytes();
            let len = bytes.len().min(15);
            buf[..len].copy_from_slice(&bytes[..len]);
            buf
        }

        /// Open an NVS namespace, run a closure with the handle, then close.
        fn with_handle<F, T>(namespace: &str, write: bool, f: F) -> Result<T, StoreError>
        where
            F: FnOnce(nvs_handle_t) -> Result<T, i32>,
        {
            let ns = Self::cstr_buf(namespace);
            let mode = if write {
                nvs_open_mode_t_NVS_READWRITE
            } else {
                nvs_open_mode_t_NVS_READONLY
            };

            let mut handle: nvs_handle_t = 0;
            let ret = unsafe { nvs_open(ns.as_ptr() as *const _, mode, &mut handle) };
            if ret != ESP_OK {
                return Err(StoreError::Io);
            }
            let result = f(handle);
            unsafe {
                nvs_close(handle);
            }
            result.map_err(|_| StoreError::Io)
        }
    }

    impl StorageMedium for NvsMedium {
        fn store(
            &mut self,
            namespace: &str,
            key: &str,
            ty: EntryType,
            bytes: &[u8],
        ) -> Result<(), StoreError> {
            let value = Value::decode(ty, bytes).map_err(|_| StoreError::Io)?;
            Self::with_handle(namespace, true, |handle| {
                let k = Self::cstr_buf(key);
                let kp = k.as_ptr() as *const _;
                let ret = unsafe {
                    match &value {
                        Value::U8(v) => nvs_set_u8(handle, kp, *v),
                        Value::I8(v) => nvs_set_i8(handle, kp, *v),
                        Value::U16(v) => nvs_set_u16(handle, kp, *v),
                        Value::I16(v) => nvs_set_i16(handle, kp, *v),
                        Value::U32(v) => nvs_set_u32(handle, kp, *v),
                        Value::I32(v) => nvs_set_i32(handle, kp, *v),
                        Value::U64(v) => nvs_set_u64(handle, kp, *v),
                        Value::I64(v) => nvs_set_i64(handle, kp, *v),
                        Value::Str(s) => {
                            let mut z = s.clone().into_bytes();
                            z.push(0);
                            nvs_set_str(handle, kp, z.as_ptr() as *const _)
                        }
                        Value::Blob(b) => {
                            nvs_set_blob(handle, kp, b.as_ptr() as *const _, b.len())
                        }
                    }
                };
                if ret != ESP_OK {
                    return Err(ret);
                }
                let ret = unsafe { nvs_commit(handle) };
                if ret != ESP_OK {
                    return Err(ret);
                }
                Ok(())
            })
        }

        fn erase(&mut self, namespace: &str, key: &str) -> Result<(), StoreError> {
            Self::with_handle(namespace, true, |handle| {
                let k = Self::cstr_buf(key);
                let ret = unsafe { nvs_erase_key(handle, k.as_ptr() as *const _) };
                if ret != ESP_OK && ret != ESP_ERR_NVS_NOT_FOUND {
                    return Err(ret);
                }
                let ret = unsafe { nvs_commit(handle) };
                if ret != ESP_OK {
                    return Err(ret);
                }
                Ok(())
            })
        }

        fn erase_namespace(&mut self, namespace: &str) -> Result<(), StoreError> {
            Self::with_handle(namespace, true, |handle| {
                let ret = unsafe { nvs_erase_all(handle) };
                if ret != ESP_OK {
                    return Err(ret);
                }
                let ret = unsafe { nvs_commit(handle) };
                if ret != ESP_OK {
                    return Err(ret);
                }
                Ok(())
            })
        }

        fn load_all(&self) -> Result<Vec<Record>, StoreError> {
            let mut records = Vec::new();
            let mut it: nvs_iterator_t = core::ptr::null_mut();
            // SAFETY: iterator API per ESP-IDF contract; released below.
            let mut res = unsafe {
                nvs_entry_find(
                    b"nvs\0".as_ptr() as *const _,
                    core::ptr::null(),
                    nvs_type_t_NVS_TYPE_ANY,
                    &mut it,
                )
            };
            while res == ESP_OK {
                let mut info: nvs_entry_info_t = Default::default();
                unsafe {
                    nvs_entry_info(it, &mut info);
                }
                if let Some(record) = read_entry(&info) {
                    records.push(record);
                }
                res = unsafe { nvs_entry_next(&mut it) };
            }
            unsafe {
                nvs_release_iterator(it);
            }
            Ok(records)
        }
    }

    fn nul_str(raw: &[core::ffi::c_char]) -> String {
        let bytes: Vec<u8> = raw
            .iter()
            .take_while(|c| **c != 0)
            .map(|c| *c as u8)
            .collect();
        String::from_utf8_lossy(&bytes).into_owned()
    }

    fn tag_of(raw: nvs_type_t) -> Option<EntryType> {
        Some(match raw {
            x if x == nvs_type_t_NVS_TYPE_U8 => EntryType::U8,
            x if x == nvs_type_t_NVS_TYPE_I8 => EntryType::I8,
            x if x == nvs_type_t_NVS_TYPE_U16 => EntryType::U16,
            x if x == nvs_type_t_NVS_TYPE_I16 => EntryType::I16,
            x if x == nvs_type_t_NVS_TYPE_U32 => EntryType::U32,
            x if x == nvs_type_t_NVS_TYPE_I32 => EntryType::I32,
            x if x == nvs_type_t_NVS_TYPE_U64 => EntryType::U64,
            x if x == nvs_type_t_NVS_TYPE_I64 => EntryType::I64,
            x if x == nvs_type_t_NVS_TYPE_STR => EntryType::Str,
            x if x == nvs_type_t_NVS_TYPE_BLOB => EntryType::Blob,
            _ => return None,
        })
    }

    fn read_entry(info: &nvs_entry_info_t) -> Option<Record> {
        let namespace = nul_str(&info.namespace_name);
        let key = nul_str(&info.key);
        let ty = tag_of(info.type_)?;

        let bytes = NvsMedium::with_handle(&namespace, false, |handle| {
            let k = NvsMedium::cstr_buf(&key);
            let kp = k.as_ptr() as *const _;
            unsafe {
                match ty {
                    EntryType::U8 => {
                        let mut v = 0u8;
                        err_check(nvs_get_u8(handle, kp, &mut v))?;
                        Ok(v.to_le_bytes().to_vec())
                    }
                    EntryType::I8 => {
                        let mut v = 0i8;
                        err_check(nvs_get_i8(handle, kp, &mut v))?;
                        Ok(v.to_le_bytes().to_vec())
                    }
                    EntryType::U16 => {
                        let mut v = 0u16;
                        err_check(nvs_get_u16(handle, kp, &mut v))?;
                        Ok(v.to_le_bytes().to_vec())
                    }
                    EntryType::I16 => {
                        let mut v = 0i16;
                        err_check(nvs_get_i16(handle, kp, &mut v))?;
                        Ok(v.to_le_bytes().to_vec())
                    }
                    EntryType::U32 => {
                        let mut v = 0u32;
                        err_check(nvs_get_u32(handle, kp, &mut v))?;
                        Ok(v.to_le_bytes().to_vec())
                    }
                    EntryType::I32 => {
                        let mut v = 0i32;
                        err_check(nvs_get_i32(handle, kp, &mut v))?;
                        Ok(v.to_le_bytes().to_vec())
                    }
                    EntryType::U64 => {
                        let mut v = 0u64;
                        err_check(nvs_get_u64(handle, kp, &mut v))?;
                        Ok(v.to_le_bytes().to_vec())
                    }
                    EntryType::I64 => {
                        let mut v = 0i64;
                        err_check(nvs_get_i64(handle, kp, &mut v))?;
                        Ok(v.to_le_bytes().to_vec())
                    }
                    EntryType::Str => {
                        let mut size: usize = 0;
                        err_check(nvs_get_str(handle, kp, core::ptr::null_mut(), &mut size))?;
                        let mut buf = vec![0u8; size];
                        err_check(nvs_get_str(handle, kp, buf.as_mut_ptr() as *mut _, &mut size))?;
                        while buf.last() == Some(&0) {
                            buf.pop();
                        }
                        Ok(buf)
                    }
                    EntryType::Blob => {
                        let mut size: usize = 0;
                        err_check(nvs_get_blob(handle, kp, core::ptr::null_mut(), &mut size))?;
                        let mut buf = vec![0u8; size];
                        err_check(nvs_get_blob(handle, kp, buf.as_mut_ptr() as *mut _, &mut size))?;
                        Ok(buf)
                    }
                    EntryType::Any => Err(ESP_FAIL),
                }
            }
        })
        .ok()?;

        Some(Record {
            namespace,
            key,
            ty,
            bytes,
        })
    }

    fn err_check(ret: i32) -> Result<(), i32> {
        if ret == ESP_OK { Ok(()) } else { Err(ret) }
    }
}

// ── Tests ─────────────────────────────────────────────────────
