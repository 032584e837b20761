//! Keyed bucket abstraction.
//!
//! All durable state lives in named KV buckets. The [`KeyValue`] trait is
//! the seam between the engine and the substrate: production uses
//! [`JetStreamBucket`] over NATS JetStream KV; tests and embedded use run
//! [`MemoryBucket`] so nothing needs a server.
//!
//! Writes to the same key are serialised through revision-checked updates;
//! set-valued index entries are mutated via [`modify_set`], a bounded
//! compare-and-swap loop.

use std::collections::{BTreeSet, HashMap};
use std::sync::Mutex;

use async_trait::async_trait;
use futures::TryStreamExt;

use crate::error::StoreError;

/// Upper bound on compare-and-swap retries before a write is reported as a
/// transient failure.
const MAX_CAS_ATTEMPTS: usize = 16;

/// A named bucket of keyed JSON records.
#[async_trait]
pub trait KeyValue: Send + Sync {
    /// The bucket name.
    fn bucket(&self) -> &str;

    /// Fetch the value at `key`, if present.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError>;

    /// Fetch the value and its revision, if present.
    async fn entry(&self, key: &str) -> Result<Option<(Vec<u8>, u64)>, StoreError>;

    /// Write unconditionally; returns the new revision.
    async fn put(&self, key: &str, value: Vec<u8>) -> Result<u64, StoreError>;

    /// Write only if the key is absent.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Conflict`] when the key already exists.
    async fn create(&self, key: &str, value: Vec<u8>) -> Result<u64, StoreError>;

    /// Write only if the stored revision matches.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Conflict`] on a revision mismatch.
    async fn update(&self, key: &str, value: Vec<u8>, revision: u64) -> Result<u64, StoreError>;

    /// Remove the key. Removing an absent key is not an error.
    async fn delete(&self, key: &str) -> Result<(), StoreError>;

    /// All live keys.
    async fn keys(&self) -> Result<Vec<String>, StoreError>;

    /// Live keys starting with `prefix`.
    async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        Ok(self
            .keys()
            .await?
            .into_iter()
            .filter(|k| k.starts_with(prefix))
            .collect())
    }

    /// Remove every key in the bucket.
    async fn purge_all(&self) -> Result<(), StoreError> {
        for key in self.keys().await? {
            self.delete(&key).await?;
        }
        Ok(())
    }
}

/// Add and remove members of a set-valued entry with a bounded CAS loop.
///
/// The stored value is a sorted JSON array of strings. The entry is deleted
/// when the set becomes empty. Idempotent under replay: re-applying the same
/// mutation is a no-op.
///
/// # Errors
///
/// Propagates backend errors; reports a transient failure when the CAS loop
/// exhausts its attempts.
pub async fn modify_set(
    bucket: &dyn KeyValue,
    key: &str,
    add: &[String],
    remove: &[String],
) -> Result<(), StoreError> {
    for _ in 0..MAX_CAS_ATTEMPTS {
        match bucket.entry(key).await? {
            Some((bytes, revision)) => {
                let mut members: BTreeSet<String> =
                    serde_json::from_slice(&bytes).map_err(|source| StoreError::Corrupt {
                        bucket: bucket.bucket().to_string(),
                        key: key.to_string(),
                        source,
                    })?;
                let before = members.clone();
                for m in remove {
                    members.remove(m);
                }
                for m in add {
                    members.insert(m.clone());
                }
                if members == before {
                    return Ok(());
                }
                if members.is_empty() {
                    bucket.delete(key).await?;
                    return Ok(());
                }
                let value = serde_json::to_vec(&members).map_err(StoreError::Encode)?;
                match bucket.update(key, value, revision).await {
                    Ok(_) => return Ok(()),
                    Err(StoreError::Conflict { .. }) => continue,
                    Err(e) => return Err(e),
                }
            }
            None => {
                if add.is_empty() {
                    return Ok(());
                }
                let members: BTreeSet<String> = add.iter().cloned().collect();
                let value = serde_json::to_vec(&members).map_err(StoreError::Encode)?;
                match bucket.create(key, value).await {
                    Ok(_) => return Ok(()),
                    Err(StoreError::Conflict { .. }) => continue,
                    Err(e) => return Err(e),
                }
            }
        }
    }
    Err(StoreError::backend(
        bucket.bucket(),
        format!("cas retries exhausted for key {key:?}"),
    ))
}

/// Read a set-valued entry as a sorted member list.
///
/// # Errors
///
/// Returns [`StoreError::Corrupt`] when the stored value is not a string
/// array.
pub async fn read_set(bucket: &dyn KeyValue, key: &str) -> Result<Vec<String>, StoreError> {
    match bucket.get(key).await? {
        Some(bytes) => {
            let members: BTreeSet<String> =
                serde_json::from_slice(&bytes).map_err(|source| StoreError::Corrupt {
                    bucket: bucket.bucket().to_string(),
                    key: key.to_string(),
                    source,
                })?;
            Ok(members.into_iter().collect())
        }
        None => Ok(Vec::new()),
    }
}

// ── In-memory implementation ────────────────────────────────────────────────

/// An in-memory bucket with the same revision semantics as JetStream KV.
///
/// Used by tests and embedded runs; nothing persists across process exit.
#[derive(Debug, Default)]
pub struct MemoryBucket {
    name: String,
    inner: Mutex<MemoryInner>,
}

#[derive(Debug, Default)]
struct MemoryInner {
    entries: HashMap<String, (Vec<u8>, u64)>,
    next_revision: u64,
}

impl MemoryBucket {
    /// An empty named bucket.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            inner: Mutex::new(MemoryInner {
                entries: HashMap::new(),
                next_revision: 1,
            }),
        }
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, MemoryInner>, StoreError> {
        self.inner
            .lock()
            .map_err(|_| StoreError::backend(&self.name, "lock poisoned"))
    }
}

#[async_trait]
impl KeyValue for MemoryBucket {
    fn bucket(&self) -> &str {
        &self.name
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.lock()?.entries.get(key).map(|(v, _)| v.clone()))
    }

    async fn entry(&self, key: &str) -> Result<Option<(Vec<u8>, u64)>, StoreError> {
        Ok(self.lock()?.entries.get(key).cloned())
    }

    async fn put(&self, key: &str, value: Vec<u8>) -> Result<u64, StoreError> {
        let mut inner = self.lock()?;
        let revision = inner.next_revision;
        inner.next_revision += 1;
        inner.entries.insert(key.to_string(), (value, revision));
        Ok(revision)
    }

    async fn create(&self, key: &str, value: Vec<u8>) -> Result<u64, StoreError> {
        let mut inner = self.lock()?;
        if inner.entries.contains_key(key) {
            return Err(StoreError::Conflict {
                bucket: self.name.clone(),
                key: key.to_string(),
            });
        }
        let revision = inner.next_revision;
        inner.next_revision += 1;
        inner.entries.insert(key.to_string(), (value, revision));
        Ok(revision)
    }

    async fn update(&self, key: &str, value: Vec<u8>, revision: u64) -> Result<u64, StoreError> {
        let mut inner = self.lock()?;
        match inner.entries.get(key) {
            Some((_, stored)) if *stored == revision => {
                let next = inner.next_revision;
                inner.next_revision += 1;
                inner.entries.insert(key.to_string(), (value, next));
                Ok(next)
            }
            _ => Err(StoreError::Conflict {
                bucket: self.name.clone(),
                key: key.to_string(),
            }),
        }
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.lock()?.entries.remove(key);
        Ok(())
    }

    async fn keys(&self) -> Result<Vec<String>, StoreError> {
        let mut keys: Vec<String> = self.lock()?.entries.keys().cloned().collect();
        keys.sort();
        Ok(keys)
    }
}

// ── JetStream implementation ────────────────────────────────────────────────

/// Characters NATS KV accepts in keys. Everything else is escaped.
fn key_byte_allowed(b: u8) -> bool {
    b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_' | b'/' | b'.')
}

/// Escape a logical key into the NATS KV key charset.
///
/// Bytes outside `[A-Za-z0-9-_/.]` (and the escape byte `=`) become `=XX`
/// with uppercase hex. The mapping is byte-wise and prefix-preserving, so
/// prefix scans work on escaped keys.
#[must_use]
pub fn escape_key(logical: &str) -> String {
    let mut out = String::with_capacity(logical.len());
    for &b in logical.as_bytes() {
        if key_byte_allowed(b) {
            out.push(b as char);
        } else {
            out.push_str(&format!("={b:02X}"));
        }
    }
    out
}

/// Reverse of [`escape_key`]. Malformed escapes are passed through verbatim.
#[must_use]
pub fn unescape_key(escaped: &str) -> String {
    let bytes = escaped.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'=' && i + 2 < bytes.len() {
            let hex = &escaped[i + 1..i + 3];
            if let Ok(b) = u8::from_str_radix(hex, 16) {
                out.push(b);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

/// A bucket backed by a NATS JetStream KV store.
pub struct JetStreamBucket {
    name: String,
    store: async_nats::jetstream::kv::Store,
}

impl JetStreamBucket {
    /// Open the named bucket, creating it with single-entry history if it
    /// does not exist.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Backend`] if the bucket can neither be opened
    /// nor created.
    pub async fn open(
        jetstream: &async_nats::jetstream::Context,
        name: &str,
    ) -> Result<Self, StoreError> {
        let store = match jetstream.get_key_value(name).await {
            Ok(store) => store,
            Err(_) => jetstream
                .create_key_value(async_nats::jetstream::kv::Config {
                    bucket: name.to_string(),
                    history: 1,
                    ..Default::default()
                })
                .await
                .map_err(|e| StoreError::backend(name, e))?,
        };
        Ok(Self {
            name: name.to_string(),
            store,
        })
    }
}

#[async_trait]
impl KeyValue for JetStreamBucket {
    fn bucket(&self) -> &str {
        &self.name
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let escaped = escape_key(key);
        let value = self
            .store
            .get(escaped)
            .await
            .map_err(|e| StoreError::backend(&self.name, e))?;
        Ok(value.map(|bytes| bytes.to_vec()))
    }

    async fn entry(&self, key: &str) -> Result<Option<(Vec<u8>, u64)>, StoreError> {
        let escaped = escape_key(key);
        let entry = self
            .store
            .entry(escaped)
            .await
            .map_err(|e| StoreError::backend(&self.name, e))?;
        Ok(entry.and_then(|e| {
            matches!(e.operation, async_nats::jetstream::kv::Operation::Put)
                .then(|| (e.value.to_vec(), e.revision))
        }))
    }

    async fn put(&self, key: &str, value: Vec<u8>) -> Result<u64, StoreError> {
        let escaped = escape_key(key);
        self.store
            .put(escaped, value.into())
            .await
            .map_err(|e| StoreError::backend(&self.name, e))
    }

    async fn create(&self, key: &str, value: Vec<u8>) -> Result<u64, StoreError> {
        use async_nats::jetstream::kv::CreateErrorKind;

        let escaped = escape_key(key);
        self.store
            .create(escaped, value.into())
            .await
            .map_err(|e| match e.kind() {
                CreateErrorKind::AlreadyExists => StoreError::Conflict {
                    bucket: self.name.clone(),
                    key: key.to_string(),
                },
                _ => StoreError::backend(&self.name, e),
            })
    }

    async fn update(&self, key: &str, value: Vec<u8>, revision: u64) -> Result<u64, StoreError> {
        use async_nats::jetstream::kv::UpdateErrorKind;

        let escaped = escape_key(key);
        self.store
            .update(escaped, value.into(), revision)
            .await
            .map_err(|e| match e.kind() {
                UpdateErrorKind::InvalidKey | UpdateErrorKind::TimedOut => {
                    StoreError::backend(&self.name, e)
                }
                // A lost revision race comes back through the publish ack,
                // which async-nats folds into the remaining kind. The CAS
                // loop re-reads on conflict and is attempt-bounded, so a
                // persistent backend fault still surfaces as a backend
                // error once retries exhaust.
                _ => StoreError::Conflict {
                    bucket: self.name.clone(),
                    key: key.to_string(),
                },
            })
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        let escaped = escape_key(key);
        self.store
            .purge(escaped)
            .await
            .map_err(|e| StoreError::backend(&self.name, e))
    }

    async fn keys(&self) -> Result<Vec<String>, StoreError> {
        let stream = self
            .store
            .keys()
            .await
            .map_err(|e| StoreError::backend(&self.name, e))?;
        let escaped: Vec<String> = stream
            .try_collect()
            .await
            .map_err(|e| StoreError::backend(&self.name, e))?;
        Ok(escaped.iter().map(|k| unescape_key(k)).collect())
    }
}
