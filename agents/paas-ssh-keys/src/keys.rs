//! Account Key Collection
//!
//! [`KeysCollection`] mirrors the broker's `/user/keys` collection and
//! [`SshKey`] is a handle to one entry in it. The collection loads on first
//! read and trusts its cache until [`KeysCollection::refresh`] is called.
//! Mutations go to the broker first; local state only changes once the
//! broker has acknowledged them.
//!
//! Thread safety: `loaded` and `entries` sit behind one mutex and each
//! entry's mutable fields behind another (always taken in that order).
//! Neither is held while a request is in flight.

use anyhow::Context;
use parking_lot::Mutex;
use reqwest::Method;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::error::{classify_create, KeysError};
use crate::public_key::{canonical_body, KeyMaterial, PublicKey};
use crate::transport::{key_path, Envelope, Transport, KEYS_PATH};
use crate::types::{CreateKeyRequest, KeyRecord, SshKeyType, UpdateKeyRequest};

// ============================================================
// Shared State
// ============================================================

struct Shared {
    transport: Arc<dyn Transport>,
    state: Mutex<CollectionState>,
}

#[derive(Default)]
struct CollectionState {
    loaded: bool,
    entries: Vec<Arc<KeyEntry>>,
}

struct KeyEntry {
    name: String,
    fields: Mutex<KeyFields>,
}

#[derive(Debug, Clone)]
struct KeyFields {
    key_type: SshKeyType,
    body: String,
    destroyed: bool,
}

impl KeyEntry {
    fn new(record: KeyRecord) -> Arc<Self> {
        Arc::new(Self {
            name: record.name,
            fields: Mutex::new(KeyFields {
                key_type: record.key_type,
                body: record.content,
                destroyed: false,
            }),
        })
    }

    fn apply(&self, record: &KeyRecord) {
        let mut fields = self.fields.lock();
        fields.key_type = record.key_type;
        fields.body = record.content.clone();
    }

    fn snapshot(&self) -> KeyFields {
        self.fields.lock().clone()
    }
}

impl Shared {
    fn is_loaded(&self) -> bool {
        self.state.lock().loaded
    }

    fn find(&self, name: &str) -> Option<Arc<KeyEntry>> {
        self.state
            .lock()
            .entries
            .iter()
            .find(|e| e.name == name)
            .cloned()
    }

    fn find_by_body(&self, body: &str) -> Option<Arc<KeyEntry>> {
        self.state
            .lock()
            .entries
            .iter()
            .find(|e| e.fields.lock().body == body)
            .cloned()
    }

    fn snapshot(&self) -> Vec<Arc<KeyEntry>> {
        self.state.lock().entries.clone()
    }

    /// Install a freshly fetched listing unless another caller got there first.
    fn install(&self, records: Vec<KeyRecord>) {
        let mut state = self.state.lock();
        if state.loaded {
            return;
        }
        state.entries = records.into_iter().map(KeyEntry::new).collect();
        state.loaded = true;
        debug!(count = state.entries.len(), "SSH keys loaded");
    }

    /// Record an acknowledged key: update the entry with that name in place,
    /// or append a new one at the tail.
    fn publish(&self, record: KeyRecord) -> Arc<KeyEntry> {
        let mut state = self.state.lock();
        if let Some(entry) = state.entries.iter().find(|e| e.name == record.name) {
            entry.apply(&record);
            return entry.clone();
        }

        let entry = KeyEntry::new(record);
        // An unloaded cache is replaced wholesale on the next read
        if state.loaded {
            state.entries.push(entry.clone());
        }
        entry
    }

    /// Whether `entry` is part of the current listing
    fn tracks(&self, entry: &Arc<KeyEntry>) -> bool {
        let state = self.state.lock();
        state.loaded && state.entries.iter().any(|e| Arc::ptr_eq(e, entry))
    }

    /// Drop every entry with this name, preserving the order of the rest.
    /// Dropped entries are destroyed, so every handle to them is too.
    fn forget(&self, name: &str) {
        self.state.lock().entries.retain(|e| {
            if e.name != name {
                return true;
            }
            e.fields.lock().destroyed = true;
            false
        });
    }

    fn invalidate(&self) {
        self.state.lock().loaded = false;
    }

    async fn ensure_loaded(&self) -> Result<(), KeysError> {
        if self.is_loaded() {
            return Ok(());
        }
        let records = self.fetch_all().await?;
        self.install(records);
        Ok(())
    }

    async fn fetch_all(&self) -> Result<Vec<KeyRecord>, KeysError> {
        let envelope = self.transport.request(Method::GET, KEYS_PATH, None).await?;
        if envelope.data.is_null() {
            return Ok(Vec::new());
        }
        let records = serde_json::from_value(envelope.data).context("Failed to decode SSH key list")?;
        Ok(records)
    }

    async fn put_key(&self, name: &str, key: &PublicKey) -> Result<KeyRecord, KeysError> {
        let request = UpdateKeyRequest {
            key_type: key.key_type(),
            content: key.body(),
        };
        let body = serde_json::to_value(&request).context("Failed to encode SSH key")?;
        let envelope = self
            .transport
            .request(Method::PUT, &key_path(name), Some(body))
            .await?;

        decode_record(envelope, name, key)
    }
}

/// Decode the key payload of a mutation response, falling back to what was sent.
fn decode_record(envelope: Envelope, name: &str, sent: &PublicKey) -> Result<KeyRecord, KeysError> {
    if envelope.data.is_null() {
        return Ok(KeyRecord {
            name: name.to_string(),
            key_type: sent.key_type(),
            content: sent.body().to_string(),
        });
    }
    let record = serde_json::from_value(envelope.data).context("Failed to decode SSH key")?;
    Ok(record)
}

// ============================================================
// Collection
// ============================================================

/// Cached view of the account's SSH keys
#[derive(Clone)]
pub struct KeysCollection {
    shared: Arc<Shared>,
}

impl KeysCollection {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            shared: Arc::new(Shared {
                transport,
                state: Mutex::new(CollectionState::default()),
            }),
        }
    }

    /// Whether the next read is served from cache
    pub fn is_loaded(&self) -> bool {
        self.shared.is_loaded()
    }

    fn handle(&self, entry: Arc<KeyEntry>) -> SshKey {
        SshKey {
            entry,
            shared: self.shared.clone(),
        }
    }

    async fn ensure_loaded(&self) -> Result<(), KeysError> {
        self.shared.ensure_loaded().await
    }

    /// All keys, in broker order followed by keys added since the last load
    pub async fn list(&self) -> Result<Vec<SshKey>, KeysError> {
        self.ensure_loaded().await?;
        Ok(self
            .shared
            .snapshot()
            .into_iter()
            .map(|entry| self.handle(entry))
            .collect())
    }

    /// Look up a key by exact (case-sensitive) name
    pub async fn get_by_name(&self, name: &str) -> Result<Option<SshKey>, KeysError> {
        self.ensure_loaded().await?;
        Ok(self.shared.find(name).map(|entry| self.handle(entry)))
    }

    /// Look up a key by its base64 body. A wire-type prefix or trailing
    /// comment on `public_key` is ignored.
    pub async fn get_by_public_key(&self, public_key: &str) -> Result<Option<SshKey>, KeysError> {
        self.ensure_loaded().await?;
        let body = canonical_body(public_key);
        Ok(self.shared.find_by_body(body).map(|entry| self.handle(entry)))
    }

    /// Register a new key with `POST /user/keys`.
    ///
    /// A name already in the cache fails with
    /// [`KeysError::DuplicateKeyName`] without contacting the broker.
    pub async fn add(
        &self,
        name: &str,
        material: impl Into<KeyMaterial>,
    ) -> Result<SshKey, KeysError> {
        let material = material.into();
        self.ensure_loaded().await?;

        if self.shared.find(name).is_some() {
            return Err(KeysError::DuplicateKeyName {
                name: name.to_string(),
            });
        }

        let key = material.public_key();
        let request = CreateKeyRequest {
            name,
            key_type: key.key_type(),
            content: key.body(),
        };
        let body = serde_json::to_value(&request).context("Failed to encode SSH key")?;

        let envelope = self
            .shared
            .transport
            .request(Method::POST, KEYS_PATH, Some(body))
            .await
            .map_err(|e| classify_create(e, name))?;
        let record = decode_record(envelope, name, key)?;

        info!(name = %name, key_type = %record.key_type, "SSH key added");
        Ok(self.handle(self.shared.publish(record)))
    }

    /// Create or replace a key with `PUT /user/keys/{name}`.
    ///
    /// No local duplicate check is made; broker rejections surface as
    /// [`KeysError::Endpoint`].
    pub async fn put(&self, name: &str, key: &PublicKey) -> Result<SshKey, KeysError> {
        self.ensure_loaded().await?;
        let record = self.shared.put_key(name, key).await?;

        info!(name = %name, key_type = %record.key_type, "SSH key put");
        Ok(self.handle(self.shared.publish(record)))
    }

    /// Delete a key by name with `DELETE /user/keys/{name}`.
    pub async fn delete_by_name(&self, name: &str) -> Result<(), KeysError> {
        self.ensure_loaded().await?;
        let entry = self.shared.find(name).ok_or_else(|| KeysError::NoSuchKey {
            name: name.to_string(),
        })?;

        self.handle(entry).destroy().await
    }

    /// Drop the cache; the next read fetches the full listing again.
    ///
    /// Handles issued before the refresh keep working but no longer share
    /// state with the collection.
    pub fn refresh(&self) {
        self.shared.invalidate();
        debug!("SSH key cache invalidated");
    }
}

impl std::fmt::Debug for KeysCollection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.shared.state.lock();
        f.debug_struct("KeysCollection")
            .field("loaded", &state.loaded)
            .field("entries", &state.entries.len())
            .finish()
    }
}

// ============================================================
// Key Handle
// ============================================================

/// Handle to one SSH key on the broker
///
/// Handles are cheap to clone and clones share state. Equality compares
/// name, type and body.
#[derive(Clone)]
pub struct SshKey {
    entry: Arc<KeyEntry>,
    shared: Arc<Shared>,
}

impl SshKey {
    pub fn name(&self) -> &str {
        &self.entry.name
    }

    pub fn key_type(&self) -> SshKeyType {
        self.entry.fields.lock().key_type
    }

    /// Base64 body of the public key
    pub fn public_key(&self) -> String {
        self.entry.fields.lock().body.clone()
    }

    pub fn to_public_key(&self) -> PublicKey {
        let fields = self.entry.snapshot();
        PublicKey::from_parts(fields.key_type, fields.body)
    }

    pub fn is_destroyed(&self) -> bool {
        self.entry.fields.lock().destroyed
    }

    /// Whether both handles refer to the same cached entry
    pub fn same_handle(&self, other: &SshKey) -> bool {
        Arc::ptr_eq(&self.entry, &other.entry)
    }

    fn ensure_live(&self) -> Result<(), KeysError> {
        if self.is_destroyed() {
            return Err(KeysError::KeyDestroyed {
                name: self.name().to_string(),
            });
        }
        Ok(())
    }

    fn mark_destroyed(&self) {
        self.entry.fields.lock().destroyed = true;
        self.shared.forget(self.name());
    }

    /// The broker no longer knows this key: retire the handle.
    fn lost(&self) -> KeysError {
        warn!(name = %self.name(), "SSH key missing on broker, dropping from cache");
        self.mark_destroyed();
        KeysError::NoSuchKey {
            name: self.name().to_string(),
        }
    }

    /// Replace the key material with one `PUT`.
    ///
    /// Local fields change only after the broker accepts the update.
    ///
    /// A handle from before the last [`KeysCollection::refresh`] first
    /// checks the reloaded listing, so a key deleted in the meantime is not
    /// recreated by the `PUT`.
    pub async fn update(&self, key: PublicKey) -> Result<(), KeysError> {
        self.ensure_live()?;

        if !self.shared.tracks(&self.entry) {
            self.shared.ensure_loaded().await?;
            if self.shared.find(self.name()).is_none() {
                return Err(self.lost());
            }
        }

        let record = match self.shared.put_key(self.name(), &key).await {
            Ok(record) => record,
            Err(KeysError::Endpoint(e)) if e.is_not_found() => return Err(self.lost()),
            Err(e) => return Err(e),
        };

        self.entry.apply(&record);
        self.shared.publish(record);

        info!(name = %self.name(), key_type = %key.key_type(), "SSH key updated");
        Ok(())
    }

    /// Set a new public key body.
    ///
    /// `body` may be a bare base64 body, which keeps the current type, or a
    /// `<wire-type> <body>` line, which sets the type too.
    pub async fn set_public_key(&self, body: &str) -> Result<(), KeysError> {
        self.ensure_live()?;
        let key = PublicKey::parse_with_default(body, self.key_type())?;
        self.update(key).await
    }

    /// Change type and body together.
    ///
    /// `body` may carry a wire-type prefix, which must agree with `key_type`.
    pub async fn set_key_type(&self, key_type: SshKeyType, body: &str) -> Result<(), KeysError> {
        self.ensure_live()?;
        let key = PublicKey::parse_with_default(body, key_type)?;
        if key.key_type() != key_type {
            return Err(KeysError::InvalidKeyFormat(format!(
                "{} key given where {key_type} was requested",
                key.key_type()
            )));
        }
        self.update(key).await
    }

    /// Re-read this key with `GET /user/keys/{name}`.
    pub async fn refresh(&self) -> Result<(), KeysError> {
        self.ensure_live()?;

        let envelope = match self
            .shared
            .transport
            .request(Method::GET, &key_path(self.name()), None)
            .await
        {
            Ok(envelope) => envelope,
            Err(KeysError::Endpoint(e)) if e.is_not_found() => return Err(self.lost()),
            Err(e) => return Err(e),
        };

        let record: KeyRecord =
            serde_json::from_value(envelope.data).context("Failed to decode SSH key")?;
        self.entry.apply(&record);
        self.shared.publish(record);
        Ok(())
    }

    /// Delete this key on the broker. The handle is unusable afterwards.
    pub async fn destroy(&self) -> Result<(), KeysError> {
        self.ensure_live()?;

        match self
            .shared
            .transport
            .request(Method::DELETE, &key_path(self.name()), None)
            .await
        {
            Ok(_) => {}
            Err(KeysError::Endpoint(e)) if e.is_not_found() => return Err(self.lost()),
            Err(e) => return Err(e),
        }

        self.mark_destroyed();
        info!(name = %self.name(), "SSH key deleted");
        Ok(())
    }
}

impl PartialEq for SshKey {
    fn eq(&self, other: &Self) -> bool {
        if self.same_handle(other) {
            return true;
        }
        let (a, b) = (self.entry.snapshot(), other.entry.snapshot());
        self.name() == other.name() && a.key_type == b.key_type && a.body == b.body
    }
}

impl Eq for SshKey {}

impl std::fmt::Debug for SshKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let fields = self.entry.snapshot();
        f.debug_struct("SshKey")
            .field("name", &self.entry.name)
            .field("key_type", &fields.key_type)
            .field("public_key", &fields.body)
            .field("destroyed", &fields.destroyed)
            .finish()
    }
}
