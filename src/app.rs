use std::collections::hash_map::Entry;

use camino::Utf8PathBuf;
use serde::Serialize;
use serde_json::Value;

use crate::cache::{SequencePayload, SequenceSet, SessionCache};
use crate::domain::{
    Account, AccountId, Encoding, ImageKey, MergedTrajectory, TimeRange, Username,
};
use crate::error::{
    DownloadError, FetchError, MaterializeError, MergeError, PersistError, ResolutionError,
};
use crate::mapillary::MapillaryClient;
use crate::merge::merge_fragments;
use crate::store::Store;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AssetAction {
    Downloaded,
    Skipped,
    Failed,
}

#[derive(Debug, Clone, Serialize)]
pub struct AssetOutcome {
    pub key: String,
    pub action: AssetAction,
    pub path: Option<String>,
    pub error: Option<String>,
}

/// Per-key results of [`App::fetch_assets`], in input order.
#[derive(Debug, Clone, Default, Serialize)]
pub struct MaterializeReport {
    pub items: Vec<AssetOutcome>,
}

impl MaterializeReport {
    pub fn count(&self, action: AssetAction) -> usize {
        self.items
            .iter()
            .filter(|item| item.action == action)
            .count()
    }
}

/// One session against the Mapillary API.
///
/// Resolved accounts and fetched sequences are cached for the lifetime of
/// the value. Each operation fetches whatever earlier stage it is missing.
pub struct App<C: MapillaryClient> {
    store: Store,
    client: C,
    cache: SessionCache,
}

impl<C: MapillaryClient> App<C> {
    pub fn new(store: Store, client: C) -> Self {
        Self {
            store,
            client,
            cache: SessionCache::default(),
        }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    pub fn cache(&self) -> &SessionCache {
        &self.cache
    }

    pub fn resolve_username(&mut self, raw: &str) -> Result<&Account, ResolutionError> {
        let username: Username = raw.parse()?;
        self.resolve(&username)
    }

    pub fn account_id(&mut self, raw: &str) -> Result<AccountId, ResolutionError> {
        self.resolve_username(raw).map(|account| account.key.clone())
    }

    /// Fetches sequences for the user unless they are already cached for
    /// this encoding. On a cache hit `window` is ignored.
    pub fn fetch_sequences(
        &mut self,
        raw: &str,
        encoding: Encoding,
        window: &TimeRange,
    ) -> Result<&SequenceSet, FetchError> {
        let username: Username = raw.parse()?;
        self.fetch_for(&username, encoding, window)
    }

    /// Saves the user's sequences to `<username>_sequences.<ext>` in the output directory.
    pub fn persist_sequences(
        &mut self,
        raw: &str,
        encoding: Encoding,
    ) -> Result<Utf8PathBuf, PersistError> {
        let username = raw.parse::<Username>().map_err(FetchError::from)?;
        let path = self.store.sequences_path(&username, encoding);
        let set = self.fetch_for(&username, encoding, &TimeRange::default())?;
        Store::write_bytes_atomic(&path, set.payload.as_bytes())
            .map_err(|err| PersistError::Filesystem(format!("write {path}: {err}")))?;
        tracing::info!(%path, "saved sequences");
        Ok(path)
    }

    pub fn merge_trajectory(&mut self, raw: &str) -> Result<MergedTrajectory, MergeError> {
        let username = raw.parse::<Username>().map_err(FetchError::from)?;
        let set = self.fetch_for(&username, Encoding::Structured, &TimeRange::default())?;
        let fragments = set.fragments().unwrap_or_default();
        let merged = merge_fragments(fragments)?;
        tracing::info!(
            username = %username,
            fragments = fragments.len(),
            images = merged.len(),
            "merged sequences"
        );
        Ok(merged)
    }

    /// Downloads the thumbnails for `keys`, skipping files already on disk.
    /// A failing key is reported and does not stop the others.
    pub fn fetch_assets(&self, keys: &[String]) -> Result<MaterializeReport, MaterializeError> {
        if keys.is_empty() {
            tracing::info!("no image keys provided for download");
            return Ok(MaterializeReport::default());
        }
        self.store.ensure_image_dir().map_err(|err| {
            MaterializeError::Filesystem(format!("create {}: {err}", self.store.image_dir()))
        })?;

        let items = keys
            .iter()
            .map(|key| match self.materialize(key) {
                Ok(outcome) => outcome,
                Err(err) => {
                    tracing::warn!(key = %key, error = %err, "image download failed");
                    AssetOutcome {
                        key: key.clone(),
                        action: AssetAction::Failed,
                        path: None,
                        error: Some(error_chain(&err)),
                    }
                }
            })
            .collect();
        Ok(MaterializeReport { items })
    }

    /// Merges the user's sequences and downloads the first `limit` thumbnails.
    pub fn download_trajectory_images(
        &mut self,
        raw: &str,
        limit: Option<usize>,
    ) -> Result<MaterializeReport, DownloadError> {
        let merged = self.merge_trajectory(raw)?;
        let take = limit.unwrap_or(merged.image_keys.len());
        let keys = &merged.image_keys[..take.min(merged.image_keys.len())];
        Ok(self.fetch_assets(keys)?)
    }

    fn resolve(&mut self, username: &Username) -> Result<&Account, ResolutionError> {
        match self.cache.accounts.entry(username.clone()) {
            Entry::Occupied(entry) => {
                tracing::info!(username = %username, "user details already available");
                Ok(&*entry.into_mut())
            }
            Entry::Vacant(slot) => {
                tracing::info!(
                    username = %username,
                    "user details not cached, querying Mapillary"
                );
                let account = lookup_account(&self.client, username)?;
                self.cache
                    .sequences
                    .entry(account.key.clone())
                    .or_default();
                Ok(&*slot.insert(account))
            }
        }
    }

    fn fetch_for(
        &mut self,
        username: &Username,
        encoding: Encoding,
        window: &TimeRange,
    ) -> Result<&SequenceSet, FetchError> {
        let account_id = self.resolve(username)?.key.clone();
        let bucket = self.cache.sequences.entry(account_id.clone()).or_default();
        match bucket.entry(encoding) {
            Entry::Occupied(entry) => {
                tracing::info!(username = %username, %encoding, "sequences already available");
                Ok(&*entry.into_mut())
            }
            Entry::Vacant(slot) => {
                tracing::info!(
                    username = %username,
                    %encoding,
                    start = %window.start(),
                    end = %window.end(),
                    "fetching sequences"
                );
                let response = self.client.list_sequences(&account_id, encoding, window)?;
                let payload = SequencePayload::decode(encoding, response)?;
                Ok(&*slot.insert(SequenceSet {
                    account_id,
                    encoding,
                    payload,
                }))
            }
        }
    }

    fn materialize(&self, raw_key: &str) -> Result<AssetOutcome, MaterializeError> {
        let key: ImageKey = raw_key.parse()?;
        let path = self.store.thumbnail_path(&key);
        if self.store.exists(&path) {
            tracing::info!(key = %key, "image already exists");
            return Ok(AssetOutcome {
                key: raw_key.to_string(),
                action: AssetAction::Skipped,
                path: Some(path.to_string()),
                error: None,
            });
        }
        let bytes = self
            .client
            .fetch_thumbnail(&key)
            .map_err(|source| MaterializeError::Download {
                key: raw_key.to_string(),
                source,
            })?;
        Store::write_bytes_atomic(&path, &bytes).map_err(|err| MaterializeError::Write {
            key: raw_key.to_string(),
            message: err.to_string(),
        })?;
        Ok(AssetOutcome {
            key: raw_key.to_string(),
            action: AssetAction::Downloaded,
            path: Some(path.to_string()),
            error: None,
        })
    }
}

fn lookup_account<C: MapillaryClient>(
    client: &C,
    username: &Username,
) -> Result<Account, ResolutionError> {
    let body = client.search_users(username)?;
    let Value::Array(records) = body else {
        return Err(ResolutionError::Malformed(
            "user search did not return a list".to_string(),
        ));
    };
    let record = records
        .into_iter()
        .next()
        .ok_or_else(|| ResolutionError::NotFound(username.to_string()))?;
    Account::from_record(username.clone(), record)
}

fn error_chain(err: &dyn std::error::Error) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(inner) = source {
        message.push_str(": ");
        message.push_str(&inner.to_string());
        source = inner.source();
    }
    message
}
