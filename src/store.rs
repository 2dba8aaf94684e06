//! Versioned storage for [`SchedulingHint`] records.
//!
//! The kube variant talks to the cluster; the fake keeps hints in memory
//! with the same optimistic-concurrency contract, so the reservation
//! protocol and the cycle can be tested without a cluster.

use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex};

use kube::api::{Api, DeleteParams, ListParams, PostParams};
use kube::Client;
use thiserror::Error;

use crate::hint::{PLUGIN_LABEL_KEY, PLUGIN_LABEL_VALUE, SchedulingHint};

#[derive(Debug, Error)]
pub enum StoreError {
    /// The record changed under us; re-read and retry.
    #[error("hint version conflict")]
    Conflict,
    #[error("hint not found: {0}")]
    NotFound(String),
    /// Injected or transport-level backend failure.
    #[error("hint store failure: {0}")]
    Backend(String),
    #[error(transparent)]
    Api(#[from] kube::Error),
}

fn map_kube_err(e: kube::Error) -> StoreError {
    match &e {
        kube::Error::Api(ae) if ae.code == 409 => StoreError::Conflict,
        kube::Error::Api(ae) if ae.code == 404 => StoreError::NotFound(ae.message.clone()),
        _ => StoreError::Api(e),
    }
}

pub enum HintStore {
    Kube(KubeHintStore),
    Fake(FakeHintStore),
}

impl HintStore {
    pub async fn get(&self, name: &str) -> Result<Option<SchedulingHint>, StoreError> {
        match self {
            Self::Kube(s) => s.get(name).await,
            Self::Fake(s) => s.get(name).await,
        }
    }

    /// This plugin's hints, unfiltered for expiry.
    pub async fn list(&self) -> Result<Vec<SchedulingHint>, StoreError> {
        match self {
            Self::Kube(s) => s.list().await,
            Self::Fake(s) => s.list().await,
        }
    }

    pub async fn create(&self, hint: SchedulingHint) -> Result<(), StoreError> {
        match self {
            Self::Kube(s) => s.create(hint).await,
            Self::Fake(s) => s.create(hint).await,
        }
    }

    /// Version-checked write: fails with [`StoreError::Conflict`] unless
    /// the hint's resourceVersion still matches the stored record.
    pub async fn replace(&self, hint: SchedulingHint) -> Result<(), StoreError> {
        match self {
            Self::Kube(s) => s.replace(hint).await,
            Self::Fake(s) => s.replace(hint).await,
        }
    }

    pub async fn delete(&self, name: &str) -> Result<(), StoreError> {
        match self {
            Self::Kube(s) => s.delete(name).await,
            Self::Fake(s) => s.delete(name).await,
        }
    }

    /// Create the hint, or overwrite spec and labels of the existing
    /// record under its current version.
    pub async fn upsert(&self, mut hint: SchedulingHint) -> Result<(), StoreError> {
        let name = hint
            .metadata
            .name
            .clone()
            .ok_or_else(|| StoreError::Backend("hint without a name".into()))?;
        match self.get(&name).await? {
            None => self.create(hint).await,
            Some(existing) => {
                hint.metadata.resource_version = existing.metadata.resource_version;
                self.replace(hint).await
            }
        }
    }
}

// ── Kubernetes-backed store ──────────────────────────────────────────

pub struct KubeHintStore {
    api: Api<SchedulingHint>,
}

impl KubeHintStore {
    pub fn new(client: Client) -> Self {
        Self { api: Api::all(client) }
    }

    async fn get(&self, name: &str) -> Result<Option<SchedulingHint>, StoreError> {
        self.api.get_opt(name).await.map_err(map_kube_err)
    }

    async fn list(&self) -> Result<Vec<SchedulingHint>, StoreError> {
        let lp = ListParams::default().labels(&format!("{PLUGIN_LABEL_KEY}={PLUGIN_LABEL_VALUE}"));
        Ok(self.api.list(&lp).await.map_err(map_kube_err)?.items)
    }

    async fn create(&self, hint: SchedulingHint) -> Result<(), StoreError> {
        self.api
            .create(&PostParams::default(), &hint)
            .await
            .map(|_| ())
            .map_err(map_kube_err)
    }

    async fn replace(&self, hint: SchedulingHint) -> Result<(), StoreError> {
        let name = hint
            .metadata
            .name
            .clone()
            .ok_or_else(|| StoreError::Backend("hint without a name".into()))?;
        self.api
            .replace(&name, &PostParams::default(), &hint)
            .await
            .map(|_| ())
            .map_err(map_kube_err)
    }

    async fn delete(&self, name: &str) -> Result<(), StoreError> {
        match self.api.delete(name, &DeleteParams::default()).await {
            Ok(_) => Ok(()),
            Err(e) => match map_kube_err(e) {
                StoreError::NotFound(_) => Ok(()),
                other => Err(other),
            },
        }
    }
}

// ── In-memory fake ───────────────────────────────────────────────────

#[derive(Default)]
struct FakeStoreState {
    objects: BTreeMap<String, SchedulingHint>,
    version_counter: u64,
    /// Errors injected into upcoming writes, consumed in order.
    write_errors: VecDeque<String>,
    write_log: Vec<String>,
}

/// Deterministic in-memory hint store with kube-style optimistic
/// concurrency: every write bumps the resourceVersion, and `replace`
/// fails on a stale version.
#[derive(Clone, Default)]
pub struct FakeHintStore {
    state: Arc<Mutex<FakeStoreState>>,
}

impl FakeHintStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue an error for the next write (create or replace).
    pub fn fail_next_write(self, message: &str) -> Self {
        self.state
            .lock()
            .unwrap()
            .write_errors
            .push_back(message.to_string());
        self
    }

    /// Ordered log of successful writes, `"<op> <name>"`.
    pub fn write_log(&self) -> Vec<String> {
        self.state.lock().unwrap().write_log.clone()
    }

    fn next_version(state: &mut FakeStoreState) -> String {
        state.version_counter += 1;
        state.version_counter.to_string()
    }

    fn injected_error(state: &mut FakeStoreState) -> Result<(), StoreError> {
        match state.write_errors.pop_front() {
            Some(message) => Err(StoreError::Backend(message)),
            None => Ok(()),
        }
    }

    async fn get(&self, name: &str) -> Result<Option<SchedulingHint>, StoreError> {
        Ok(self.state.lock().unwrap().objects.get(name).cloned())
    }

    async fn list(&self) -> Result<Vec<SchedulingHint>, StoreError> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .objects
            .values()
            .filter(|h| {
                h.metadata
                    .labels
                    .as_ref()
                    .and_then(|l| l.get(PLUGIN_LABEL_KEY))
                    .map(|v| v == PLUGIN_LABEL_VALUE)
                    .unwrap_or(false)
            })
            .cloned()
            .collect())
    }

    async fn create(&self, mut hint: SchedulingHint) -> Result<(), StoreError> {
        let mut state = self.state.lock().unwrap();
        Self::injected_error(&mut state)?;
        let name = hint
            .metadata
            .name
            .clone()
            .ok_or_else(|| StoreError::Backend("hint without a name".into()))?;
        if state.objects.contains_key(&name) {
            return Err(StoreError::Conflict);
        }
        hint.metadata.resource_version = Some(Self::next_version(&mut state));
        state.write_log.push(format!("create {name}"));
        state.objects.insert(name, hint);
        Ok(())
    }

    async fn replace(&self, mut hint: SchedulingHint) -> Result<(), StoreError> {
        let mut state = self.state.lock().unwrap();
        Self::injected_error(&mut state)?;
        let name = hint
            .metadata
            .name
            .clone()
            .ok_or_else(|| StoreError::Backend("hint without a name".into()))?;
        let Some(existing) = state.objects.get(&name) else {
            return Err(StoreError::NotFound(name));
        };
        if existing.metadata.resource_version != hint.metadata.resource_version {
            return Err(StoreError::Conflict);
        }
        hint.metadata.resource_version = Some(Self::next_version(&mut state));
        state.write_log.push(format!("replace {name}"));
        state.objects.insert(name, hint);
        Ok(())
    }

    async fn delete(&self, name: &str) -> Result<(), StoreError> {
        let mut state = self.state.lock().unwrap();
        state.write_log.push(format!("delete {name}"));
        state.objects.remove(name);
        Ok(())
    }
}
