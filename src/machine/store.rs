use std::collections::HashMap;
use std::io::ErrorKind;
use std::marker::PhantomData;
use std::path::PathBuf;

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;
use tokio::sync::Mutex;

use super::MachineSpec;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("{0}")]
    Backend(String),
}

/// Durable read/write of "current state for subject X".
///
/// Must be strongly consistent per subject: a coordinator holding the
/// subject lock never observes a stale read between its initial load and its
/// final save.
#[async_trait]
pub trait StateStore<M: MachineSpec>: Send + Sync {
    async fn load(&self, subject_id: &str) -> Result<Option<M::State>, StoreError>;

    async fn save(&self, subject_id: &str, state: M::State) -> Result<(), StoreError>;

    /// Every subject the store has a state for; drives the reconciler and
    /// status surfaces.
    async fn subjects(&self) -> Result<Vec<String>, StoreError>;
}

/// Volatile store backing tests and the embedded demo.
pub struct MemoryStateStore<M: MachineSpec> {
    states: Mutex<HashMap<String, M::State>>,
}

impl<M: MachineSpec> MemoryStateStore<M> {
    pub fn new() -> Self {
        Self {
            states: Mutex::new(HashMap::new()),
        }
    }
}

impl<M: MachineSpec> Default for MemoryStateStore<M> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<M: MachineSpec> StateStore<M> for MemoryStateStore<M> {
    async fn load(&self, subject_id: &str) -> Result<Option<M::State>, StoreError> {
        Ok(self.states.lock().await.get(subject_id).copied())
    }

    async fn save(&self, subject_id: &str, state: M::State) -> Result<(), StoreError> {
        self.states.lock().await.insert(subject_id.to_string(), state);
        Ok(())
    }

    async fn subjects(&self) -> Result<Vec<String>, StoreError> {
        let mut ids: Vec<String> = self.states.lock().await.keys().cloned().collect();
        ids.sort();
        Ok(ids)
    }
}

/// Durable store holding the whole subject→state map in one JSON file.
///
/// Writes go to a sibling temp file first and are renamed into place, so a
/// crash mid-write never leaves a torn map. Suited to the control plane's
/// scale (hundreds of subjects, transition-rate writes).
pub struct JsonFileStateStore<M: MachineSpec> {
    path: PathBuf,
    guard: Mutex<()>,
    _machine: PhantomData<fn() -> M>,
}

impl<M: MachineSpec> JsonFileStateStore<M> {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            guard: Mutex::new(()),
            _machine: PhantomData,
        }
    }
}

impl<M: MachineSpec> JsonFileStateStore<M>
where
    M::State: Serialize + DeserializeOwned,
{
    async fn read_map(&self) -> Result<HashMap<String, M::State>, StoreError> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(HashMap::new()),
            Err(e) => Err(e.into()),
        }
    }

    async fn write_map(&self, map: &HashMap<String, M::State>) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec_pretty(map)?;
        let tmp = self.path.with_extension("tmp");
        tokio::fs::write(&tmp, bytes).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

#[async_trait]
impl<M: MachineSpec> StateStore<M> for JsonFileStateStore<M>
where
    M::State: Serialize + DeserializeOwned,
{
    async fn load(&self, subject_id: &str) -> Result<Option<M::State>, StoreError> {
        let _guard = self.guard.lock().await;
        Ok(self.read_map().await?.get(subject_id).copied())
    }

    async fn save(&self, subject_id: &str, state: M::State) -> Result<(), StoreError> {
        let _guard = self.guard.lock().await;
        let mut map = self.read_map().await?;
        map.insert(subject_id.to_string(), state);
        self.write_map(&map).await
    }

    async fn subjects(&self) -> Result<Vec<String>, StoreError> {
        let _guard = self.guard.lock().await;
        let mut ids: Vec<String> = self.read_map().await?.into_keys().collect();
        ids.sort();
        Ok(ids)
    }
}
