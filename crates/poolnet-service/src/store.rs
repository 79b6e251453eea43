use poolnet_core::{EngineConfig, EngineState, PoolEngine, PoolError};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("engine state IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("engine state serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("persisted engine state rejected: {0}")]
    Restore(#[from] PoolError),
    #[error("engine state write task failed: {0}")]
    TaskFailed(String),
}

/// File-backed engine snapshot.
///
/// The whole engine state is rewritten after every committed command. Reloading goes through
/// `PoolEngine::from_state`, so a snapshot with a broken journal chain or violated invariants
/// is refused at startup.
#[derive(Debug, Clone)]
pub struct PersistedEngineStore {
    path: PathBuf,
}

impl PersistedEngineStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Restore the persisted engine, or `None` when nothing has been saved yet.
    pub fn load(&self, config: EngineConfig) -> Result<Option<PoolEngine>, StoreError> {
        if !self.path.exists() {
            return Ok(None);
        }
        let bytes = fs::read(&self.path)?;
        if bytes.is_empty() {
            return Ok(None);
        }
        let state: EngineState = serde_json::from_slice(&bytes)?;
        Ok(Some(PoolEngine::from_state(config, state)?))
    }

    pub fn persist(&self, engine: &PoolEngine) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }

        let bytes = serde_json::to_vec_pretty(&engine.to_state())?;
        let tmp_path = self.path.with_extension("tmp");
        fs::write(&tmp_path, bytes)?;
        fs::rename(tmp_path, &self.path)?;
        Ok(())
    }

    /// Persist on the blocking thread pool and hand the engine back once it is on disk.
    pub async fn persist_owned(
        self: Arc<Self>,
        engine: PoolEngine,
    ) -> Result<PoolEngine, StoreError> {
        tokio::task::spawn_blocking(move || self.persist(&engine).map(|()| engine))
            .await
            .map_err(|e| StoreError::TaskFailed(e.to_string()))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use poolnet_core::{AccountId, PoolId};
    use uuid::Uuid;

    #[test]
    fn engine_persists_across_reload() {
        let dir = std::env::temp_dir().join(format!("poolnet-store-{}", Uuid::new_v4()));
        let store = PersistedEngineStore::new(dir.join("engine.json"));
        assert!(store.load(EngineConfig::default()).unwrap().is_none());

        let admin = AccountId::new("admin");
        let alice = AccountId::new("alice");
        let mut engine = PoolEngine::new(EngineConfig::default()).unwrap();
        engine.create_pool(&admin, "north", Utc::now()).unwrap();
        engine
            .fund_account(&admin, &alice, 500, Utc::now())
            .unwrap();
        engine.stake(PoolId(0), &alice, 500, Utc::now()).unwrap();
        store.persist(&engine).unwrap();

        let reloaded = store.load(EngineConfig::default()).unwrap().unwrap();
        assert_eq!(reloaded.to_state(), engine.to_state());
        assert_eq!(reloaded.get_stake(PoolId(0), &alice).unwrap().staked_amount, 500);
        assert!(reloaded.journal().verify_chain());
    }

    #[tokio::test]
    async fn owned_persist_returns_the_saved_engine() {
        let dir = std::env::temp_dir().join(format!("poolnet-store-owned-{}", Uuid::new_v4()));
        let store = Arc::new(PersistedEngineStore::new(dir.join("engine.json")));

        let admin = AccountId::new("admin");
        let mut engine = PoolEngine::new(EngineConfig::default()).unwrap();
        engine.create_pool(&admin, "north", Utc::now()).unwrap();
        let expected = engine.to_state();

        let returned = Arc::clone(&store).persist_owned(engine).await.unwrap();
        assert_eq!(returned.to_state(), expected);
        let reloaded = store.load(EngineConfig::default()).unwrap().unwrap();
        assert_eq!(reloaded.to_state(), expected);
    }

    #[test]
    fn tampered_snapshot_is_refused() {
        let dir = std::env::temp_dir().join(format!("poolnet-store-bad-{}", Uuid::new_v4()));
        let store = PersistedEngineStore::new(dir.join("engine.json"));

        let admin = AccountId::new("admin");
        let mut engine = PoolEngine::new(EngineConfig::default()).unwrap();
        engine.create_pool(&admin, "north", Utc::now()).unwrap();
        engine
            .fund_account(&admin, &admin, 100, Utc::now())
            .unwrap();
        store.persist(&engine).unwrap();

        let mut state: serde_json::Value =
            serde_json::from_slice(&fs::read(store.path()).unwrap()).unwrap();
        state["journal"][0]["payload"] = serde_json::json!({"region": "south"});
        fs::write(store.path(), serde_json::to_vec(&state).unwrap()).unwrap();

        assert!(matches!(
            store.load(EngineConfig::default()),
            Err(StoreError::Restore(_))
        ));
    }
}
