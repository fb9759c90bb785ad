use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info};

use crate::engine::Engine;

const CHECK_INTERVAL: Duration = Duration::from_secs(30);

/// Background task that rewrites a tenant's WAL from current state once
/// `threshold` appends have piled up since the last compaction.
pub async fn run_compactor(engine: Arc<Engine>, threshold: u64) {
    let mut interval = tokio::time::interval(CHECK_INTERVAL);
    loop {
        interval.tick().await;
        compact_if_needed(&engine, threshold).await;
    }
}

/// Returns whether a compaction ran.
pub async fn compact_if_needed(engine: &Engine, threshold: u64) -> bool {
    let appends = engine.wal_appends_since_compact().await;
    if appends < threshold {
        return false;
    }
    match engine.compact_wal().await {
        Ok(()) => {
            info!("tenant {}: compacted WAL after {appends} appends", engine.tenant_id);
            true
        }
        Err(e) => {
            error!("tenant {}: WAL compaction failed: {e}", engine.tenant_id);
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::NotifyHub;
    use std::path::PathBuf;
    use ulid::Ulid;

    fn test_wal_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("slotwise_test_compactor");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = std::fs::remove_file(&path);
        path
    }

    #[tokio::test]
    async fn compacts_only_past_threshold() {
        let path = test_wal_path("threshold.wal");
        let engine = Engine::new(Ulid::new(), path, Arc::new(NotifyHub::new())).unwrap();

        engine.create_staff(Ulid::new(), None).await.unwrap();
        assert!(!compact_if_needed(&engine, 3).await);

        engine.create_staff(Ulid::new(), None).await.unwrap();
        engine.create_staff(Ulid::new(), None).await.unwrap();
        assert!(compact_if_needed(&engine, 3).await);
        assert_eq!(engine.wal_appends_since_compact().await, 0);
        assert_eq!(engine.list_staff().await.len(), 3);
    }

    #[tokio::test]
    async fn compaction_drops_removed_staff() {
        let path = test_wal_path("drops_removed.wal");
        let tenant = Ulid::new();
        let kept = Ulid::new();
        {
            let engine = Engine::new(tenant, path.clone(), Arc::new(NotifyHub::new())).unwrap();
            let gone = Ulid::new();
            engine.create_staff(kept, None).await.unwrap();
            engine.create_staff(gone, None).await.unwrap();
            engine.remove_staff(gone).await.unwrap();
            assert!(compact_if_needed(&engine, 1).await);
        }
        let replayed: Vec<crate::model::Event> = crate::wal::Wal::replay(&path).unwrap();
        assert_eq!(replayed, vec![crate::model::Event::StaffCreated { id: kept, name: None }]);
    }
}
