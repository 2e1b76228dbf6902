//! Durable task storage on top of the shared key-value pool.
//!
//! Keys are `<framework-name>:<project>:<service>:<task-id>`; two reserved
//! singletons (`<framework-name>:framework`, `<framework-name>:framework_config`)
//! hold the subscription state and the config snapshot and are filtered out
//! of task scans. Writes are last-writer-wins; cross-key consistency is
//! re-established by reconciliation, not by locking.

use anyhow::{Context as _, Result};
use deadpool_redis::Pool;
use redis::AsyncCommands;
use serde::Serialize;
use stevedore_types::{FrameworkRecord, TaskRecord, TaskState};

#[derive(Clone)]
pub struct TaskRegistry {
    pool: Pool,
    prefix: String,
}

impl TaskRegistry {
    pub fn new(pool: Pool, framework_name: &str) -> Self {
        Self {
            pool,
            prefix: framework_name.to_string(),
        }
    }

    fn framework_key(&self) -> String {
        format!("{}:framework", self.prefix)
    }

    fn config_key(&self) -> String {
        format!("{}:framework_config", self.prefix)
    }

    fn is_singleton(&self, key: &str) -> bool {
        key == self.framework_key() || key == self.config_key()
    }

    pub async fn ping(&self) -> Result<()> {
        let mut conn = self.pool.get().await.context("get redis connection")?;
        conn.ping::<String>().await.context("ping redis")?;
        Ok(())
    }

    pub async fn put(&self, record: &TaskRecord) -> Result<()> {
        let data = serde_json::to_vec(record).context("encode task record")?;
        let mut conn = self.pool.get().await.context("get redis connection")?;
        let _: () = conn
            .set(record.storage_key(), data)
            .await
            .with_context(|| format!("store task record {}", record.storage_key()))?;
        Ok(())
    }

    pub async fn get(&self, key: &str) -> Result<Option<TaskRecord>> {
        let mut conn = self.pool.get().await.context("get redis connection")?;
        let raw: Option<Vec<u8>> = conn
            .get(key)
            .await
            .with_context(|| format!("read task record {key}"))?;
        let Some(raw) = raw else { return Ok(None) };
        match serde_json::from_slice(&raw) {
            Ok(record) => Ok(Some(record)),
            Err(e) => {
                // A corrupt record is a protocol violation, not a reason to
                // stop scanning the rest.
                tracing::warn!(key, error = %e, "skipping undecodable task record");
                Ok(None)
            }
        }
    }

    pub async fn delete(&self, key: &str) -> Result<()> {
        let mut conn = self.pool.get().await.context("get redis connection")?;
        let _: i64 = conn
            .del(key)
            .await
            .with_context(|| format!("delete task record {key}"))?;
        Ok(())
    }

    /// All task keys under the given prefix. Weakly consistent: concurrent
    /// inserts may be missed, but no key is reported twice.
    pub async fn scan_keys(&self, pattern: &str) -> Result<Vec<String>> {
        let mut conn = self.pool.get().await.context("get redis connection")?;
        let mut keys = Vec::new();
        let mut cursor: u64 = 0;
        loop {
            let (next, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(pattern)
                .arg("COUNT")
                .arg(100)
                .query_async(&mut conn)
                .await
                .context("scan task keys")?;
            keys.extend(batch.into_iter().filter(|k| !self.is_singleton(k)));
            if next == 0 {
                break;
            }
            cursor = next;
        }
        Ok(keys)
    }

    pub async fn tasks(&self) -> Result<Vec<TaskRecord>> {
        let keys = self.scan_keys(&format!("{}:*", self.prefix)).await?;
        let mut records = Vec::with_capacity(keys.len());
        for key in keys {
            if let Some(record) = self.get(&key).await? {
                records.push(record);
            }
        }
        Ok(records)
    }

    pub async fn find_by_task_id(&self, task_id: &str) -> Result<Option<TaskRecord>> {
        Ok(self
            .tasks()
            .await?
            .into_iter()
            .find(|t| t.task_id == task_id))
    }

    /// Records for one `task_name` that count toward its replica total.
    /// Terminal records may linger but are not counted.
    pub async fn active_instances(&self, task_name: &str) -> Result<Vec<TaskRecord>> {
        let keys = self.scan_keys(&format!("{task_name}:*")).await?;
        let mut records = Vec::new();
        for key in keys {
            if let Some(record) = self.get(&key).await?
                && !record.state.is_terminal()
            {
                records.push(record);
            }
        }
        Ok(records)
    }

    pub async fn count_in_state(&self, task_name: &str, state: TaskState) -> Result<usize> {
        let keys = self.scan_keys(&format!("{task_name}:*")).await?;
        let mut count = 0;
        for key in keys {
            if let Some(record) = self.get(&key).await?
                && record.state == state
            {
                count += 1;
            }
        }
        Ok(count)
    }

    pub async fn save_framework(&self, framework: &FrameworkRecord) -> Result<()> {
        let data = serde_json::to_vec(framework).context("encode framework record")?;
        let mut conn = self.pool.get().await.context("get redis connection")?;
        let _: () = conn
            .set(self.framework_key(), data)
            .await
            .context("store framework record")?;
        Ok(())
    }

    pub async fn load_framework(&self) -> Result<Option<FrameworkRecord>> {
        let mut conn = self.pool.get().await.context("get redis connection")?;
        let raw: Option<Vec<u8>> = conn
            .get(self.framework_key())
            .await
            .context("read framework record")?;
        let Some(raw) = raw else { return Ok(None) };
        serde_json::from_slice(&raw)
            .map(Some)
            .context("decode framework record")
    }

    pub async fn save_config<T: Serialize>(&self, config: &T) -> Result<()> {
        let data = serde_json::to_vec(config).context("encode config snapshot")?;
        let mut conn = self.pool.get().await.context("get redis connection")?;
        let _: () = conn
            .set(self.config_key(), data)
            .await
            .context("store config snapshot")?;
        Ok(())
    }
}
