//! 历史持久化
//!
//! 单文件 JSON：{"turns": [...]}。写入先落到同目录唯一命名的临时文件、fsync，再原子 rename 覆盖，
//! 进程在任意时刻崩溃都不会留下写了一半的历史文件。
//! 多个进程共享同一个历史文件：读-改-写期间持有 `<name>.lock` 上的独占锁（fs2）。
//! 无法解析的历史文件会被改名保留（`<name>.corrupt-<时间戳>`），绝不被覆盖。

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

use crate::core::Turn;

/// 历史存储错误
#[derive(Error, Debug)]
pub enum HistoryError {
    #[error("History I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("History serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

#[derive(Deserialize)]
struct StoredHistory {
    #[serde(default)]
    turns: Vec<Turn>,
}

#[derive(Serialize)]
struct StoredHistoryRef<'a> {
    turns: &'a [Turn],
}

/// 历史文件锁的守卫；文件句柄关闭时锁随之释放
#[derive(Debug)]
pub struct HistoryLock {
    file: File,
}

impl Drop for HistoryLock {
    fn drop(&mut self) {
        use fs2::FileExt;
        let _ = self.file.unlock();
    }
}

/// 历史文件句柄
#[derive(Debug, Clone)]
pub struct HistoryFile {
    path: PathBuf,
}

impl HistoryFile {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn sibling(&self, suffix: &str) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "history.json".into());
        name.push(suffix);
        self.path.with_file_name(name)
    }

    fn tmp_path(&self) -> PathBuf {
        self.sibling(&format!(".{}.tmp", Uuid::new_v4().simple()))
    }

    pub fn lock_path(&self) -> PathBuf {
        self.sibling(".lock")
    }

    /// 获取跨进程独占锁；返回的守卫 drop 时释放
    pub async fn lock(&self) -> Result<HistoryLock, HistoryError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let lock_path = self.lock_path();
        let file = tokio::task::spawn_blocking(move || -> std::io::Result<File> {
            use fs2::FileExt;
            let file = OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .truncate(false)
                .open(&lock_path)?;
            file.lock_exclusive()?;
            Ok(file)
        })
        .await
        .map_err(std::io::Error::other)??;
        Ok(HistoryLock { file })
    }

    /// 把无法解析的历史文件改名保留，返回新路径
    pub async fn quarantine(&self) -> Result<PathBuf, HistoryError> {
        let stamp = chrono::Utc::now().format("%Y%m%dT%H%M%S%.3fZ");
        let aside = self.sibling(&format!(".corrupt-{}", stamp));
        tokio::fs::rename(&self.path, &aside).await?;
        Ok(aside)
    }

    /// 读取全部回合；文件损坏时先改名保留再按空历史处理，其余错误原样返回
    pub async fn load_or_quarantine(&self) -> Result<Vec<Turn>, HistoryError> {
        match self.load().await {
            Err(HistoryError::Serde(e)) => {
                let aside = self.quarantine().await?;
                tracing::warn!(
                    path = %self.path.display(),
                    moved_to = %aside.display(),
                    "History file unreadable ({}), kept aside and starting empty",
                    e
                );
                Ok(Vec::new())
            }
            other => other,
        }
    }

    /// 读取全部回合（最旧在前）；文件不存在时返回空 Vec
    pub async fn load(&self) -> Result<Vec<Turn>, HistoryError> {
        let data = match tokio::fs::read(&self.path).await {
            Ok(d) => d,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let stored: StoredHistory = serde_json::from_slice(&data)?;
        Ok(stored.turns)
    }

    /// 原子写入全部回合；父目录不存在时自动创建
    pub async fn save(&self, turns: &[Turn]) -> Result<(), HistoryError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let json = serde_json::to_vec_pretty(&StoredHistoryRef { turns })?;

        let tmp = self.tmp_path();
        let mut file = tokio::fs::File::create(&tmp).await?;
        file.write_all(&json).await?;
        file.sync_all().await?;
        drop(file);

        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}
