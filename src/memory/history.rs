//! 会话历史：仅追加、容量受限的回合日志
//!
//! 进程启动时 open 读取历史文件并开启新会话；append 是唯一的写入口，先持久化再更新内存，
//! 返回后即使进程崩溃也不会丢失该回合。容量上限作用于所有会话合计，超出时从最旧回合开始淘汰。
//! 每次写入都在文件锁内重新读取磁盘内容再合并，同时运行的多个实例不会互相覆盖。
//! 进程内读写通过 RwLock 串行化，读者总能看到完整回合的一致快照。

use std::path::Path;

use tokio::sync::RwLock;
use uuid::Uuid;

use crate::core::{Turn, TurnSummary};
use crate::memory::{HistoryError, HistoryFile};

/// 当前会话的历史句柄（跨会话共享同一个文件）
#[derive(Debug)]
pub struct SessionHistory {
    file: HistoryFile,
    session_id: Uuid,
    max_turns: usize,
    /// 全部会话的回合，最旧在前
    turns: RwLock<Vec<Turn>>,
}

impl SessionHistory {
    /// 打开历史文件并开启新会话
    ///
    /// 文件损坏时改名保留并从空历史开始；不可读时记录警告，之后的写入会返回错误而不是覆盖它。
    pub async fn open(path: impl AsRef<Path>, max_turns: usize) -> Self {
        let file = HistoryFile::new(path);
        let loaded = match file.lock().await {
            Ok(_guard) => file.load_or_quarantine().await,
            Err(e) => Err(e),
        };
        let mut turns = loaded.unwrap_or_else(|e| {
            tracing::warn!(path = %file.path().display(), "History load failed ({}), starting empty", e);
            Vec::new()
        });
        let max_turns = max_turns.max(1);
        evict_oldest(&mut turns, max_turns);

        let session_id = Uuid::new_v4();
        tracing::info!(%session_id, retained = turns.len(), "History session opened");
        Self {
            file,
            session_id,
            max_turns,
            turns: RwLock::new(turns),
        }
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    /// 追加已完成的回合：持久化成功后才对读者可见
    ///
    /// 在文件锁内重新读取磁盘上的全部回合（包括其它实例写入的），追加、淘汰后原子写回。
    pub async fn append(&self, turn: Turn) -> Result<(), HistoryError> {
        let mut guard = self.turns.write().await;
        let _lock = self.file.lock().await?;
        let mut next = self.file.load_or_quarantine().await?;
        next.push(turn);
        let evicted = evict_oldest(&mut next, self.max_turns);
        self.file.save(&next).await?;
        if evicted > 0 {
            tracing::debug!(evicted, "History retention cap reached, evicted oldest turns");
        }
        *guard = next;
        Ok(())
    }

    /// 当前会话最近的 limit 个回合，最新在前
    pub async fn list(&self, limit: usize) -> Vec<Turn> {
        let guard = self.turns.read().await;
        guard
            .iter()
            .rev()
            .filter(|t| t.session_id == self.session_id)
            .take(limit)
            .cloned()
            .collect()
    }

    /// 所有会话最近的 limit 个回合，最新在前
    pub async fn list_all(&self, limit: usize) -> Vec<Turn> {
        let guard = self.turns.read().await;
        guard.iter().rev().take(limit).cloned().collect()
    }

    /// 当前会话最近 n 个回合的摘要（时间顺序，最旧在前），作为推理上下文
    pub async fn recent_summaries(&self, n: usize) -> Vec<TurnSummary> {
        let mut summaries: Vec<TurnSummary> = self
            .list(n)
            .await
            .iter()
            .map(TurnSummary::from)
            .collect();
        summaries.reverse();
        summaries
    }

    /// 当前会话的回合数
    pub async fn len(&self) -> usize {
        let guard = self.turns.read().await;
        guard
            .iter()
            .filter(|t| t.session_id == self.session_id)
            .count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// 所有会话合计保留的回合数
    pub async fn total_len(&self) -> usize {
        self.turns.read().await.len()
    }

    /// 已保留回合中的最大 id，空历史为 0；新回合的 id 从它之后分配
    pub async fn last_id(&self) -> u64 {
        self.turns.read().await.iter().map(|t| t.id).max().unwrap_or(0)
    }

    /// 清空当前会话的回合，其它会话不受影响
    pub async fn clear(&self) -> Result<(), HistoryError> {
        let mut guard = self.turns.write().await;
        let _lock = self.file.lock().await?;
        let stored = self.file.load_or_quarantine().await?;
        let before = stored.len();
        let next: Vec<Turn> = stored
            .into_iter()
            .filter(|t| t.session_id != self.session_id)
            .collect();
        self.file.save(&next).await?;
        tracing::info!(removed = before - next.len(), "Session history cleared");
        *guard = next;
        Ok(())
    }

    /// 会话结束；每次 append 都已落盘，这里只确认文件仍可读
    pub async fn close(&self) -> Result<(), HistoryError> {
        let _guard = self.turns.read().await;
        let _lock = self.file.lock().await?;
        self.file.load().await?;
        tracing::info!(session_id = %self.session_id, "History session closed");
        Ok(())
    }
}

/// 超出上限时丢弃最旧的回合，返回淘汰数量
fn evict_oldest(turns: &mut Vec<Turn>, max_turns: usize) -> usize {
    if turns.len() > max_turns {
        let excess = turns.len() - max_turns;
        turns.drain(..excess);
        excess
    } else {
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Decision, TurnStatus};
    use std::time::Duration;
    use tempfile::TempDir;

    fn turn(history: &SessionHistory, id: u64) -> Turn {
        Turn {
            id,
            session_id: history.session_id(),
            request_text: format!("request {}", id),
            proposal: None,
            decision: Decision::NotRequired,
            outcomes: Vec::new(),
            status: TurnStatus::Executed,
            error: None,
            started_at: chrono::Utc::now(),
            llm_latency: None,
            total_latency: Duration::from_millis(5),
        }
    }

    fn ids(turns: &[Turn]) -> Vec<u64> {
        turns.iter().map(|t| t.id).collect()
    }

    #[tokio::test]
    async fn test_list_is_most_recent_first_and_idempotent() {
        let dir = TempDir::new().unwrap();
        let history = SessionHistory::open(dir.path().join("h.json"), 10).await;
        for id in 1..=4 {
            history.append(turn(&history, id)).await.unwrap();
        }

        let first = history.list(3).await;
        let second = history.list(3).await;
        assert_eq!(ids(&first), vec![4, 3, 2]);
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_retention_evicts_exactly_oldest() {
        let dir = TempDir::new().unwrap();
        let history = SessionHistory::open(dir.path().join("h.json"), 3).await;
        for id in 1..=3 {
            history.append(turn(&history, id)).await.unwrap();
        }
        assert_eq!(history.total_len().await, 3);

        history.append(turn(&history, 4)).await.unwrap();
        assert_eq!(history.total_len().await, 3);
        assert_eq!(ids(&history.list_all(10).await), vec![4, 3, 2]);
    }

    #[tokio::test]
    async fn test_retention_spans_sessions() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("h.json");

        let old = SessionHistory::open(&path, 3).await;
        old.append(turn(&old, 1)).await.unwrap();
        old.append(turn(&old, 2)).await.unwrap();
        old.close().await.unwrap();

        let current = SessionHistory::open(&path, 3).await;
        assert_ne!(old.session_id(), current.session_id());
        assert!(current.is_empty().await);
        current.append(turn(&current, 1)).await.unwrap();
        current.append(turn(&current, 2)).await.unwrap();

        let all = current.list_all(10).await;
        assert_eq!(all.len(), 3);
        assert_eq!(all[2].session_id, old.session_id());
        assert_eq!(all[2].id, 2);
    }

    #[tokio::test]
    async fn test_append_is_durable() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("h.json");
        let history = SessionHistory::open(&path, 10).await;
        let t = turn(&history, 1);
        history.append(t.clone()).await.unwrap();

        // 不调用 close，直接重新读取文件
        let reloaded = HistoryFile::new(&path).load().await.unwrap();
        assert_eq!(reloaded, vec![t]);
    }

    #[tokio::test]
    async fn test_clear_only_current_session() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("h.json");

        let old = SessionHistory::open(&path, 10).await;
        old.append(turn(&old, 1)).await.unwrap();

        let current = SessionHistory::open(&path, 10).await;
        current.append(turn(&current, 1)).await.unwrap();
        current.append(turn(&current, 2)).await.unwrap();
        current.clear().await.unwrap();

        assert!(current.list(10).await.is_empty());
        let remaining = HistoryFile::new(&path).load().await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].session_id, old.session_id());
    }

    #[tokio::test]
    async fn test_corrupt_file_is_kept_and_not_overwritten() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("h.json");
        let original = br#"{"turns": [ {"id": 1, "truncated"#;
        tokio::fs::write(&path, original).await.unwrap();

        let history = SessionHistory::open(&path, 10).await;
        assert_eq!(history.total_len().await, 0);
        history.append(turn(&history, 1)).await.unwrap();
        assert_eq!(history.total_len().await, 1);

        let names: Vec<String> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        let aside = names
            .iter()
            .find(|n| n.starts_with("h.json.corrupt-"))
            .expect("corrupt history was not kept");
        assert_eq!(std::fs::read(dir.path().join(aside)).unwrap(), original);
        assert_eq!(HistoryFile::new(&path).load().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_unreadable_file_is_never_overwritten() {
        let dir = TempDir::new().unwrap();
        // 历史路径是目录：读取报 I/O 错误
        let path = dir.path().join("h.json");
        std::fs::create_dir(&path).unwrap();

        let history = SessionHistory::open(&path, 10).await;
        let err = history.append(turn(&history, 1)).await.unwrap_err();
        assert!(matches!(err, HistoryError::Io(_)));
        assert!(path.is_dir());
        assert_eq!(history.total_len().await, 0);
    }

    #[tokio::test]
    async fn test_concurrent_instances_do_not_lose_turns() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("h.json");
        let a = SessionHistory::open(&path, 100).await;
        let b = SessionHistory::open(&path, 100).await;

        let (ra, rb) = tokio::join!(a.append(turn(&a, 1)), b.append(turn(&b, 2)));
        ra.unwrap();
        rb.unwrap();
        a.append(turn(&a, 3)).await.unwrap();

        let stored = HistoryFile::new(&path).load().await.unwrap();
        let mut stored_ids = ids(&stored);
        stored_ids.sort();
        assert_eq!(stored_ids, vec![1, 2, 3]);
        assert_eq!(ids(&a.list(10).await), vec![3, 1]);
        assert_eq!(ids(&b.list(10).await), vec![2]);
        a.close().await.unwrap();
        assert_eq!(HistoryFile::new(&path).load().await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_readers_see_consistent_snapshots_during_appends() {
        let dir = TempDir::new().unwrap();
        let history = std::sync::Arc::new(SessionHistory::open(dir.path().join("h.json"), 100).await);

        let writer = {
            let history = history.clone();
            tokio::spawn(async move {
                for id in 1..=20 {
                    history.append(turn(&history, id)).await.unwrap();
                }
            })
        };
        let readers: Vec<_> = (0..4)
            .map(|_| {
                let history = history.clone();
                tokio::spawn(async move {
                    for _ in 0..50 {
                        let listed = ids(&history.list(100).await);
                        // 总是 n, n-1, ..., 1：没有缺口，没有半个回合
                        let expected: Vec<u64> = (1..=listed.len() as u64).rev().collect();
                        assert_eq!(listed, expected);
                        tokio::task::yield_now().await;
                    }
                })
            })
            .collect();

        writer.await.unwrap();
        for reader in readers {
            reader.await.unwrap();
        }
        assert_eq!(history.len().await, 20);
    }

    #[tokio::test]
    async fn test_recent_summaries_are_chronological() {
        let dir = TempDir::new().unwrap();
        let history = SessionHistory::open(dir.path().join("h.json"), 10).await;
        for id in 1..=5 {
            history.append(turn(&history, id)).await.unwrap();
        }
        let summaries = history.recent_summaries(2).await;
        let requests: Vec<&str> = summaries.iter().map(|s| s.request.as_str()).collect();
        assert_eq!(requests, vec!["request 4", "request 5"]);
    }

    #[tokio::test]
    async fn test_last_id_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("h.json");
        let history = SessionHistory::open(&path, 10).await;
        assert_eq!(history.last_id().await, 0);
        history.append(turn(&history, 7)).await.unwrap();

        let reopened = SessionHistory::open(&path, 10).await;
        assert_eq!(reopened.last_id().await, 7);
        assert!(reopened.is_empty().await);
    }
}
