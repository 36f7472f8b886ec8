//! 操作执行器
//!
//! 按提议顺序执行已审批的操作，遇到第一个失败立即停止（fail-fast）：
//! 返回的 outcomes 长度小于 operations 长度即表示中止。每个操作施加独立超时，
//! 并输出一条结构化审计日志（JSON）。执行器从不询问审批，它假定收到的操作都已获批。

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::action::{ActionOutcome, Operation};
use crate::core::AgentError;
use crate::tools::filesystem::{discard, open_new, resolve, write_new};
use crate::tools::shell::{run_command, CommandPolicy, CommandRun};

/// 执行器 trait：便于 Orchestrator 在测试中替换
#[async_trait]
pub trait ActionExecutor: Send + Sync {
    async fn execute(
        &self,
        operations: &[Operation],
        cancel: &CancellationToken,
    ) -> Vec<ActionOutcome>;
}

/// 在本机以当前用户权限执行操作
#[derive(Debug, Clone)]
pub struct LocalExecutor {
    workspace: PathBuf,
    timeout: Duration,
    policy: CommandPolicy,
}

impl LocalExecutor {
    pub fn new(workspace: impl AsRef<Path>, timeout_secs: u64) -> Self {
        Self {
            workspace: workspace.as_ref().to_path_buf(),
            timeout: Duration::from_secs(timeout_secs),
            policy: CommandPolicy::permissive(),
        }
    }

    pub fn with_policy(mut self, policy: CommandPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn timeout_error(&self) -> AgentError {
        AgentError::Timeout(self.timeout.as_millis() as u64)
    }

    async fn run_one(
        &self,
        idx: usize,
        op: &Operation,
        cancel: &CancellationToken,
    ) -> ActionOutcome {
        let start = Instant::now();
        match op {
            Operation::CreateFile { path, content } => {
                let target = resolve(&self.workspace, path);
                let file = match open_new(&target).await {
                    Ok(file) => file,
                    Err(e) => return ActionOutcome::failed(idx, e, start.elapsed()),
                };
                let created = tokio::select! {
                    res = tokio::time::timeout(self.timeout, write_new(file, &target, content)) => {
                        res.unwrap_or_else(|_| Err(self.timeout_error()))
                    }
                    _ = cancel.cancelled() => Err(AgentError::Cancelled),
                };
                // 写入 future 被中断时不会自行清理，文件是本次新建的，直接删除
                if matches!(created, Err(AgentError::Timeout(_) | AgentError::Cancelled)) {
                    discard(&target).await;
                }
                match created {
                    Ok(bytes) => ActionOutcome::file_created(idx, bytes, start.elapsed()),
                    Err(e) => ActionOutcome::failed(idx, e, start.elapsed()),
                }
            }
            Operation::RunCommand { command, args, cwd } => {
                if let Err(reason) = self.policy.check(command, args) {
                    return ActionOutcome::failed(
                        idx,
                        AgentError::OperationFailed(reason),
                        start.elapsed(),
                    );
                }
                let dir = cwd
                    .as_deref()
                    .map(|c| resolve(&self.workspace, c))
                    .unwrap_or_else(|| self.workspace.clone());

                match run_command(command, args, &dir, self.timeout, cancel).await {
                    Ok(CommandRun::Exited {
                        exit_code,
                        stdout,
                        stderr,
                    }) => ActionOutcome::command_exited(idx, exit_code, stdout, stderr, start.elapsed()),
                    Ok(CommandRun::TimedOut) => {
                        ActionOutcome::failed(idx, self.timeout_error(), start.elapsed())
                    }
                    Ok(CommandRun::Cancelled) => {
                        ActionOutcome::failed(idx, AgentError::Cancelled, start.elapsed())
                    }
                    Err(e) => ActionOutcome::failed(
                        idx,
                        AgentError::OperationFailed(format!("failed to start {}: {}", command, e)),
                        start.elapsed(),
                    ),
                }
            }
        }
    }
}

#[async_trait]
impl ActionExecutor for LocalExecutor {
    async fn execute(
        &self,
        operations: &[Operation],
        cancel: &CancellationToken,
    ) -> Vec<ActionOutcome> {
        let mut outcomes = Vec::with_capacity(operations.len());
        for (idx, op) in operations.iter().enumerate() {
            let outcome = if cancel.is_cancelled() {
                ActionOutcome::failed(idx, AgentError::Cancelled, Duration::ZERO)
            } else {
                self.run_one(idx, op, cancel).await
            };
            audit(idx, op, &outcome);

            let ok = outcome.is_success();
            outcomes.push(outcome);
            if !ok {
                tracing::warn!(
                    operation = idx,
                    skipped = operations.len() - idx - 1,
                    "Operation failed, aborting remaining operations"
                );
                break;
            }
        }
        outcomes
    }
}

fn audit(idx: usize, op: &Operation, outcome: &ActionOutcome) {
    let kind = match op {
        Operation::CreateFile { .. } => "create_file",
        Operation::RunCommand { .. } => "run_command",
    };
    let result = match &outcome.error {
        None => "ok",
        Some(AgentError::Timeout(_)) => "timeout",
        Some(AgentError::Cancelled) => "cancelled",
        Some(_) => "error",
    };
    let audit = serde_json::json!({
        "event": "operation_audit",
        "operation": idx,
        "kind": kind,
        "ok": outcome.is_success(),
        "outcome": result,
        "exit_code": outcome.exit_code,
        "bytes_written": outcome.bytes_written,
        "duration_ms": outcome.duration.as_millis() as u64,
        "target": preview(&op.to_string()),
    });
    tracing::info!(audit = %audit, "operation");
}

fn preview(s: &str) -> String {
    if s.chars().count() > 200 {
        format!("{}...", s.chars().take(200).collect::<String>())
    } else {
        s.to_string()
    }
}
