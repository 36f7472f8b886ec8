//! 回合（Turn）：一次 请求 → 提议 → 审批 → 执行 → 记录 的完整周期
//!
//! Turn 只在到达终止状态后由 Orchestrator 生成，之后不可变并写入 SessionHistory。

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::action::{ActionOutcome, ActionProposal};
use crate::core::AgentError;

/// 审批结论；没有提议或提议不含操作时为 NotRequired
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Decision {
    Approved,
    Rejected,
    NotRequired,
}

/// 回合终止状态
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TurnStatus {
    Executed,
    Rejected,
    Failed,
}

/// 已记录的回合
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    pub id: u64,
    pub session_id: Uuid,
    pub request_text: String,
    pub proposal: Option<ActionProposal>,
    pub decision: Decision,
    pub outcomes: Vec<ActionOutcome>,
    pub status: TurnStatus,
    pub error: Option<AgentError>,
    pub started_at: DateTime<Utc>,
    /// 推理服务调用的墙钟耗时；未发起调用时为 None
    pub llm_latency: Option<Duration>,
    pub total_latency: Duration,
}

impl Turn {
    /// 执行失败的那一个操作（若有）
    pub fn failed_outcome(&self) -> Option<&ActionOutcome> {
        self.outcomes.iter().find(|o| !o.is_success())
    }

    /// 面向用户的终止信息：成功、拒绝、远端失败、部分执行失败各不相同，
    /// 始终说明副作用操作是否已经运行
    pub fn describe(&self) -> String {
        match self.status {
            TurnStatus::Executed => match &self.proposal {
                Some(p) if !p.is_empty() => format!(
                    "Done: {} operation(s) executed in {:.2}s.",
                    self.outcomes.len(),
                    self.total_latency.as_secs_f64()
                ),
                Some(p) => format!("Nothing to execute: {}", p.summary()),
                None => "Nothing to execute.".to_string(),
            },
            TurnStatus::Rejected => match &self.error {
                Some(AgentError::Cancelled) if self.proposal.is_none() => {
                    "Cancelled before a proposal was made; nothing was executed.".to_string()
                }
                Some(AgentError::Cancelled) => {
                    "Cancelled while awaiting approval; nothing was executed.".to_string()
                }
                _ => "Rejected; nothing was executed.".to_string(),
            },
            TurnStatus::Failed => {
                let total = self
                    .proposal
                    .as_ref()
                    .map(|p| p.operations().len())
                    .unwrap_or(0);
                match (self.failed_outcome(), &self.error) {
                    (Some(outcome), _) => {
                        let reason = outcome
                            .error
                            .as_ref()
                            .map(|e| e.to_string())
                            .unwrap_or_else(|| "unknown error".to_string());
                        let stderr = outcome
                            .stderr
                            .as_deref()
                            .map(str::trim)
                            .filter(|s| !s.is_empty())
                            .map(|s| format!("\nstderr: {}", s))
                            .unwrap_or_default();
                        format!(
                            "Operation #{} failed: {}. {} of {} operation(s) ran; the rest were skipped.{}",
                            outcome.operation_ref + 1,
                            reason,
                            self.outcomes.len(),
                            total,
                            stderr
                        )
                    }
                    (None, Some(err)) => format!("{}; nothing was executed.", err),
                    (None, None) => "Turn failed; nothing was executed.".to_string(),
                }
            }
        }
    }
}

/// 发送给推理服务的上文条目（精简的历史回合）
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TurnSummary {
    pub request: String,
    pub summary: Option<String>,
    pub decision: Decision,
    pub status: TurnStatus,
}

impl From<&Turn> for TurnSummary {
    fn from(turn: &Turn) -> Self {
        Self {
            request: turn.request_text.clone(),
            summary: turn.proposal.as_ref().map(|p| p.summary().to_string()),
            decision: turn.decision,
            status: turn.status,
        }
    }
}
