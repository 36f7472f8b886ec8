//! 回合错误类型
//!
//! ActionClient 与 Executor 不会越过契约边界抛出错误，所有失败都以 AgentError 的形式返回；
//! 只有 Orchestrator 根据 ErrorKind 决定回合的终止状态。AgentError 可序列化，随 Turn 一起写入历史。

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::Turn;
use crate::memory::HistoryError;

/// 错误种类（不含消息），用于分支判断与展示
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    Unreachable,
    InvalidResponse,
    OperationFailed,
    Timeout,
    Rejected,
    Cancelled,
}

/// 回合或单个操作的类型化错误
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "message")]
pub enum AgentError {
    /// 推理服务不可达：连接失败、超时或非 2xx 状态
    #[error("Reasoning service unreachable: {0}")]
    Unreachable(String),

    /// 推理服务返回了结构不合法的提议
    #[error("Invalid proposal: {0}")]
    InvalidResponse(String),

    #[error("Operation failed: {0}")]
    OperationFailed(String),

    /// 操作超时（毫秒）
    #[error("Timed out after {}s", millis_as_secs(.0))]
    Timeout(u64),

    #[error("Rejected by operator")]
    Rejected,

    #[error("Cancelled by user")]
    Cancelled,
}

fn millis_as_secs(ms: &u64) -> f64 {
    *ms as f64 / 1000.0
}

impl AgentError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            AgentError::Unreachable(_) => ErrorKind::Unreachable,
            AgentError::InvalidResponse(_) => ErrorKind::InvalidResponse,
            AgentError::OperationFailed(_) => ErrorKind::OperationFailed,
            AgentError::Timeout(_) => ErrorKind::Timeout,
            AgentError::Rejected => ErrorKind::Rejected,
            AgentError::Cancelled => ErrorKind::Cancelled,
        }
    }
}

/// submit 在创建回合之前或记录回合时的失败
#[derive(Error, Debug)]
pub enum SubmitError {
    #[error("Request text is empty")]
    EmptyRequest,

    /// 回合已走完（操作可能已经执行）但未能持久化；turn 保留实际结果供展示
    #[error("Turn #{id} ran but could not be saved: {source}", id = .turn.id)]
    History {
        turn: Box<Turn>,
        #[source]
        source: HistoryError,
    },
}

impl SubmitError {
    /// 已走完但未保存的回合
    pub fn turn(&self) -> Option<&Turn> {
        match self {
            SubmitError::History { turn, .. } => Some(turn),
            SubmitError::EmptyRequest => None,
        }
    }
}
