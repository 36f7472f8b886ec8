//! 审批闸门：展示提议、阻塞等待人工决定
//!
//! 只有 Approved 的提议才会进入执行；等待期间收到取消信号一律视为 Rejected。
//! 默认回答为拒绝：空输入、EOF 或任何非 y / yes 的回答都是 Rejected。

pub mod console;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::action::ActionProposal;
use crate::core::Decision;

pub use console::{parse_answer, render_proposal, ConsoleApprovalGate};

/// 审批结果（闸门只会给出这两种）
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ApprovalDecision {
    Approved,
    Rejected,
}

impl From<ApprovalDecision> for Decision {
    fn from(d: ApprovalDecision) -> Self {
        match d {
            ApprovalDecision::Approved => Decision::Approved,
            ApprovalDecision::Rejected => Decision::Rejected,
        }
    }
}

#[async_trait]
pub trait ApprovalGate: Send + Sync {
    async fn confirm(&self, proposal: &ActionProposal, cancel: &CancellationToken) -> ApprovalDecision;
}

/// 固定结论的闸门（非交互场景与测试使用）；已取消时仍然拒绝
#[derive(Debug, Clone, Copy)]
pub struct FixedApprovalGate(pub ApprovalDecision);

#[async_trait]
impl ApprovalGate for FixedApprovalGate {
    async fn confirm(&self, _proposal: &ActionProposal, cancel: &CancellationToken) -> ApprovalDecision {
        if cancel.is_cancelled() {
            ApprovalDecision::Rejected
        } else {
            self.0
        }
    }
}
