//! 回合状态机的阶段定义
//!
//! Received → Proposing → AwaitingApproval → Executing → Recorded；
//! 任何阶段失败或被拒绝都直接进入 Recorded。两次回合之间处于 Idle。

use serde::Serialize;

/// Orchestrator 当前所处阶段
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum TurnPhase {
    Idle,
    Received,
    Proposing,
    AwaitingApproval,
    Executing,
    Recorded,
}

impl TurnPhase {
    /// 是否允许从当前阶段迁移到 next
    pub fn can_advance_to(self, next: TurnPhase) -> bool {
        use TurnPhase::{AwaitingApproval, Executing, Idle, Proposing, Received, Recorded};
        matches!(
            (self, next),
            (Idle, Received)
                | (Received, Proposing)
                | (Proposing, AwaitingApproval)
                | (AwaitingApproval, Executing)
                | (Received | Proposing | AwaitingApproval | Executing, Recorded)
                | (Recorded, Idle)
        )
    }

    /// 回合进行中：不接受新的请求
    pub fn is_busy(self) -> bool {
        !matches!(self, TurnPhase::Idle)
    }
}
