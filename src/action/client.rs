//! ActionClient：自然语言请求 → 结构化行动提议
//!
//! 能力接口，Orchestrator 只依赖 propose；具体传输（HTTP 推理服务 / LLM 直连）各自实现。
//! 实现方必须施加请求超时，超时或传输失败返回 Unreachable，结构不合法返回 InvalidResponse，
//! 且内部不做重试。

use async_trait::async_trait;

use crate::action::ActionProposal;
use crate::core::{AgentError, TurnSummary};

#[async_trait]
pub trait ActionClient: Send + Sync {
    /// prior_turns 为最近若干回合摘要，按时间顺序（最旧在前）
    async fn propose(
        &self,
        request_text: &str,
        prior_turns: &[TurnSummary],
    ) -> Result<ActionProposal, AgentError>;
}

/// 截断过长的服务端返回，用于错误消息
pub(crate) fn truncate_for_error(s: &str) -> String {
    const MAX_CHARS: usize = 300;
    let s = s.trim();
    if s.chars().count() > MAX_CHARS {
        format!("{}...", s.chars().take(MAX_CHARS).collect::<String>())
    } else {
        s.to_string()
    }
}
