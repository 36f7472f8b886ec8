//! 会话监管：生命周期、中断管理
//!
//! 会话级 CancellationToken 在退出时取消；每个回合从它派生子 token，
//! 用户 Ctrl+C 只取消当前回合，不影响后续回合。

use std::sync::Mutex;

use tokio_util::sync::CancellationToken;

/// 会话级取消令牌与当前回合令牌
#[derive(Debug)]
pub struct SessionSupervisor {
    /// 会话结束时触发
    session_token: CancellationToken,
    current_turn: Mutex<Option<CancellationToken>>,
}

impl SessionSupervisor {
    pub fn new() -> Self {
        Self {
            session_token: CancellationToken::new(),
            current_turn: Mutex::new(None),
        }
    }

    /// 为新回合创建子 token（会话取消时一并取消）
    pub fn begin_turn(&self) -> CancellationToken {
        let token = self.session_token.child_token();
        if let Ok(mut current) = self.current_turn.lock() {
            *current = Some(token.clone());
        }
        token
    }

    /// 取消当前回合（用户 Ctrl+C）；无进行中回合时返回 false
    pub fn cancel_turn(&self) -> bool {
        let current = self.current_turn.lock().ok().and_then(|c| c.clone());
        match current {
            Some(token) if !token.is_cancelled() => {
                tracing::info!("Cancelling current turn");
                token.cancel();
                true
            }
            _ => false,
        }
    }

    pub fn end_turn(&self) {
        if let Ok(mut current) = self.current_turn.lock() {
            *current = None;
        }
    }

    /// 结束整个会话
    pub fn shutdown(&self) {
        self.session_token.cancel();
    }

    pub fn is_shutdown(&self) -> bool {
        self.session_token.is_cancelled()
    }

    /// 会话级 token，供等待输入的循环感知退出
    pub fn session_token(&self) -> CancellationToken {
        self.session_token.clone()
    }
}

impl Default for SessionSupervisor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancel_only_affects_current_turn() {
        let supervisor = SessionSupervisor::new();
        let first = supervisor.begin_turn();
        assert!(supervisor.cancel_turn());
        assert!(first.is_cancelled());
        supervisor.end_turn();

        let second = supervisor.begin_turn();
        assert!(!second.is_cancelled());
        assert!(!supervisor.is_shutdown());
    }

    #[test]
    fn test_cancel_without_turn_is_noop() {
        let supervisor = SessionSupervisor::new();
        assert!(!supervisor.cancel_turn());
    }

    #[test]
    fn test_shutdown_cancels_turn_tokens() {
        let supervisor = SessionSupervisor::new();
        let token = supervisor.begin_turn();
        supervisor.shutdown();
        assert!(token.is_cancelled());
        assert!(supervisor.is_shutdown());
    }
}
