//! 编排器：驱动单个回合走完 请求 → 提议 → 审批 → 执行 → 记录
//!
//! 只有编排器决定回合的终止状态，也只有它写入 SessionHistory。每个回合恰好记录一次，
//! 失败不自动重试。`submit` 需要 `&mut self`，同一会话不会出现重叠的回合。

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio_util::sync::CancellationToken;

use crate::action::{ActionClient, ActionOutcome, ActionProposal};
use crate::approval::{ApprovalDecision, ApprovalGate};
use crate::core::{AgentError, Decision, SubmitError, Turn, TurnPhase, TurnStatus};
use crate::memory::SessionHistory;
use crate::tools::ActionExecutor;

/// 回合在终止前累积的中间结果
struct Draft {
    proposal: Option<ActionProposal>,
    decision: Decision,
    outcomes: Vec<ActionOutcome>,
    status: TurnStatus,
    error: Option<AgentError>,
    llm_latency: Option<Duration>,
}

pub struct Orchestrator {
    client: Arc<dyn ActionClient>,
    gate: Arc<dyn ApprovalGate>,
    executor: Arc<dyn ActionExecutor>,
    history: Arc<SessionHistory>,
    /// 随请求发送的历史回合数
    context_turns: usize,
    next_id: u64,
    phase: TurnPhase,
}

impl Orchestrator {
    /// 回合 id 接着历史文件中已有的最大 id 分配
    pub async fn new(
        client: Arc<dyn ActionClient>,
        gate: Arc<dyn ApprovalGate>,
        executor: Arc<dyn ActionExecutor>,
        history: Arc<SessionHistory>,
        context_turns: usize,
    ) -> Self {
        let next_id = history.last_id().await + 1;
        Self {
            client,
            gate,
            executor,
            history,
            context_turns,
            next_id,
            phase: TurnPhase::Idle,
        }
    }

    pub fn phase(&self) -> TurnPhase {
        self.phase
    }

    pub fn history(&self) -> &Arc<SessionHistory> {
        &self.history
    }

    fn advance(&mut self, next: TurnPhase) {
        debug_assert!(
            self.phase.can_advance_to(next),
            "illegal transition {:?} -> {:?}",
            self.phase,
            next
        );
        tracing::debug!(from = ?self.phase, to = ?next, "turn phase");
        self.phase = next;
    }

    /// 处理一次用户请求，返回已记录的回合
    ///
    /// 空请求在创建回合之前就被拒绝；其余情况总会产生并记录一个回合，
    /// 仅当历史无法落盘时返回 `SubmitError::History`。
    pub async fn submit(
        &mut self,
        request_text: &str,
        cancel: CancellationToken,
    ) -> Result<Turn, SubmitError> {
        let request_text = request_text.trim();
        if request_text.is_empty() {
            return Err(SubmitError::EmptyRequest);
        }

        if self.phase.is_busy() {
            // 上一个 submit 的 future 在中途被丢弃
            tracing::warn!(phase = ?self.phase, "previous turn was abandoned, resetting");
            self.phase = TurnPhase::Idle;
        }

        let id = self.next_id;
        self.next_id += 1;
        let started_at = Utc::now();
        let start = Instant::now();
        tracing::info!(turn_id = id, "turn received");
        self.advance(TurnPhase::Received);

        let draft = self.run_stages(request_text, &cancel).await;

        self.advance(TurnPhase::Recorded);
        let turn = Turn {
            id,
            session_id: self.history.session_id(),
            request_text: request_text.to_string(),
            proposal: draft.proposal,
            decision: draft.decision,
            outcomes: draft.outcomes,
            status: draft.status,
            error: draft.error,
            started_at,
            llm_latency: draft.llm_latency,
            total_latency: start.elapsed(),
        };
        let appended = self.history.append(turn.clone()).await;
        self.advance(TurnPhase::Idle);

        tracing::info!(
            turn_id = id,
            status = ?turn.status,
            decision = ?turn.decision,
            duration_ms = turn.total_latency.as_millis() as u64,
            "turn recorded"
        );
        match appended {
            Ok(()) => Ok(turn),
            Err(source) => {
                tracing::error!(turn_id = id, "failed to record turn: {}", source);
                Err(SubmitError::History {
                    turn: Box::new(turn),
                    source,
                })
            }
        }
    }

    async fn run_stages(&mut self, request_text: &str, cancel: &CancellationToken) -> Draft {
        let mut draft = Draft {
            proposal: None,
            decision: Decision::NotRequired,
            outcomes: Vec::new(),
            status: TurnStatus::Failed,
            error: None,
            llm_latency: None,
        };

        self.advance(TurnPhase::Proposing);
        let context = self.history.recent_summaries(self.context_turns).await;
        let llm_start = Instant::now();
        let proposed = tokio::select! {
            res = self.client.propose(request_text, &context) => res,
            _ = cancel.cancelled() => Err(AgentError::Cancelled),
        };
        draft.llm_latency = Some(llm_start.elapsed());

        let proposal = match proposed {
            Ok(p) => p,
            Err(AgentError::Cancelled) => {
                tracing::info!("turn cancelled while proposing");
                draft.status = TurnStatus::Rejected;
                draft.error = Some(AgentError::Cancelled);
                return draft;
            }
            Err(e) => {
                tracing::warn!("proposal failed: {}", e);
                draft.error = Some(e);
                return draft;
            }
        };

        if proposal.is_empty() {
            draft.status = TurnStatus::Executed;
            draft.proposal = Some(proposal);
            return draft;
        }

        self.advance(TurnPhase::AwaitingApproval);
        let answer = self.gate.confirm(&proposal, cancel).await;
        draft.decision = answer.into();
        if answer == ApprovalDecision::Rejected {
            draft.status = TurnStatus::Rejected;
            draft.error = Some(if cancel.is_cancelled() {
                AgentError::Cancelled
            } else {
                AgentError::Rejected
            });
            draft.proposal = Some(proposal);
            return draft;
        }

        self.advance(TurnPhase::Executing);
        let outcomes = self.executor.execute(proposal.operations(), cancel).await;
        let all_ok = outcomes.len() == proposal.operations().len()
            && outcomes.iter().all(ActionOutcome::is_success);
        if all_ok {
            draft.status = TurnStatus::Executed;
        } else {
            draft.error = outcomes
                .iter()
                .find(|o| !o.is_success())
                .and_then(|o| o.error.clone())
                .or_else(|| {
                    Some(AgentError::OperationFailed(format!(
                        "{} of {} operation(s) completed",
                        outcomes.len(),
                        proposal.operations().len()
                    )))
                });
        }
        draft.outcomes = outcomes;
        draft.proposal = Some(proposal);
        draft
    }
}
