//! LLM 直连的 ActionClient
//!
//! 不经过推理服务，直接让 OpenAI 兼容模型按 JSON schema 输出提议；
//! 从回复中提取 JSON 块（```json ... ``` 或首个 { 到末个 }），再与 HTTP 客户端走同一套校验。

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;

use crate::action::client::truncate_for_error;
use crate::action::{parse_proposal, ActionClient, ActionProposal};
use crate::core::{AgentError, TurnSummary};
use crate::llm::{LlmClient, Message};

pub const DEFAULT_SYSTEM_PROMPT: &str = r#"You turn the user's request into a plan of local actions.
Reply with a single JSON object and nothing else:
{"summary": "<one sentence>", "operations": [
  {"type": "create_file", "path": "<relative path>", "content": "<file content>"},
  {"type": "run_command", "command": "<program>", "args": ["<arg>", ...], "cwd": null}
]}
Commands are started directly, not through a shell. Use an empty "operations" list when nothing needs to run."#;

/// 从 LLM 文本输出中截取 JSON 片段
fn extract_json(output: &str) -> Option<&str> {
    let trimmed = output.trim();
    if let Some(start) = trimmed.find("```json") {
        let rest = &trimmed[start + 7..];
        return Some(rest.find("```").map(|end| rest[..end].trim()).unwrap_or(rest.trim()));
    }
    let start = trimmed.find('{')?;
    let end = trimmed.rfind('}')?;
    (end > start).then(|| &trimmed[start..=end])
}

/// 基于 LlmClient 的提议客户端
pub struct LlmActionClient {
    llm: Arc<dyn LlmClient>,
    timeout: Duration,
}

impl LlmActionClient {
    pub fn new(llm: Arc<dyn LlmClient>, timeout: Duration) -> Self {
        Self { llm, timeout }
    }

    /// system + 历史回合（user 请求 / assistant 摘要）+ 当前请求
    fn build_messages(&self, request_text: &str, prior_turns: &[TurnSummary]) -> Vec<Message> {
        let mut messages = vec![Message::system(DEFAULT_SYSTEM_PROMPT.to_string())];
        for turn in prior_turns {
            messages.push(Message::user(turn.request.clone()));
            let reply = match &turn.summary {
                Some(summary) => format!("{} (decision: {:?}, status: {:?})", summary, turn.decision, turn.status),
                None => format!("(no proposal, status: {:?})", turn.status),
            };
            messages.push(Message::assistant(reply));
        }
        messages.push(Message::user(request_text.to_string()));
        messages
    }
}

#[async_trait]
impl ActionClient for LlmActionClient {
    async fn propose(
        &self,
        request_text: &str,
        prior_turns: &[TurnSummary],
    ) -> Result<ActionProposal, AgentError> {
        let messages = self.build_messages(request_text, prior_turns);
        let start = Instant::now();
        let reply = tokio::time::timeout(self.timeout, self.llm.complete(&messages))
            .await
            .map_err(|_| {
                AgentError::Unreachable(format!("no response within {}s", self.timeout.as_secs_f64()))
            })?
            .map_err(AgentError::Unreachable)?;
        let (_, _, total_tokens) = self.llm.token_usage();
        tracing::info!(latency_ms = start.elapsed().as_millis() as u64, total_tokens, "llm proposal received");

        let json = extract_json(&reply).ok_or_else(|| {
            AgentError::InvalidResponse(format!("no JSON object in reply: {}", truncate_for_error(&reply)))
        })?;
        let value: serde_json::Value = serde_json::from_str(json)
            .map_err(|e| AgentError::InvalidResponse(format!("{}: {}", e, truncate_for_error(json))))?;
        parse_proposal(value)
    }
}
