//! HTTP 推理服务客户端
//!
//! POST {base_url}/analyze，请求体 {"text", "context"}；整个调用（连接、发送、读取响应体）
//! 受同一个超时约束。响应先按 JSON 解析，再经 parse_proposal 校验结构。

use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::Serialize;

use crate::action::client::truncate_for_error;
use crate::action::{parse_proposal, ActionClient, ActionProposal};
use crate::core::{AgentError, TurnSummary};

#[derive(Serialize)]
struct AnalyzeRequest<'a> {
    text: &'a str,
    context: &'a [TurnSummary],
}

/// 调用远端 /analyze 的 ActionClient
#[derive(Debug, Clone)]
pub struct HttpActionClient {
    http: reqwest::Client,
    endpoint: String,
    timeout: Duration,
}

impl HttpActionClient {
    pub fn new(base_url: &str, timeout: Duration) -> Self {
        Self {
            http: reqwest::Client::new(),
            endpoint: format!("{}/analyze", base_url.trim_end_matches('/')),
            timeout,
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn call(
        &self,
        request_text: &str,
        prior_turns: &[TurnSummary],
    ) -> Result<ActionProposal, AgentError> {
        let body = AnalyzeRequest {
            text: request_text,
            context: prior_turns,
        };
        let resp = self
            .http
            .post(&self.endpoint)
            .json(&body)
            .send()
            .await
            .map_err(|e| AgentError::Unreachable(format!("{}: {}", self.endpoint, e)))?;

        let status = resp.status();
        let bytes = resp
            .bytes()
            .await
            .map_err(|e| AgentError::Unreachable(format!("reading response failed: {}", e)))?;

        if !status.is_success() {
            return Err(AgentError::Unreachable(format!(
                "HTTP {}: {}",
                status.as_u16(),
                truncate_for_error(&String::from_utf8_lossy(&bytes))
            )));
        }

        let value: serde_json::Value = serde_json::from_slice(&bytes)
            .map_err(|e| AgentError::InvalidResponse(format!("response is not JSON: {}", e)))?;
        parse_proposal(value)
    }
}

#[async_trait]
impl ActionClient for HttpActionClient {
    async fn propose(
        &self,
        request_text: &str,
        prior_turns: &[TurnSummary],
    ) -> Result<ActionProposal, AgentError> {
        let start = Instant::now();
        let result = tokio::time::timeout(self.timeout, self.call(request_text, prior_turns))
            .await
            .unwrap_or_else(|_| {
                Err(AgentError::Unreachable(format!(
                    "no response within {}s",
                    self.timeout.as_secs_f64()
                )))
            });
        let latency_ms = start.elapsed().as_millis() as u64;
        match &result {
            Ok(p) => tracing::info!(latency_ms, operations = p.operations().len(), "proposal received"),
            Err(e) => tracing::warn!(latency_ms, "propose failed: {}", e),
        }
        result
    }
}
