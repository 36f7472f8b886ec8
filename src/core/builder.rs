//! 组装：按配置选择推理后端，创建执行器与历史，构建 Orchestrator
//!
//! 单次执行与 REPL 共用同一套组装逻辑，只有审批闸门由调用方传入。

use std::sync::Arc;
use std::time::Duration;

use crate::action::{ActionClient, HttpActionClient, LlmActionClient};
use crate::approval::ApprovalGate;
use crate::config::AppConfig;
use crate::core::Orchestrator;
use crate::llm::{LlmClient, MockLlmClient, OpenAiClient, DEEPSEEK_CHAT};
use crate::memory::SessionHistory;
use crate::tools::{CommandPolicy, LocalExecutor};

/// 根据 reasoning.provider 与环境变量选择提议来源（推理服务 / DeepSeek / OpenAI 兼容 / Mock）
pub fn client_from_config(cfg: &AppConfig) -> Arc<dyn ActionClient> {
    let reasoning = &cfg.reasoning;
    let timeout = Duration::from_secs(reasoning.request_timeout_secs.max(1));
    let provider = reasoning.provider.to_lowercase();

    let llm: Arc<dyn LlmClient> = match provider.as_str() {
        "deepseek" if std::env::var("DEEPSEEK_API_KEY").is_ok() => {
            let model = reasoning.model.as_deref().unwrap_or(DEEPSEEK_CHAT);
            tracing::info!("Using DeepSeek LLM ({})", model);
            Arc::new(OpenAiClient::deepseek(Some(model)))
        }
        "openai" if std::env::var("OPENAI_API_KEY").is_ok() => {
            let model = reasoning.model.as_deref().unwrap_or("gpt-4o-mini");
            tracing::info!("Using OpenAI LLM ({})", model);
            Arc::new(OpenAiClient::new(
                reasoning.llm_base_url.as_deref(),
                model,
                std::env::var("OPENAI_API_KEY").ok().as_deref(),
            ))
        }
        "mock" => Arc::new(MockLlmClient),
        "deepseek" | "openai" => {
            tracing::warn!("No API key set for provider {}, using Mock LLM", provider);
            Arc::new(MockLlmClient)
        }
        other => {
            if other != "service" {
                tracing::warn!("Unknown provider {}, using reasoning service", other);
            }
            tracing::info!("Using reasoning service at {}", reasoning.base_url);
            return Arc::new(HttpActionClient::new(&reasoning.base_url, timeout));
        }
    };
    Arc::new(LlmActionClient::new(llm, timeout))
}

/// 按配置创建执行器：工作目录、单操作超时、命令策略
pub fn executor_from_config(cfg: &AppConfig) -> LocalExecutor {
    let shell = &cfg.tools.shell;
    let policy = CommandPolicy::new(shell.allowed_commands.clone(), shell.forbidden_patterns.clone());
    LocalExecutor::new(cfg.workspace_root(), cfg.tools.tool_timeout_secs.max(1)).with_policy(policy)
}

/// 打开历史文件并组装完整的 Orchestrator
pub async fn build_orchestrator(cfg: &AppConfig, gate: Arc<dyn ApprovalGate>) -> Orchestrator {
    let history = Arc::new(SessionHistory::open(cfg.history_path(), cfg.app.max_retained_turns).await);
    Orchestrator::new(
        client_from_config(cfg),
        gate,
        Arc::new(executor_from_config(cfg)),
        history,
        cfg.app.context_turns,
    )
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::approval::{ApprovalDecision, FixedApprovalGate};
    use crate::core::TurnPhase;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_build_from_defaults_uses_history_path() {
        let dir = TempDir::new().unwrap();
        let mut cfg = AppConfig::default();
        cfg.app.history_file = Some(dir.path().join("nested/history.json"));
        cfg.app.workspace_root = Some(dir.path().to_path_buf());

        let orchestrator =
            build_orchestrator(&cfg, Arc::new(FixedApprovalGate(ApprovalDecision::Rejected))).await;
        assert_eq!(orchestrator.phase(), TurnPhase::Idle);
        assert!(orchestrator.history().is_empty().await);
    }
}
