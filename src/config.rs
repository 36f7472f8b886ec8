//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `NECTAR__*` 覆盖（双下划线表示嵌套，如 `NECTAR__REASONING__PROVIDER=mock`）。

use std::path::PathBuf;

use serde::Deserialize;

use crate::tools::DEFAULT_FORBIDDEN_PATTERNS;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub app: AppSection,
    pub reasoning: ReasoningSection,
    pub tools: ToolsSection,
}

/// [app] 段：工作目录、历史文件、保留与上下文回合数
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppSection {
    /// 相对路径与命令 cwd 的基准目录，未设置时用当前目录
    pub workspace_root: Option<PathBuf>,
    /// 未设置时用 ~/.nectar/history.json
    pub history_file: Option<PathBuf>,
    /// 历史文件最多保留的回合数（所有会话合计）
    pub max_retained_turns: usize,
    /// 每次请求附带的历史回合数
    pub context_turns: usize,
}

impl Default for AppSection {
    fn default() -> Self {
        Self {
            workspace_root: None,
            history_file: None,
            max_retained_turns: 500,
            context_turns: 5,
        }
    }
}

/// [reasoning] 段：提议来源与超时
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ReasoningSection {
    /// service / openai / deepseek / mock
    pub provider: String,
    /// 推理服务地址（provider = service）
    pub base_url: String,
    /// OpenAI 兼容端点（provider = openai），未设置时用官方地址
    pub llm_base_url: Option<String>,
    pub model: Option<String>,
    pub request_timeout_secs: u64,
}

impl Default for ReasoningSection {
    fn default() -> Self {
        Self {
            provider: "service".to_string(),
            base_url: "http://127.0.0.1:30001".to_string(),
            llm_base_url: None,
            model: None,
            request_timeout_secs: 30,
        }
    }
}

/// [tools] 段：单操作超时与命令策略
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ToolsSection {
    pub tool_timeout_secs: u64,
    pub shell: ShellSection,
}

impl Default for ToolsSection {
    fn default() -> Self {
        Self {
            tool_timeout_secs: 60,
            shell: ShellSection::default(),
        }
    }
}

/// [tools.shell] 段：允许执行的程序名（为空表示不限制）与禁止子串
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ShellSection {
    pub allowed_commands: Vec<String>,
    pub forbidden_patterns: Vec<String>,
}

impl Default for ShellSection {
    fn default() -> Self {
        Self {
            allowed_commands: Vec::new(),
            forbidden_patterns: DEFAULT_FORBIDDEN_PATTERNS.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl AppConfig {
    pub fn workspace_root(&self) -> PathBuf {
        self.app
            .workspace_root
            .clone()
            .or_else(|| std::env::current_dir().ok())
            .unwrap_or_else(|| PathBuf::from("."))
    }

    /// 历史文件路径；无法确定 home 目录时退回当前目录下的 .nectar/history.json
    pub fn history_path(&self) -> PathBuf {
        if let Some(path) = &self.app.history_file {
            return path.clone();
        }
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".nectar")
            .join("history.json")
    }
}

/// 从 config 目录加载配置，环境变量 NECTAR__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 NECTAR__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("NECTAR")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.app.max_retained_turns, 500);
        assert_eq!(cfg.app.context_turns, 5);
        assert_eq!(cfg.reasoning.provider, "service");
        assert_eq!(cfg.reasoning.base_url, "http://127.0.0.1:30001");
        assert_eq!(cfg.tools.tool_timeout_secs, 60);
        assert!(cfg.tools.shell.allowed_commands.is_empty());
        assert!(!cfg.tools.shell.forbidden_patterns.is_empty());
        assert!(cfg.history_path().ends_with(".nectar/history.json"));
    }

    #[test]
    fn test_explicit_file_overrides_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("custom.toml");
        std::fs::write(
            &path,
            r#"
[app]
history_file = "/tmp/nectar-test/history.json"
max_retained_turns = 3

[reasoning]
provider = "mock"

[tools.shell]
allowed_commands = ["ls", "kubectl"]
"#,
        )
        .unwrap();

        let cfg = load_config(Some(path)).unwrap();
        assert_eq!(cfg.app.max_retained_turns, 3);
        assert_eq!(cfg.app.context_turns, 5);
        assert_eq!(cfg.reasoning.provider, "mock");
        assert_eq!(cfg.tools.shell.allowed_commands, vec!["ls", "kubectl"]);
        assert_eq!(cfg.history_path(), PathBuf::from("/tmp/nectar-test/history.json"));
    }
}
