//! 行动提议与执行结果
//!
//! ActionProposal 由推理服务返回，经 parse_proposal 校验后才能进入审批；
//! Operation 是封闭的两种变体，未知变体在校验阶段即判为 InvalidResponse，而不是拖到执行时。

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::AgentError;

/// 单个具体操作
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Operation {
    /// 新建文件；目标已存在时失败，不会覆盖
    CreateFile { path: PathBuf, content: String },
    /// 直接启动子进程（不经过 shell）；cwd 缺省为工作目录
    RunCommand {
        command: String,
        #[serde(default)]
        args: Vec<String>,
        #[serde(default)]
        cwd: Option<PathBuf>,
    },
}

impl Operation {
    fn validate(&self) -> Result<(), String> {
        match self {
            Operation::CreateFile { path, .. } if path.as_os_str().is_empty() => {
                Err("create_file has an empty path".to_string())
            }
            Operation::RunCommand { command, .. } if command.trim().is_empty() => {
                Err("run_command has an empty command".to_string())
            }
            _ => Ok(()),
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::CreateFile { path, content } => {
                write!(f, "create_file {} ({} bytes)", path.display(), content.len())
            }
            Operation::RunCommand { command, args, cwd } => {
                write!(f, "run_command {}", command)?;
                for arg in args {
                    write!(f, " {}", arg)?;
                }
                if let Some(cwd) = cwd {
                    write!(f, " (cwd: {})", cwd.display())?;
                }
                Ok(())
            }
        }
    }
}

/// 结构化行动计划；operations 创建后不可变，只能整体按序执行或完全不执行
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionProposal {
    summary: String,
    operations: Vec<Operation>,
}

impl ActionProposal {
    pub fn new(summary: impl Into<String>, operations: Vec<Operation>) -> Result<Self, AgentError> {
        for (idx, op) in operations.iter().enumerate() {
            op.validate()
                .map_err(|e| AgentError::InvalidResponse(format!("operation #{}: {}", idx, e)))?;
        }
        Ok(Self {
            summary: summary.into(),
            operations,
        })
    }

    pub fn summary(&self) -> &str {
        &self.summary
    }

    pub fn operations(&self) -> &[Operation] {
        &self.operations
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }
}

/// 服务端的新格式：{"summary": ..., "operations": [...]}
#[derive(Deserialize)]
struct StructuredResponse {
    summary: String,
    operations: Vec<Operation>,
}

/// 旧版分析服务的返回格式：一个文件加一条 shell 命令
#[derive(Deserialize)]
struct LegacyAnalysis {
    title: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    filename: String,
    #[serde(default)]
    file_content: String,
    #[serde(default)]
    shell_command: String,
}

impl LegacyAnalysis {
    fn into_proposal(self) -> Result<ActionProposal, AgentError> {
        let summary = if self.description.trim().is_empty() {
            self.title
        } else {
            format!("{}\n{}", self.title, self.description.trim())
        };
        let mut operations = Vec::new();
        if !self.filename.trim().is_empty() {
            operations.push(Operation::CreateFile {
                path: PathBuf::from(self.filename.trim()),
                content: self.file_content,
            });
        }
        if !self.shell_command.trim().is_empty() {
            operations.push(Operation::RunCommand {
                command: "sh".to_string(),
                args: vec!["-c".to_string(), self.shell_command.trim().to_string()],
                cwd: None,
            });
        }
        ActionProposal::new(summary, operations)
    }
}

/// 校验推理服务返回的 JSON 并转为 ActionProposal
///
/// 含 `operations` 字段时按新格式严格解析；否则含 `shell_command` / `filename` 时按旧格式解析；
/// 两者皆无即为 InvalidResponse。
pub fn parse_proposal(value: Value) -> Result<ActionProposal, AgentError> {
    let obj = value
        .as_object()
        .ok_or_else(|| AgentError::InvalidResponse("response is not a JSON object".to_string()))?;

    if obj.contains_key("operations") {
        let parsed: StructuredResponse = serde_json::from_value(value)
            .map_err(|e| AgentError::InvalidResponse(e.to_string()))?;
        return ActionProposal::new(parsed.summary, parsed.operations);
    }

    if obj.contains_key("shell_command") || obj.contains_key("filename") {
        let legacy: LegacyAnalysis = serde_json::from_value(value)
            .map_err(|e| AgentError::InvalidResponse(e.to_string()))?;
        return legacy.into_proposal();
    }

    Err(AgentError::InvalidResponse(
        "missing field `operations`".to_string(),
    ))
}

/// 单个操作的执行状态
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum OutcomeStatus {
    Success,
    Failed,
}

/// 单个操作的执行结果；error 当且仅当 status = Failed 时存在
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionOutcome {
    /// 在提议 operations 中的下标
    pub operation_ref: usize,
    pub status: OutcomeStatus,
    pub stdout: Option<String>,
    pub stderr: Option<String>,
    pub exit_code: Option<i32>,
    pub bytes_written: Option<u64>,
    pub error: Option<AgentError>,
    pub duration: Duration,
}

impl ActionOutcome {
    pub fn file_created(operation_ref: usize, bytes_written: u64, duration: Duration) -> Self {
        Self {
            operation_ref,
            status: OutcomeStatus::Success,
            stdout: None,
            stderr: None,
            exit_code: None,
            bytes_written: Some(bytes_written),
            error: None,
            duration,
        }
    }

    /// 命令正常退出；非零退出码记为 Failed，但保留退出码与输出
    pub fn command_exited(
        operation_ref: usize,
        exit_code: Option<i32>,
        stdout: String,
        stderr: String,
        duration: Duration,
    ) -> Self {
        let error = match exit_code {
            Some(0) => None,
            Some(code) => Some(AgentError::OperationFailed(format!("exit code {}", code))),
            None => Some(AgentError::OperationFailed(
                "terminated by signal".to_string(),
            )),
        };
        Self {
            operation_ref,
            status: if error.is_none() {
                OutcomeStatus::Success
            } else {
                OutcomeStatus::Failed
            },
            stdout: Some(stdout),
            stderr: Some(stderr),
            exit_code,
            bytes_written: None,
            error,
            duration,
        }
    }

    pub fn failed(operation_ref: usize, error: AgentError, duration: Duration) -> Self {
        Self {
            operation_ref,
            status: OutcomeStatus::Failed,
            stdout: None,
            stderr: None,
            exit_code: None,
            bytes_written: None,
            error: Some(error),
            duration,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == OutcomeStatus::Success
    }
}
