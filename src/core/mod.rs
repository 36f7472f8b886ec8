//! 核心编排层：错误类型、回合数据、状态机、会话监管与编排器

pub mod builder;
pub mod error;
pub mod orchestrator;
pub mod session_supervisor;
pub mod state;
pub mod turn;

pub use builder::{build_orchestrator, client_from_config, executor_from_config};
pub use error::{AgentError, ErrorKind, SubmitError};
pub use orchestrator::Orchestrator;
pub use session_supervisor::SessionSupervisor;
pub use state::TurnPhase;
pub use turn::{Decision, Turn, TurnStatus, TurnSummary};
