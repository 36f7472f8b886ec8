//! 本地操作：文件创建、命令执行与按序执行器

pub mod executor;
pub mod filesystem;
pub mod shell;

pub use executor::{ActionExecutor, LocalExecutor};
pub use shell::{CommandPolicy, DEFAULT_FORBIDDEN_PATTERNS};
