//! 记忆层：会话历史（仅追加、容量受限）与持久化

pub mod history;
pub mod persistence;

pub use history::SessionHistory;
pub use persistence::{HistoryError, HistoryFile};
