//! 文件创建
//!
//! 相对路径以工作目录为根解析；create_new 原子地保证「目标不存在才创建」，绝不隐式覆盖。

use std::io::ErrorKind as IoErrorKind;
use std::path::{Path, PathBuf};

use tokio::io::AsyncWriteExt;

use crate::core::AgentError;

/// 相对路径拼接到 root 下，绝对路径原样返回
pub fn resolve(root: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        root.join(path)
    }
}

/// 以 create_new 打开目标文件；目标已存在或目录不可写时失败
///
/// 打开成功后文件即归调用方所有：写入被中断时应由调用方 `discard` 删除。
pub async fn open_new(path: &Path) -> Result<tokio::fs::File, AgentError> {
    tokio::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .await
        .map_err(|e| {
            let msg = match e.kind() {
                IoErrorKind::AlreadyExists => format!("{} already exists", path.display()),
                IoErrorKind::NotFound => {
                    format!("directory of {} does not exist", path.display())
                }
                IoErrorKind::PermissionDenied => {
                    format!("directory of {} is not writable", path.display())
                }
                _ => format!("cannot create {}: {}", path.display(), e),
            };
            AgentError::OperationFailed(msg)
        })
}

/// 向 open_new 得到的文件写入全部内容并 fsync，返回写入字节数；写入失败时删除半成品
pub async fn write_new(
    mut file: tokio::fs::File,
    path: &Path,
    content: &str,
) -> Result<u64, AgentError> {
    let written = async {
        file.write_all(content.as_bytes()).await?;
        file.sync_all().await
    }
    .await;
    drop(file);

    if let Err(e) = written {
        discard(path).await;
        return Err(AgentError::OperationFailed(format!(
            "write to {} failed: {}",
            path.display(),
            e
        )));
    }

    tracing::info!(path = %path.display(), bytes = content.len(), "file created");
    Ok(content.len() as u64)
}

/// 删除本次创建但未写完的文件
pub async fn discard(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        if e.kind() != IoErrorKind::NotFound {
            tracing::warn!(path = %path.display(), "failed to remove partial file: {}", e);
        }
    }
}
