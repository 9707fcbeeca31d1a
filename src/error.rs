//! 流水线错误类型 (Pipeline errors)
//!
//! 所有错误都向上传递到编排器,由编排器先释放输出资源再返回给调用方。

use std::path::PathBuf;

use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum Error {
    /// 视频源无法打开或没有帧 (处理任何帧之前报告)
    #[error("source unreadable: {}: {reason}", path.display())]
    SourceUnreadable { path: PathBuf, reason: String },

    /// 模型推理失败 (致命, 不重试)
    #[error("detection failed on frame {frame}")]
    DetectionFailure {
        frame: u64,
        #[source]
        source: anyhow::Error,
    },

    /// 输出分辨率/帧率与视频信息不一致 (写入任何帧之前报告)
    #[error("sink configuration mismatch: {0}")]
    SinkConfiguration(String),

    #[error("failed to write frame {frame}: {reason}")]
    SinkWrite { frame: u64, reason: String },

    #[error("display error: {0}")]
    Display(String),

    #[error("failed to load model {}", path.display())]
    ModelLoad {
        path: PathBuf,
        #[source]
        source: anyhow::Error,
    },

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("config error: {0}")]
    Config(String),
}

impl Error {
    pub fn source_unreadable(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        Error::SourceUnreadable {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    /// 是否属于运行前即可发现的配置类错误
    pub fn is_setup_error(&self) -> bool {
        matches!(
            self,
            Error::SourceUnreadable { .. }
                | Error::SinkConfiguration(_)
                | Error::ModelLoad { .. }
                | Error::InvalidArgument(_)
                | Error::Config(_)
        )
    }
}
