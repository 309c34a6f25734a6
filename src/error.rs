//! 错误类型 (Error taxonomy)
//!
//! 每个周期内的错误 (Capture/Detect) 只影响当前帧,由调度器记录后继续采样;
//! 唯一致命的是启动时检测器初始化失败 (`PipelineError::DetectorInit`)。

use std::path::PathBuf;

use thiserror::Error;

/// 抓帧失败
#[derive(Debug, Error)]
pub enum CaptureError {
    /// 视频源当前无法提供帧 (未初始化 / 尚未布局), 跳过本次 tick
    #[error("frame source unavailable")]
    SourceUnavailable,
    #[error("invalid frame: {0}")]
    InvalidFrame(String),
    #[error("resize failed: {0}")]
    Resize(String),
    #[error("encode failed: {0}")]
    Encode(#[from] image::ImageError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// 模型推理内部错误 (由 `InferenceModel` 实现返回)
#[derive(Debug, Error)]
#[error("{0}")]
pub struct InferenceError(pub String);

impl InferenceError {
    pub fn new(msg: impl Into<String>) -> Self {
        Self(msg.into())
    }
}

/// 检测失败
#[derive(Debug, Error)]
pub enum DetectError {
    /// 模型尚未完成一次性加载
    #[error("model not ready")]
    ModelNotReady,
    /// 帧句柄无法解析为可解码的图片, 丢弃该帧
    #[error("invalid input {path}: {reason}")]
    InvalidInput { path: PathBuf, reason: String },
    /// 推理失败 (例如加速器争用), 记录后跳过
    #[error("inference failure: {0}")]
    InferenceFailure(#[from] InferenceError),
}

/// 模型加载失败
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("model asset not found: {0}")]
    AssetMissing(PathBuf),
    #[error("model backend error: {0}")]
    Backend(String),
    #[error(transparent)]
    Provision(#[from] ProvisionError),
}

/// 模型资源落地失败
#[derive(Debug, Error)]
pub enum ProvisionError {
    #[error("asset source not found: {0}")]
    SourceMissing(PathBuf),
    #[error("download {url} failed: {reason}")]
    Download { url: String, reason: String },
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// 流水线启动失败
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("detector initialization failed: {0}")]
    DetectorInit(#[from] LoadError),
    #[error("failed to spawn {what} thread: {source}")]
    Spawn {
        what: &'static str,
        #[source]
        source: std::io::Error,
    },
}
