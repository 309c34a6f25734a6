#![allow(clippy::type_complexity)]
// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
pub mod assets; // 模型资源落地
pub mod capture; // 抓帧系统
pub mod config; // 流水线配置参数
pub mod detection; // 智能检测系统
pub mod error; // 错误类型
pub mod input; // 视频输入系统
pub mod logging; // 日志初始化
pub mod models; // 模型接口与具体实现
pub mod overlay; // 叠加层
pub mod pipeline; // 采样流水线

pub use crate::config::{Args, PipelineConfig};
pub use crate::detection::{BBox, Detection, DetectionBatch, Detector, FrameHandle};
pub use crate::error::{CaptureError, DetectError, InferenceError, LoadError, PipelineError};
pub use crate::input::{Frame, FrameSource, PlaybackState};
pub use crate::models::{InferenceModel, LoadOptions};
pub use crate::overlay::{AnnotatedRect, OverlayState};
pub use crate::pipeline::{Diagnostic, Pipeline, PipelineStats};

/// 本地时间字符串 (北京时间), 用于文件命名
pub fn gen_time_string(delimiter: &str) -> String {
    let t_now = match chrono::FixedOffset::east_opt(8 * 60 * 60) {
        Some(offset) => chrono::Utc::now().with_timezone(&offset), // Beijing
        None => chrono::Utc::now().fixed_offset(),
    };
    let fmt = format!(
        "%Y{}%m{}%d{}%H{}%M{}%S{}%f",
        delimiter, delimiter, delimiter, delimiter, delimiter, delimiter
    );
    t_now.format(&fmt).to_string()
}
