/// 检测系统 (Detection System)
///
/// 检测服务适配层, 模型本身是外部协作者
/// - Types:    帧句柄、检测框、检测批次
/// - Detector: 一次性加载门控 + 帧句柄检测
pub mod detector;
pub mod types;

pub use detector::{Detector, DetectorStats};
pub use types::{BBox, Detection, DetectionBatch, FrameHandle};
