/// 模型统一接口与实现
///
/// # 架构说明
///
/// 检测模型本身是外部协作者, 流水线只依赖 [`InferenceModel`] 这一边界:
/// - 一次性加载 `load` (加载权重、选择加速器)
/// - 推理 `infer` (单张图片 → 检测结果列表)
///
/// ## 具体实现
/// - **Yolov8Onnx**: ONNX Runtime 绑定 (feature `onnx`), 文件: `yolov8.rs`
///
/// ## 使用示例
/// ```no_run
/// # #[cfg(feature = "onnx")] {
/// use yolo_overlay::detection::Detector;
/// use yolo_overlay::models::{LoadOptions, Yolov8Onnx};
///
/// let detector = Detector::new(Box::new(Yolov8Onnx::new()));
/// detector.load(&LoadOptions::default()).unwrap();
/// # }
/// ```
use std::path::PathBuf;

use image::DynamicImage;

use crate::config::{Accelerator, PipelineConfig};
use crate::detection::types::Detection;
use crate::error::{InferenceError, LoadError};

/// 模型加载参数
#[derive(Debug, Clone)]
pub struct LoadOptions {
    pub accelerator: Accelerator,
    pub model_path: PathBuf,
    pub conf_threshold: f32,
    pub iou_threshold: f32,
    pub input_size: u32,
}

impl Default for LoadOptions {
    fn default() -> Self {
        Self::from(&PipelineConfig::default())
    }
}

impl From<&PipelineConfig> for LoadOptions {
    fn from(config: &PipelineConfig) -> Self {
        Self {
            accelerator: config.accelerator,
            model_path: config.model_path.clone(),
            conf_threshold: config.conf_threshold,
            iou_threshold: config.iou_threshold,
            input_size: config.input_size,
        }
    }
}

/// 统一的检测模型接口
///
/// ## 核心流程
/// ```text
/// load(一次) → infer → infer → ...
/// ```
pub trait InferenceModel: Send {
    /// 一次性初始化: 加载权重, 选择加速器
    fn load(&mut self, options: &LoadOptions) -> Result<(), LoadError>;

    /// 推理: 图片 → 检测结果 (源图像素坐标)
    ///
    /// 返回的条目可能不完整或越界, 由叠加层的 reduce 负责过滤
    fn infer(&mut self, image: &DynamicImage) -> Result<Vec<Detection>, InferenceError>;

    /// 模型名称 (日志用)
    fn name(&self) -> &str {
        "model"
    }
}

/// 按置信度降序的贪心 NMS (同类别之间抑制)
pub fn non_max_suppression(xs: &mut Vec<Detection>, iou_threshold: f32) {
    xs.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

    let mut current_index = 0;
    for index in 0..xs.len() {
        let mut drop = false;
        for prev_index in 0..current_index {
            if xs[prev_index].label != xs[index].label {
                continue;
            }
            if xs[prev_index].bbox.iou(&xs[index].bbox) > iou_threshold {
                drop = true;
                break;
            }
        }
        if !drop {
            xs.swap(current_index, index);
            current_index += 1;
        }
    }
    xs.truncate(current_index);
}

/// COCO 80类名称
pub const COCO_CLASSES: [&str; 80] = [
    "person", "bicycle", "car", "motorcycle", "airplane", "bus", "train", "truck", "boat",
    "traffic light", "fire hydrant", "stop sign", "parking meter", "bench", "bird", "cat", "dog",
    "horse", "sheep", "cow", "elephant", "bear", "zebra", "giraffe", "backpack", "umbrella",
    "handbag", "tie", "suitcase", "frisbee", "skis", "snowboard", "sports ball", "kite",
    "baseball bat", "baseball glove", "skateboard", "surfboard", "tennis racket", "bottle",
    "wine glass", "cup", "fork", "knife", "spoon", "bowl", "banana", "apple", "sandwich", "orange",
    "broccoli", "carrot", "hot dog", "pizza", "donut", "cake", "chair", "couch", "potted plant",
    "bed", "dining table", "toilet", "tv", "laptop", "mouse", "remote", "keyboard", "cell phone",
    "microwave", "oven", "toaster", "sink", "refrigerator", "book", "clock", "vase", "scissors",
    "teddy bear", "hair drier", "toothbrush",
];

/// 类别ID → 名称, 超出范围时返回 `class{id}`
pub fn class_name(id: usize) -> String {
    COCO_CLASSES
        .get(id)
        .map(|s| s.to_string())
        .unwrap_or_else(|| format!("class{}", id))
}

#[cfg(feature = "onnx")]
pub mod yolov8; // YOLOv8 ONNX Runtime 绑定

#[cfg(feature = "onnx")]
pub use yolov8::Yolov8Onnx;
