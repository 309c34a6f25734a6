/// 叠加层 (Overlay)
///
/// - reduce: 检测批次 → 可渲染的标注框集合 (纯函数, 整体替换, 不做增量合并)
/// - render: 把叠加状态画到图片上 (快照/诊断用)
pub mod render;

use serde::{Deserialize, Serialize};

use crate::detection::types::{BBox, Detection, DetectionBatch};

/// 高亮调色板
pub const PALETTE: [[u8; 3]; 12] = [
    [255, 0, 0],     // 红色
    [0, 255, 0],     // 绿色
    [0, 0, 255],     // 蓝色
    [255, 255, 0],   // 黄色
    [255, 0, 255],   // 品红
    [0, 255, 255],   // 青色
    [255, 128, 0],   // 橙色
    [255, 0, 128],   // 粉红
    [128, 255, 0],   // 黄绿
    [0, 128, 255],   // 天蓝
    [255, 255, 255], // 白色
    [128, 0, 255],   // 紫色
];

/// 标签 → 颜色 (稳定映射, 与批次无关)
pub fn label_color(label: &str) -> [u8; 3] {
    // FNV-1a
    let hash = label
        .bytes()
        .fold(0xcbf2_9ce4_8422_2325u64, |h, b| {
            (h ^ b as u64).wrapping_mul(0x0000_0100_0000_01b3)
        });
    PALETTE[(hash % PALETTE.len() as u64) as usize]
}

/// 标注框
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AnnotatedRect {
    pub label: String,
    pub confidence: f32,
    pub bbox: BBox,
    pub color: [u8; 3],
}

/// 当前显示的叠加状态
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct OverlayState {
    pub frame_id: Option<u64>, // 对应的帧序号
    pub rects: Vec<AnnotatedRect>,
}

impl OverlayState {
    pub fn is_empty(&self) -> bool {
        self.rects.is_empty()
    }

    pub fn len(&self) -> usize {
        self.rects.len()
    }
}

/// 条目是否可渲染: 框非退化且有限, 置信度在 (0, 1], 标签非空
pub fn is_renderable(detection: &Detection) -> bool {
    let confidence_ok = detection.confidence > 0.0 && detection.confidence <= 1.0;
    confidence_ok
        && detection.bbox.is_finite()
        && !detection.bbox.is_degenerate()
        && !detection.label.trim().is_empty()
}

/// 检测批次 → 叠加状态, 丢弃畸形条目, 保持输入顺序
pub fn reduce(batch: &DetectionBatch) -> OverlayState {
    let rects = batch
        .detections
        .iter()
        .filter(|d| is_renderable(d))
        .map(|d| AnnotatedRect {
            label: d.label.clone(),
            confidence: d.confidence,
            bbox: d.bbox,
            color: label_color(&d.label),
        })
        .collect();

    OverlayState {
        frame_id: Some(batch.frame.id()),
        rects,
    }
}
