/// 抽帧检测数据结构定义
/// Data structures for the frame sampling detection pipeline
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ========== 数据结构 ==========

/// 检测框 (源帧像素坐标, 左上角 + 宽高)
#[derive(Clone, Copy, Debug, PartialEq, Default, Serialize, Deserialize)]
pub struct BBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl BBox {
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// 由左上/右下两点构造
    pub fn from_xyxy(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        Self::new(x1, y1, x2 - x1, y2 - y1)
    }

    pub fn xmax(&self) -> f32 {
        self.x + self.width
    }

    pub fn ymax(&self) -> f32 {
        self.y + self.height
    }

    pub fn area(&self) -> f32 {
        self.width * self.height
    }

    /// 宽或高 ≤ 0 (NaN 也视为退化)
    pub fn is_degenerate(&self) -> bool {
        !(self.width > 0.0 && self.height > 0.0)
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.width.is_finite() && self.height.is_finite()
    }

    pub fn scaled(&self, sx: f32, sy: f32) -> Self {
        Self::new(self.x * sx, self.y * sy, self.width * sx, self.height * sy)
    }

    pub fn intersection_area(&self, another: &BBox) -> f32 {
        let l = self.x.max(another.x);
        let r = self.xmax().min(another.xmax());
        let t = self.y.max(another.y);
        let b = self.ymax().min(another.ymax());
        (r - l).max(0.) * (b - t).max(0.)
    }

    pub fn iou(&self, another: &BBox) -> f32 {
        let inter = self.intersection_area(another);
        let union = self.area() + another.area() - inter;
        if union <= 0.0 {
            return 0.0;
        }
        inter / union
    }
}

/// 单个检测结果
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub label: String,
    pub confidence: f32, // 期望范围 (0, 1]
    pub bbox: BBox,
}

impl Detection {
    pub fn new(label: impl Into<String>, confidence: f32, bbox: BBox) -> Self {
        Self {
            label: label.into(),
            confidence,
            bbox,
        }
    }
}

/// 已落盘帧的句柄 (创建后不可变)
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FrameHandle {
    id: u64,           // 抓帧序号, 单调递增
    timestamp_ms: u64, // 单调时钟抓帧时间
    path: PathBuf,     // 落盘位置
}

impl FrameHandle {
    pub fn new(id: u64, timestamp_ms: u64, path: PathBuf) -> Self {
        Self {
            id,
            timestamp_ms,
            path,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn timestamp_ms(&self) -> u64 {
        self.timestamp_ms
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// 一批检测结果, 始终对应一个帧句柄
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DetectionBatch {
    pub frame: FrameHandle,
    pub detections: Vec<Detection>,
    pub produced_at: DateTime<Utc>,
}

impl DetectionBatch {
    pub fn new(frame: FrameHandle, detections: Vec<Detection>) -> Self {
        Self {
            frame,
            detections,
            produced_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_degenerate() {
        assert!(BBox::new(0.0, 0.0, 0.0, 10.0).is_degenerate());
        assert!(BBox::new(0.0, 0.0, 10.0, -1.0).is_degenerate());
        assert!(BBox::new(0.0, 0.0, f32::NAN, 1.0).is_degenerate());
        assert!(!BBox::new(0.0, 0.0, 1.0, 1.0).is_degenerate());
    }

    #[test]
    fn test_iou() {
        let a = BBox::new(0.0, 0.0, 10.0, 10.0);
        let b = BBox::new(5.0, 0.0, 10.0, 10.0);
        assert!((a.iou(&a) - 1.0).abs() < 1e-6);
        assert!((a.iou(&b) - 50.0 / 150.0).abs() < 1e-6);
        assert_eq!(a.iou(&BBox::new(20.0, 20.0, 1.0, 1.0)), 0.0);
    }

    #[test]
    fn test_from_xyxy() {
        let b = BBox::from_xyxy(10.0, 20.0, 60.0, 100.0);
        assert_eq!(b, BBox::new(10.0, 20.0, 50.0, 80.0));
        assert_eq!(b.xmax(), 60.0);
    }
}
