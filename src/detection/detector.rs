//! 检测器 (Detector)
//! 职责: 帧句柄 → 解码图片 → 模型推理 → 检测结果
//!
//! 模型本身是外部协作者; 这里只做绑定: 一次性加载门控、输入解析、错误归类与统计。

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Instant;

use tracing::{debug, info, warn};

use super::types::{Detection, FrameHandle};
use crate::error::{DetectError, LoadError};
use crate::models::{InferenceModel, LoadOptions};

/// 推理统计
#[derive(Debug, Clone, Copy, Default)]
pub struct DetectorStats {
    pub inferences: u64,
    pub last_inference_ms: f64,
    pub current_fps: f64,
}

struct FpsCounter {
    count: u64,
    last: Instant,
    current_fps: f64,
    last_ms: f64,
}

pub struct Detector {
    model: Mutex<Box<dyn InferenceModel>>,
    ready: AtomicBool,
    inferences: AtomicU64,
    fps: Mutex<FpsCounter>,
}

impl Detector {
    pub fn new(model: Box<dyn InferenceModel>) -> Self {
        Self {
            model: Mutex::new(model),
            ready: AtomicBool::new(false),
            inferences: AtomicU64::new(0),
            fps: Mutex::new(FpsCounter {
                count: 0,
                last: Instant::now(),
                current_fps: 0.0,
                last_ms: 0.0,
            }),
        }
    }

    /// 一次性加载模型; 已就绪时直接返回, 失败后可重试
    pub fn load(&self, options: &LoadOptions) -> Result<(), LoadError> {
        // 已就绪时不碰模型锁: 旧周期可能仍在推理中持有它
        if self.ready.load(Ordering::Acquire) {
            return Ok(());
        }
        let mut model = self
            .model
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if self.ready.load(Ordering::Acquire) {
            return Ok(());
        }

        let start = Instant::now();
        match model.load(options) {
            Ok(()) => {
                self.ready.store(true, Ordering::Release);
                info!(
                    "✅ 检测模型就绪: {} ({:?}, {:.1}ms)",
                    model.name(),
                    options.accelerator,
                    start.elapsed().as_secs_f64() * 1000.0
                );
                Ok(())
            }
            Err(e) => {
                warn!("❌ {} 模型加载失败: {}", model.name(), e);
                Err(e)
            }
        }
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    /// 对一个已落盘帧执行检测
    pub fn detect(&self, handle: &FrameHandle) -> Result<Vec<Detection>, DetectError> {
        if !self.is_ready() {
            return Err(DetectError::ModelNotReady);
        }

        let image = image::open(handle.path()).map_err(|e| DetectError::InvalidInput {
            path: handle.path().to_path_buf(),
            reason: e.to_string(),
        })?;

        let start = Instant::now();
        let detections = {
            let mut model = self
                .model
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            model.infer(&image)?
        };
        let inference_ms = start.elapsed().as_secs_f64() * 1000.0;
        self.inferences.fetch_add(1, Ordering::Relaxed);
        self.update_fps(inference_ms);

        debug!(
            "🎯 帧#{} 检测: {}个 | {:.1}ms",
            handle.id(),
            detections.len(),
            inference_ms
        );
        Ok(detections)
    }

    fn update_fps(&self, inference_ms: f64) {
        let mut fps = self.fps.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        fps.count += 1;
        fps.last_ms = inference_ms;
        let now = Instant::now();
        if now.duration_since(fps.last).as_secs() >= 1 {
            fps.current_fps = fps.count as f64 / now.duration_since(fps.last).as_secs_f64();
            fps.count = 0;
            fps.last = now;
        }
    }

    pub fn stats(&self) -> DetectorStats {
        let fps = self.fps.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        DetectorStats {
            inferences: self.inferences.load(Ordering::Relaxed),
            last_inference_ms: fps.last_ms,
            current_fps: fps.current_fps,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detection::types::BBox;
    use crate::error::InferenceError;
    use image::{DynamicImage, RgbImage};
    use std::path::PathBuf;
    use std::sync::Arc;

    struct CountingModel {
        loads: Arc<AtomicU64>,
        fail_load: bool,
    }

    impl InferenceModel for CountingModel {
        fn load(&mut self, _options: &LoadOptions) -> Result<(), LoadError> {
            self.loads.fetch_add(1, Ordering::SeqCst);
            if self.fail_load {
                return Err(LoadError::Backend("no weights".into()));
            }
            Ok(())
        }

        fn infer(&mut self, image: &DynamicImage) -> Result<Vec<Detection>, InferenceError> {
            if image.width() == 3 {
                return Err(InferenceError::new("accelerator busy"));
            }
            Ok(vec![Detection::new(
                "person",
                0.9,
                BBox::new(0.0, 0.0, image.width() as f32, image.height() as f32),
            )])
        }
    }

    fn detector(fail_load: bool) -> (Detector, Arc<AtomicU64>) {
        let loads = Arc::new(AtomicU64::new(0));
        let model = CountingModel {
            loads: loads.clone(),
            fail_load,
        };
        (Detector::new(Box::new(model)), loads)
    }

    fn write_png(dir: &std::path::Path, name: &str, w: u32, h: u32) -> FrameHandle {
        let path = dir.join(name);
        RgbImage::new(w, h).save(&path).unwrap();
        FrameHandle::new(1, 0, path)
    }

    #[test]
    fn test_not_ready_before_load() {
        let (detector, _) = detector(false);
        let handle = FrameHandle::new(1, 0, PathBuf::from("missing.png"));
        assert!(matches!(
            detector.detect(&handle),
            Err(DetectError::ModelNotReady)
        ));
    }

    #[test]
    fn test_load_once() {
        let (detector, loads) = detector(false);
        detector.load(&LoadOptions::default()).unwrap();
        detector.load(&LoadOptions::default()).unwrap();
        assert!(detector.is_ready());
        assert_eq!(loads.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_failed_load_stays_not_ready() {
        let (detector, loads) = detector(true);
        assert!(detector.load(&LoadOptions::default()).is_err());
        assert!(detector.load(&LoadOptions::default()).is_err());
        assert!(!detector.is_ready());
        assert_eq!(loads.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_detect_and_errors() {
        let dir = tempfile::tempdir().unwrap();
        let (detector, _) = detector(false);
        detector.load(&LoadOptions::default()).unwrap();

        let handle = write_png(dir.path(), "ok.png", 8, 6);
        let first = detector.detect(&handle).unwrap();
        let second = detector.detect(&handle).unwrap();
        assert_eq!(first, second);
        assert_eq!(first[0].bbox, BBox::new(0.0, 0.0, 8.0, 6.0));

        let garbage = dir.path().join("garbage.png");
        std::fs::write(&garbage, b"not an image").unwrap();
        let bad = FrameHandle::new(2, 1, garbage);
        assert!(matches!(
            detector.detect(&bad),
            Err(DetectError::InvalidInput { .. })
        ));

        let busy = write_png(dir.path(), "busy.png", 3, 3);
        assert!(matches!(
            detector.detect(&busy),
            Err(DetectError::InferenceFailure(_))
        ));
        assert_eq!(detector.stats().inferences, 2);
    }
}
