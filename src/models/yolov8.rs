// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//
// YOLOv8 ONNX Runtime 绑定
// 包含: 会话加载(加速器选择)、预处理、推理、后处理

use image::{imageops::FilterType, DynamicImage, GenericImageView};
use ndarray::{s, Array, Axis};
use ort::{CPUExecutionProvider, CUDAExecutionProvider, GraphOptimizationLevel, Session};
use tracing::{debug, info, warn};

use super::{class_name, non_max_suppression, InferenceModel, LoadOptions};
use crate::config::Accelerator;
use crate::detection::types::{BBox, Detection};
use crate::error::{InferenceError, LoadError};

/// YOLOv8 检测模型 (输出 `[1, 4 + nc, N]`)
pub struct Yolov8Onnx {
    session: Option<Session>,
    input_name: String,
    output_name: String,
    input_size: u32,
    conf: f32,
    iou: f32,
}

impl Default for Yolov8Onnx {
    fn default() -> Self {
        Self::new()
    }
}

impl Yolov8Onnx {
    pub fn new() -> Self {
        Self {
            session: None,
            input_name: "images".to_string(),
            output_name: "output0".to_string(),
            input_size: 640,
            conf: 0.25,
            iou: 0.45,
        }
    }

    /// 预处理: 缩放到正方形输入 → NCHW f32 (0-1)
    fn preprocess(&self, image: &DynamicImage) -> Array<f32, ndarray::Ix4> {
        let size = self.input_size;
        let resized = image.resize_exact(size, size, FilterType::Triangle).to_rgb8();
        let mut input = Array::zeros((1, 3, size as usize, size as usize));
        for (x, y, pixel) in resized.enumerate_pixels() {
            let (x, y) = (x as usize, y as usize);
            let [r, g, b] = pixel.0;
            input[[0, 0, y, x]] = r as f32 / 255.;
            input[[0, 1, y, x]] = g as f32 / 255.;
            input[[0, 2, y, x]] = b as f32 / 255.;
        }
        input
    }
}

fn backend_err(e: ort::Error) -> LoadError {
    LoadError::Backend(e.to_string())
}

fn inference_err(e: ort::Error) -> InferenceError {
    InferenceError::new(e.to_string())
}

impl InferenceModel for Yolov8Onnx {
    fn load(&mut self, options: &LoadOptions) -> Result<(), LoadError> {
        if !options.model_path.exists() {
            return Err(LoadError::AssetMissing(options.model_path.clone()));
        }

        let builder = Session::builder()
            .map_err(backend_err)?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(backend_err)?;

        // execution provider: GPU 请求时优先 CUDA, 不可用时 ORT 自动回落 CPU
        let builder = match options.accelerator {
            Accelerator::Gpu => builder.with_execution_providers([
                CUDAExecutionProvider::default().build(),
                CPUExecutionProvider::default().build(),
            ]),
            Accelerator::Cpu => {
                builder.with_execution_providers([CPUExecutionProvider::default().build()])
            }
        }
        .map_err(backend_err)?;

        let session = builder
            .commit_from_file(&options.model_path)
            .map_err(backend_err)?;

        if let Some(input) = session.inputs.first() {
            self.input_name = input.name.clone();
        }
        if let Some(output) = session.outputs.first() {
            self.output_name = output.name.clone();
        } else {
            warn!("⚠️ 模型未声明输出, 使用默认名称 {}", self.output_name);
        }

        self.input_size = options.input_size;
        self.conf = options.conf_threshold;
        self.iou = options.iou_threshold;
        self.session = Some(session);

        info!(
            "✅ YOLOv8 检测模型加载成功: {} ({:?}, 输入{}x{})",
            options.model_path.display(),
            options.accelerator,
            self.input_size,
            self.input_size
        );
        Ok(())
    }

    fn infer(&mut self, image: &DynamicImage) -> Result<Vec<Detection>, InferenceError> {
        let session = self
            .session
            .as_ref()
            .ok_or_else(|| InferenceError::new("session not loaded"))?;

        let (w0, h0) = image.dimensions();
        let input = self.preprocess(image);

        let outputs = session
            .run(ort::inputs![self.input_name.as_str() => input.view()].map_err(inference_err)?)
            .map_err(inference_err)?;
        let output = outputs[self.output_name.as_str()]
            .try_extract_tensor::<f32>()
            .map_err(inference_err)?
            .t()
            .into_owned();

        if output.ndim() != 3 {
            return Err(InferenceError::new(format!(
                "unexpected output rank {}",
                output.ndim()
            )));
        }

        // [N, 4 + nc, 1] → [N, 4 + nc]
        let output = output.slice(s![.., .., 0]);
        let scale_x = w0 as f32 / self.input_size as f32;
        let scale_y = h0 as f32 / self.input_size as f32;

        let mut detections = Vec::new();
        for row in output.axis_iter(Axis(0)) {
            let row: Vec<f32> = row.iter().copied().collect();
            if row.len() <= 4 {
                continue;
            }
            let (class_id, confidence) = row[4..]
                .iter()
                .copied()
                .enumerate()
                .fold((0usize, f32::MIN), |best, (i, p)| if p > best.1 { (i, p) } else { best });
            if confidence < self.conf {
                continue;
            }
            let (cx, cy, w, h) = (row[0], row[1], row[2], row[3]);
            let bbox = BBox::new(cx - w / 2.0, cy - h / 2.0, w, h).scaled(scale_x, scale_y);
            detections.push(Detection::new(class_name(class_id), confidence, bbox));
        }

        let raw = detections.len();
        non_max_suppression(&mut detections, self.iou);
        debug!("🔍 原始检测: {}个 | NMS后: {}个", raw, detections.len());

        Ok(detections)
    }

    fn name(&self) -> &str {
        "yolov8-onnx"
    }
}
