//! 流水线配置 - 通过JSON文件调整参数, 命令行参数可覆盖

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::{Parser, ValueEnum};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// 最小采样间隔, 防止计时器空转
pub const MIN_INTERVAL_MS: u64 = 10;

/// 推理加速器偏好
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Accelerator {
    #[default]
    Cpu,
    Gpu,
}

/// 抓帧落盘格式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum FrameFormat {
    #[default]
    Png,
    Jpeg,
}

impl FrameFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            FrameFormat::Png => "png",
            FrameFormat::Jpeg => "jpg",
        }
    }
}

/// 流水线参数配置
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    // === 采样参数 ===
    pub interval_ms: u64,            // 采样间隔(毫秒)
    pub diagnostics_capacity: usize, // 诊断通道容量

    // === 抓帧参数 ===
    pub frame_dir: PathBuf,               // 抓帧落盘目录
    pub frame_format: FrameFormat,        // 编码格式
    pub jpeg_quality: u8,                 // JPEG质量 (1-100)
    pub capture_max_width: Option<u32>,   // 超过该宽度则缩放
    pub retention: usize,                 // 帧缓存保留数量

    // === 模型参数 ===
    pub model_asset: String,     // 打包的只读模型资源 (路径或URL)
    pub model_path: PathBuf,     // 可写的模型落地路径
    pub accelerator: Accelerator,
    pub conf_threshold: f32,     // 置信度阈值
    pub iou_threshold: f32,      // NMS IOU阈值
    pub input_size: u32,         // 模型输入尺寸
}

impl Default for PipelineConfig {
    fn default() -> Self {
        let cache_root = dirs::cache_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join("yolo-overlay");
        Self {
            interval_ms: 500,
            diagnostics_capacity: 256,

            frame_dir: cache_root.join("frames"),
            frame_format: FrameFormat::Png,
            jpeg_quality: 85,
            capture_max_width: None,
            retention: 32,

            model_asset: "models/yolov8n.onnx".to_string(),
            model_path: crate::assets::default_model_dir().join("yolov8n.onnx"),
            accelerator: Accelerator::Cpu,
            conf_threshold: 0.25,
            iou_threshold: 0.45,
            input_size: 640,
        }
    }
}

impl PipelineConfig {
    /// 从JSON文件加载配置
    pub fn load(path: &Path) -> Self {
        match fs::read_to_string(path) {
            Ok(json) => match serde_json::from_str::<Self>(&json) {
                Ok(config) => {
                    info!("✅ 配置已从 {} 加载", path.display());
                    config.validate()
                }
                Err(e) => {
                    warn!("⚠️  配置文件解析失败: {}, 使用默认值", e);
                    Self::default()
                }
            },
            Err(_) => {
                info!("📝 配置文件不存在,创建默认配置...");
                let config = Self::default();
                if let Err(e) = config.save(path) {
                    warn!("❌ 保存配置失败: {:#}", e);
                }
                config
            }
        }
    }

    /// 保存配置到JSON文件
    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, json)?;
        info!("💾 配置已保存到 {}", path.display());
        Ok(())
    }

    /// 修正越界参数
    pub fn validate(mut self) -> Self {
        if self.interval_ms < MIN_INTERVAL_MS {
            warn!(
                "⚠️  采样间隔 {}ms 过小, 调整为 {}ms",
                self.interval_ms, MIN_INTERVAL_MS
            );
            self.interval_ms = MIN_INTERVAL_MS;
        }
        self.retention = self.retention.max(1);
        self.diagnostics_capacity = self.diagnostics_capacity.max(1);
        self.jpeg_quality = self.jpeg_quality.clamp(1, 100);
        self.capture_max_width = self.capture_max_width.filter(|w| *w > 0);
        if !(self.conf_threshold > 0.0 && self.conf_threshold <= 1.0) {
            self.conf_threshold = 0.25;
        }
        if !(self.iou_threshold > 0.0 && self.iou_threshold <= 1.0) {
            self.iou_threshold = 0.45;
        }
        self.input_size = self.input_size.max(32);
        self
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms.max(MIN_INTERVAL_MS))
    }

    /// 打印当前配置
    pub fn print_summary(&self) {
        info!("🎛️  当前流水线配置:");
        info!("  采样间隔: {}ms", self.interval_ms);
        info!("  加速器: {:?}", self.accelerator);
        info!("  帧缓存保留: {}", self.retention);
        info!(
            "  抓帧目录: {} ({:?})",
            self.frame_dir.display(),
            self.frame_format
        );
        info!(
            "  模型: {} → {}",
            self.model_asset,
            self.model_path.display()
        );
        info!(
            "  阈值: conf={:.2} iou={:.2} 输入尺寸={}",
            self.conf_threshold, self.iou_threshold, self.input_size
        );
    }
}

/// 数字卫兵命令行参数
#[derive(Parser, Debug, Clone)]
#[command(author, version, about = "视频抽帧检测叠加 - Frame sampling detection overlay", long_about = None)]
pub struct Args {
    /// 配置文件 (JSON)
    #[arg(long, default_value = "sentinel.json")]
    pub config: PathBuf,

    /// 图片序列目录 (作为视频源循环播放)
    #[arg(short, long)]
    pub frames: Option<PathBuf>,

    /// 使用合成帧代替图片序列
    #[arg(long, default_value_t = false)]
    pub synthetic: bool,

    /// 播放帧率
    #[arg(long, default_value_t = 25.0)]
    pub fps: f64,

    /// 模型资源 (路径或URL)
    #[arg(short, long)]
    pub model: Option<String>,

    /// 采样间隔(毫秒)
    #[arg(short, long)]
    pub interval_ms: Option<u64>,

    /// 加速器: cpu / gpu
    #[arg(long, value_enum)]
    pub accelerator: Option<Accelerator>,

    /// 帧缓存保留数量
    #[arg(long)]
    pub retention: Option<usize>,

    /// 叠加结果快照输出目录
    #[arg(long)]
    pub snapshots: Option<PathBuf>,

    /// 标注字体 (ttf/otf)
    #[arg(long)]
    pub font: Option<PathBuf>,

    /// 运行时长(秒), 到时停止播放
    #[arg(long)]
    pub duration_secs: Option<u64>,

    /// 详细日志
    #[arg(short, long, default_value_t = false)]
    pub verbose: bool,
}

impl Args {
    /// 命令行参数覆盖配置文件
    pub fn apply(&self, mut config: PipelineConfig) -> PipelineConfig {
        if let Some(model) = &self.model {
            config.model_asset = model.clone();
            if let Some(name) = Path::new(model).file_name() {
                if let Some(dir) = config.model_path.parent() {
                    config.model_path = dir.join(name);
                }
            }
        }
        if let Some(interval) = self.interval_ms {
            config.interval_ms = interval;
        }
        if let Some(accelerator) = self.accelerator {
            config.accelerator = accelerator;
        }
        if let Some(retention) = self.retention {
            config.retention = retention;
        }
        config.validate()
    }
}
