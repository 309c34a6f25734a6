/// 数字卫兵 (Digital Sentinel)
///
/// 视频抽帧检测叠加
///
/// 系统架构:
/// 1. 播放线程: 图片序列 / 合成帧 → 共享帧槽
/// 2. 采样线程: 固定间隔抓帧 → 检测 → 替换叠加层 (跟随播放状态启停)
/// 3. 主线程:   诊断输出与统计
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use clap::Parser;
use tracing::{debug, info, warn};

use yolo_overlay::assets::provision_asset;
use yolo_overlay::input::{FrameSource, ImageSequencePlayer, PlaybackState, SharedFrameSource, SyntheticSource};
use yolo_overlay::models::InferenceModel;
use yolo_overlay::overlay::render::{draw_overlay, load_font};
use yolo_overlay::{logging, Args, Diagnostic, Pipeline, PipelineConfig};

/// 视频源 (播放控制)
enum Playback {
    Sequence(ImageSequencePlayer),
    Synthetic(Arc<SyntheticSource>),
}

impl Playback {
    fn open(args: &Args) -> Result<(Self, Arc<dyn FrameSource>)> {
        if let Some(dir) = &args.frames {
            let shared = Arc::new(SharedFrameSource::new());
            let player = ImageSequencePlayer::spawn(dir, args.fps, shared.clone())?;
            let source: Arc<dyn FrameSource> = shared;
            return Ok((Playback::Sequence(player), source));
        }
        if args.synthetic {
            info!("🎲 使用合成帧 640x360");
            let synthetic = Arc::new(SyntheticSource::new(640, 360, 42));
            let source: Arc<dyn FrameSource> = synthetic.clone();
            return Ok((Playback::Synthetic(synthetic), source));
        }
        bail!("需要指定 --frames <目录> 或 --synthetic");
    }

    fn play(&self) {
        match self {
            Playback::Sequence(player) => player.play(),
            Playback::Synthetic(source) => source.play(),
        }
    }

    fn stop(&mut self) {
        match self {
            Playback::Sequence(player) => player.stop(),
            Playback::Synthetic(source) => source.set_playback_state(PlaybackState::Stopped),
        }
    }
}

#[cfg(feature = "onnx")]
fn build_model() -> Result<Box<dyn InferenceModel>> {
    Ok(Box::new(yolo_overlay::models::Yolov8Onnx::new()))
}

#[cfg(not(feature = "onnx"))]
fn build_model() -> Result<Box<dyn InferenceModel>> {
    bail!("未启用 onnx feature, 没有可用的检测模型");
}

fn main() -> Result<()> {
    let args = Args::parse();
    logging::init(args.verbose);

    let config = args.apply(PipelineConfig::load(&args.config));
    config.print_summary();

    info!("🚀 数字卫兵系统启动");

    // ========== 模型资源 ==========
    let provisioned = provision_asset(&config.model_asset, &config.model_path)
        .with_context(|| format!("模型资源落地失败: {}", config.model_asset))?;
    info!(
        "📦 检测模型: {}{}",
        provisioned.path.display(),
        if provisioned.copied { " (首次落地)" } else { "" }
    );

    // ========== 视频源 ==========
    let (mut playback, source) = Playback::open(&args)?;

    // ========== 流水线 ==========
    let pipeline = Arc::new(Pipeline::from_config(source, build_model()?, config));

    let cache = pipeline.cache().clone();
    let font = args.font.as_deref().and_then(load_font).map(Arc::new);
    let snapshots: Option<PathBuf> = args.snapshots.clone();
    if let Some(dir) = &snapshots {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("创建快照目录失败: {}", dir.display()))?;
    }
    pipeline.on_overlay_updated(move |state| {
        let labels: Vec<&str> = state.rects.iter().map(|r| r.label.as_str()).collect();
        info!(
            "🖼️ 帧#{} 叠加更新: {} 个目标 {:?}",
            state.frame_id.unwrap_or_default(),
            state.len(),
            labels
        );

        let Some(dir) = &snapshots else { return };
        let Some(frame_id) = state.frame_id else { return };
        let Some(handle) = cache.list().into_iter().find(|h| h.id() == frame_id) else {
            debug!("帧#{} 已被淘汰, 跳过快照", frame_id);
            return;
        };
        match image::open(handle.path()) {
            Ok(img) => {
                let mut canvas = img.to_rgba8();
                draw_overlay(&mut canvas, state, font.as_deref());
                let out = dir.join(format!("overlay_{:06}.png", frame_id));
                if let Err(e) = canvas.save(&out) {
                    warn!("⚠️ 快照保存失败 {}: {}", out.display(), e);
                }
            }
            Err(e) => warn!("⚠️ 读取帧失败 {}: {}", handle.path().display(), e),
        }
    });

    // 先播放再绑定: 绑定时直接启动, 检测器初始化失败在这里返回
    playback.play();
    if let Err(e) = pipeline.bind_playback() {
        playback.stop();
        return Err(e).context("流水线启动失败");
    }

    // ========== 主线程: 诊断输出 ==========
    let deadline = args
        .duration_secs
        .map(|secs| Instant::now() + Duration::from_secs(secs));
    let diagnostics = pipeline.diagnostics().context("诊断通道已被占用")?;
    let mut last_report = Instant::now();

    loop {
        if deadline.map(|d| Instant::now() >= d).unwrap_or(false) {
            info!("⏰ 运行时长已到");
            break;
        }
        match diagnostics.recv_timeout(Duration::from_millis(500)) {
            Ok(Diagnostic::CycleCompleted { frame_id, elapsed_ms, .. }) => {
                debug!("✅ 周期完成 帧#{} {:.1}ms", frame_id, elapsed_ms)
            }
            Ok(Diagnostic::StartFailed(reason)) => {
                playback.stop();
                pipeline.shutdown();
                bail!("流水线重启失败: {}", reason);
            }
            Ok(other) => debug!("🔎 {:?}", other),
            // 发送端由流水线持有, 只会超时
            Err(_) => {}
        }

        if last_report.elapsed() >= Duration::from_secs(5) {
            let stats = pipeline.stats();
            let det = pipeline.detector().stats();
            info!(
                "📊 周期={} 跳过={} 抓帧失败={} 检测失败={} 丢弃={} | 推理 {:.1}ms {:.1}fps | 缓存 {} 帧",
                stats.cycles,
                stats.skipped_ticks,
                stats.capture_failures,
                stats.detect_failures,
                stats.stale_discarded,
                det.last_inference_ms,
                det.current_fps,
                pipeline.cache().len()
            );
            last_report = Instant::now();
        }
    }

    playback.stop();
    pipeline.shutdown();
    info!("📊 最终统计: {:?}", pipeline.stats());
    Ok(())
}
