/// 图片序列播放器 - 把目录中的图片当作视频循环播放到共享帧槽
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use crossbeam_channel::{select, Sender};
use tracing::{debug, info, warn};

use super::{Frame, FrameSource, PlaybackState, SharedFrameSource};

const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "bmp", "webp"];

pub struct ImageSequencePlayer {
    source: Arc<SharedFrameSource>,
    stop_tx: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

/// 列出目录中的图片 (按文件名排序)
pub fn list_images(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files: Vec<PathBuf> = std::fs::read_dir(dir)
        .with_context(|| format!("读取图片目录失败: {}", dir.display()))?
        .flatten()
        .map(|entry| entry.path())
        .filter(|path| {
            path.extension()
                .and_then(|e| e.to_str())
                .map(|e| IMAGE_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
                .unwrap_or(false)
        })
        .collect();
    files.sort();
    Ok(files)
}

impl ImageSequencePlayer {
    /// 启动播放线程; 初始状态为暂停, 调用 `play()` 开始推帧
    pub fn spawn(dir: &Path, fps: f64, source: Arc<SharedFrameSource>) -> Result<Self> {
        let files = list_images(dir)?;
        if files.is_empty() {
            bail!("目录中没有图片: {}", dir.display());
        }
        let fps = if fps.is_finite() && fps > 0.0 { fps } else { 25.0 };
        info!(
            "🎬 图片序列播放器: {} 张图片, {:.1}fps ({})",
            files.len(),
            fps,
            dir.display()
        );

        let (stop_tx, stop_rx) = crossbeam_channel::bounded::<()>(1);
        let ticker = crossbeam_channel::tick(Duration::from_secs_f64(1.0 / fps));
        let thread_source = source.clone();
        source.pause();

        let handle = thread::Builder::new()
            .name("sequence-player".into())
            .spawn(move || {
                let mut index = 0usize;
                let mut count = 0u64;
                let mut last = Instant::now();
                loop {
                    select! {
                        recv(stop_rx) -> _ => break,
                        recv(ticker) -> _ => {
                            if thread_source.playback_state() != PlaybackState::Playing {
                                continue;
                            }
                            let path = &files[index % files.len()];
                            index = index.wrapping_add(1);
                            match image::open(path) {
                                Ok(img) => thread_source.present(Frame::from_image(img.into_rgba8())),
                                Err(e) => {
                                    warn!("⚠️ 丢弃帧 {}: {}", path.display(), e);
                                    continue;
                                }
                            }
                            count += 1;
                            if last.elapsed().as_secs_f64() >= 5.0 {
                                debug!(
                                    "📺 播放统计: {:.1}fps",
                                    count as f64 / last.elapsed().as_secs_f64()
                                );
                                count = 0;
                                last = Instant::now();
                            }
                        }
                    }
                }
                debug!("❌ 播放线程退出");
            })
            .context("启动播放线程失败")?;

        Ok(Self {
            source,
            stop_tx: Some(stop_tx),
            handle: Some(handle),
        })
    }

    pub fn play(&self) {
        self.source.play();
    }

    pub fn pause(&self) {
        self.source.pause();
    }

    /// 停止播放线程并置为 Stopped
    pub fn stop(&mut self) {
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.try_send(());
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
        self.source.stop();
    }

    pub fn source(&self) -> &Arc<SharedFrameSource> {
        &self.source
    }
}

impl Drop for ImageSequencePlayer {
    fn drop(&mut self) {
        self.stop();
    }
}
