/// 抓帧系统 (Capture System)
///
/// - FrameCapture: 视频源当前帧 → (可选缩放) → 编码 → 原子落盘 → 帧句柄
/// - FrameCache:   已落盘帧的有界台账, 淘汰时删除文件
pub mod cache;

pub use cache::FrameCache;

use std::fs::{self, File};
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use fast_image_resize as fr;
use image::codecs::jpeg::JpegEncoder;
use image::{DynamicImage, ImageFormat, RgbaImage};
use tracing::debug;

use crate::config::{FrameFormat, PipelineConfig};
use crate::detection::types::FrameHandle;
use crate::error::CaptureError;
use crate::gen_time_string;
use crate::input::FrameSource;

/// 抓帧参数
#[derive(Debug, Clone)]
pub struct CaptureOptions {
    pub dir: PathBuf,
    pub format: FrameFormat,
    pub jpeg_quality: u8,
    pub max_width: Option<u32>,
}

impl From<&PipelineConfig> for CaptureOptions {
    fn from(config: &PipelineConfig) -> Self {
        Self {
            dir: config.frame_dir.clone(),
            format: config.frame_format,
            jpeg_quality: config.jpeg_quality,
            max_width: config.capture_max_width,
        }
    }
}

pub struct FrameCapture {
    source: Arc<dyn FrameSource>,
    options: CaptureOptions,
    cache: Arc<FrameCache>,
    seq: AtomicU64,
    epoch: Instant,
    last_timestamp: AtomicU64,
}

impl FrameCapture {
    pub fn new(source: Arc<dyn FrameSource>, options: CaptureOptions, cache: Arc<FrameCache>) -> Self {
        Self {
            source,
            options,
            cache,
            seq: AtomicU64::new(0),
            epoch: Instant::now(),
            last_timestamp: AtomicU64::new(0),
        }
    }

    pub fn cache(&self) -> &Arc<FrameCache> {
        &self.cache
    }

    pub fn dir(&self) -> &Path {
        &self.options.dir
    }

    /// 抓取当前帧并落盘, 成功后记入帧缓存
    pub fn capture(&self) -> Result<FrameHandle, CaptureError> {
        let frame = self
            .source
            .current_frame()
            .ok_or(CaptureError::SourceUnavailable)?;
        if frame.width == 0 || frame.height == 0 {
            return Err(CaptureError::InvalidFrame(format!(
                "empty frame {}x{}",
                frame.width, frame.height
            )));
        }
        let image = frame.to_image().ok_or_else(|| {
            CaptureError::InvalidFrame(format!(
                "{} bytes for {}x{} RGBA",
                frame.rgba.len(),
                frame.width,
                frame.height
            ))
        })?;

        let image = match self.options.max_width {
            Some(max_width) if image.width() > max_width => downscale(image, max_width)?,
            _ => image,
        };

        let id = self.seq.fetch_add(1, Ordering::SeqCst) + 1;
        let timestamp_ms = self.next_timestamp();
        let name = format!(
            "frame_{}_{:06}.{}",
            gen_time_string(""),
            id,
            self.options.format.extension()
        );

        fs::create_dir_all(&self.options.dir)?;
        let path = self.options.dir.join(&name);
        let part = self.options.dir.join(format!("{}.part", name));
        if let Err(e) = self.encode(&image, &part) {
            let _ = fs::remove_file(&part);
            return Err(e);
        }
        publish(&part, &path)?;

        debug!(
            "📸 抓帧#{} {}x{} → {}",
            id,
            image.width(),
            image.height(),
            path.display()
        );
        let handle = FrameHandle::new(id, timestamp_ms, path);
        self.cache.record(handle.clone());
        Ok(handle)
    }

    fn encode(&self, image: &RgbaImage, path: &Path) -> Result<(), CaptureError> {
        let mut writer = BufWriter::new(File::create(path)?);
        match self.options.format {
            FrameFormat::Png => image.write_to(&mut writer, ImageFormat::Png)?,
            FrameFormat::Jpeg => {
                // JPEG 不支持 alpha
                let rgb = DynamicImage::ImageRgba8(image.clone()).to_rgb8();
                JpegEncoder::new_with_quality(&mut writer, self.options.jpeg_quality)
                    .encode_image(&rgb)?;
            }
        }
        writer.into_inner().map_err(|e| e.into_error())?.sync_all()?;
        Ok(())
    }

    /// 单调时钟毫秒数, 保证严格递增
    fn next_timestamp(&self) -> u64 {
        let now = self.epoch.elapsed().as_millis() as u64;
        let prev = self
            .last_timestamp
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| {
                Some(now.max(last + 1))
            })
            .unwrap_or(0);
        now.max(prev + 1)
    }
}

/// 等比缩放到 `max_width` (fast_image_resize)
/// 临时文件改名为最终文件; 失败时删除临时文件
fn publish(part: &Path, path: &Path) -> Result<(), CaptureError> {
    if let Err(e) = fs::rename(part, path) {
        let _ = fs::remove_file(part);
        return Err(e.into());
    }
    Ok(())
}

fn downscale(image: RgbaImage, max_width: u32) -> Result<RgbaImage, CaptureError> {
    let (w, h) = image.dimensions();
    let dst_w = max_width.max(1);
    let dst_h = ((h as u64 * dst_w as u64) / w as u64).max(1) as u32;

    let src_image = fr::images::Image::from_vec_u8(w, h, image.into_raw(), fr::PixelType::U8x4)
        .map_err(|e| CaptureError::Resize(e.to_string()))?;
    let mut dst_image = fr::images::Image::new(dst_w, dst_h, fr::PixelType::U8x4);

    let mut resizer = fr::Resizer::new();
    resizer
        .resize(
            &src_image,
            &mut dst_image,
            &fr::ResizeOptions::new()
                .resize_alg(fr::ResizeAlg::Convolution(fr::FilterType::Bilinear)),
        )
        .map_err(|e| CaptureError::Resize(e.to_string()))?;

    RgbaImage::from_raw(dst_w, dst_h, dst_image.buffer().to_vec())
        .ok_or_else(|| CaptureError::Resize("destination buffer size mismatch".into()))
}
