/// 视频输入系统 (Video Input System)
///
/// 播放引擎本身是黑盒, 这里只定义流水线看到的视频源适配接口
/// - FrameSource:         当前帧 + 播放状态 + 状态变化回调
/// - SharedFrameSource:   由播放引擎推送最新帧的共享槽 (生产用适配器)
/// - ImageSequencePlayer: 把图片目录当作视频循环播放 (独立线程)
/// - SyntheticSource:     内存合成帧, 测试与演示用
pub mod sequence;
pub mod shared;
pub mod synthetic;

use std::fmt;
use std::sync::Arc;

use image::RgbaImage;
use serde::{Deserialize, Serialize};

pub use sequence::ImageSequencePlayer;
pub use shared::SharedFrameSource;
pub use synthetic::SyntheticSource;

/// 播放状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PlaybackState {
    #[default]
    Stopped,
    Playing,
    Paused,
}

impl fmt::Display for PlaybackState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PlaybackState::Stopped => "stopped",
            PlaybackState::Playing => "playing",
            PlaybackState::Paused => "paused",
        };
        f.write_str(name)
    }
}

/// 当前渲染帧 (播放线程 → 抓帧服务)
#[derive(Clone)]
pub struct Frame {
    pub rgba: Arc<Vec<u8>>, // 使用Arc共享数据,避免复制
    pub width: u32,
    pub height: u32,
}

impl Frame {
    pub fn new(rgba: Vec<u8>, width: u32, height: u32) -> Self {
        Self {
            rgba: Arc::new(rgba),
            width,
            height,
        }
    }

    pub fn from_image(image: RgbaImage) -> Self {
        let (width, height) = image.dimensions();
        Self::new(image.into_raw(), width, height)
    }

    /// 缓冲区与尺寸不符时返回 None
    pub fn to_image(&self) -> Option<RgbaImage> {
        RgbaImage::from_raw(self.width, self.height, self.rgba.as_ref().clone())
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Frame")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("bytes", &self.rgba.len())
            .finish()
    }
}

/// 播放状态变化回调
pub type PlaybackListener = Arc<dyn Fn(PlaybackState) + Send + Sync>;

/// 回调注册凭证
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(pub(crate) u64);

/// 视频源适配接口
pub trait FrameSource: Send + Sync {
    /// 当前渲染帧; 未初始化/未布局时为 None
    fn current_frame(&self) -> Option<Frame>;

    fn playback_state(&self) -> PlaybackState;

    /// 注册播放状态变化回调 (仅在状态实际变化时触发)
    fn on_playback_state_changed(&self, listener: PlaybackListener) -> ListenerId;

    fn remove_listener(&self, id: ListenerId);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_roundtrip_and_mismatch() {
        let image = RgbaImage::from_pixel(4, 2, image::Rgba([1, 2, 3, 255]));
        let frame = Frame::from_image(image.clone());
        assert_eq!(frame.to_image().unwrap(), image);

        let bad = Frame::new(vec![0; 7], 4, 2);
        assert!(bad.to_image().is_none());
    }

    #[test]
    fn test_playback_display() {
        assert_eq!(PlaybackState::Playing.to_string(), "playing");
        assert_eq!(PlaybackState::default(), PlaybackState::Stopped);
    }
}
