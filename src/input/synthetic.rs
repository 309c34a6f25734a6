/// 合成视频源 - 不依赖渲染表面, 生成确定性的伪随机帧
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::{Frame, FrameSource, ListenerId, PlaybackListener, PlaybackState, SharedFrameSource};

pub struct SyntheticSource {
    playback: SharedFrameSource, // 播放状态与回调
    rng: Mutex<StdRng>,
    width: u32,
    height: u32,
    available: AtomicBool,
    frames: AtomicU64,
}

impl SyntheticSource {
    pub fn new(width: u32, height: u32, seed: u64) -> Self {
        Self {
            playback: SharedFrameSource::new(),
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
            width: width.max(1),
            height: height.max(1),
            available: AtomicBool::new(true),
            frames: AtomicU64::new(0),
        }
    }

    /// 模拟渲染表面未就绪
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    pub fn set_playback_state(&self, state: PlaybackState) {
        self.playback.set_playback_state(state);
    }

    pub fn play(&self) {
        self.playback.play();
    }

    pub fn pause(&self) {
        self.playback.pause();
    }

    /// 已生成的帧数
    pub fn frames_generated(&self) -> u64 {
        self.frames.load(Ordering::SeqCst)
    }

    fn generate(&self) -> Frame {
        let n = self.frames.fetch_add(1, Ordering::SeqCst);
        let (w, h) = (self.width as usize, self.height as usize);
        let mut rgba = vec![255u8; w * h * 4];
        let mut rng = self.rng.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        // 随帧平移的渐变 + 噪声
        for (i, px) in rgba.chunks_exact_mut(4).enumerate() {
            let (x, y) = (i % w, i / w);
            let noise: u8 = rng.gen_range(0..16);
            px[0] = ((x as u64 + n * 4) % 256) as u8 ^ noise;
            px[1] = ((y as u64 + n * 2) % 256) as u8 ^ noise;
            px[2] = ((x + y) % 256) as u8;
        }
        Frame::new(rgba, self.width, self.height)
    }
}

impl FrameSource for SyntheticSource {
    fn current_frame(&self) -> Option<Frame> {
        if !self.available.load(Ordering::SeqCst) {
            return None;
        }
        Some(self.generate())
    }

    fn playback_state(&self) -> PlaybackState {
        self.playback.playback_state()
    }

    fn on_playback_state_changed(&self, listener: PlaybackListener) -> ListenerId {
        self.playback.on_playback_state_changed(listener)
    }

    fn remove_listener(&self, id: ListenerId) {
        self.playback.remove_listener(id);
    }
}
