/// 共享帧槽 - 播放引擎写入最新帧与播放状态, 流水线读取
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use tracing::debug;

use super::{Frame, FrameSource, ListenerId, PlaybackListener, PlaybackState};

#[derive(Default)]
struct Inner {
    frame: Option<Frame>,
    state: PlaybackState,
    listeners: Vec<(ListenerId, PlaybackListener)>,
}

#[derive(Default)]
pub struct SharedFrameSource {
    inner: Mutex<Inner>,
    next_listener: AtomicU64,
}

impl SharedFrameSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// 播放引擎推送当前渲染帧
    pub fn present(&self, frame: Frame) {
        self.lock().frame = Some(frame);
    }

    /// 渲染目标失效 (例如窗口重建), 之后抓帧返回 Unavailable
    pub fn clear_frame(&self) {
        self.lock().frame = None;
    }

    /// 设置播放状态; 状态变化时在锁外按注册顺序通知回调
    pub fn set_playback_state(&self, state: PlaybackState) {
        let listeners: Vec<PlaybackListener> = {
            let mut inner = self.lock();
            if inner.state == state {
                return;
            }
            debug!("⏯️ 播放状态: {} → {}", inner.state, state);
            inner.state = state;
            inner.listeners.iter().map(|(_, l)| l.clone()).collect()
        };
        for listener in listeners {
            listener(state);
        }
    }

    pub fn play(&self) {
        self.set_playback_state(PlaybackState::Playing);
    }

    pub fn pause(&self) {
        self.set_playback_state(PlaybackState::Paused);
    }

    pub fn stop(&self) {
        self.set_playback_state(PlaybackState::Stopped);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl FrameSource for SharedFrameSource {
    fn current_frame(&self) -> Option<Frame> {
        self.lock().frame.clone()
    }

    fn playback_state(&self) -> PlaybackState {
        self.lock().state
    }

    fn on_playback_state_changed(&self, listener: PlaybackListener) -> ListenerId {
        let id = ListenerId(self.next_listener.fetch_add(1, Ordering::Relaxed));
        self.lock().listeners.push((id, listener));
        id
    }

    fn remove_listener(&self, id: ListenerId) {
        self.lock().listeners.retain(|(lid, _)| *lid != id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_listener_fires_on_change_only() {
        let source = SharedFrameSource::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = seen.clone();
        let id = source.on_playback_state_changed(Arc::new(move |s| {
            seen_clone.lock().unwrap().push(s);
        }));

        source.play();
        source.play();
        source.pause();
        source.remove_listener(id);
        source.stop();

        assert_eq!(
            *seen.lock().unwrap(),
            vec![PlaybackState::Playing, PlaybackState::Paused]
        );
        assert_eq!(source.playback_state(), PlaybackState::Stopped);
    }

    #[test]
    fn test_listener_may_reenter_source() {
        let source = Arc::new(SharedFrameSource::new());
        let inner = source.clone();
        source.on_playback_state_changed(Arc::new(move |_| {
            // 回调在锁外执行, 可再次读取
            let _ = inner.playback_state();
        }));
        source.play();
        assert_eq!(source.playback_state(), PlaybackState::Playing);
    }

    #[test]
    fn test_present_and_clear() {
        let source = SharedFrameSource::new();
        assert!(source.current_frame().is_none());
        source.present(Frame::new(vec![0; 16], 2, 2));
        assert_eq!(source.current_frame().unwrap().width, 2);
        source.clear_frame();
        assert!(source.current_frame().is_none());
    }
}
