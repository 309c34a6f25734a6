/// 采样流水线 (Sampling Pipeline)
///
/// 播放期间按固定间隔: 抓帧 → 检测 → 归约 → 替换叠加层
/// - sampler: 重复计时器 + 单飞门控
/// - session: 一次 start/stop 之间的会话 (代号校验, 工作线程)
/// - hub:     叠加层、订阅回调、诊断通道、计数
pub mod hub;
pub mod sampler;
pub mod session;

pub use hub::{Diagnostic, OverlayListener, PipelineStats};
pub use sampler::{FlightGuard, Sampler, SingleFlight, TickControl};

use std::sync::{Arc, Mutex, MutexGuard};

use crossbeam_channel::Receiver;
use tracing::{info, warn};

use crate::capture::{CaptureOptions, FrameCache, FrameCapture};
use crate::config::PipelineConfig;
use crate::detection::Detector;
use crate::error::PipelineError;
use crate::input::{FrameSource, ListenerId, PlaybackState};
use crate::models::{InferenceModel, LoadOptions};
use crate::overlay::OverlayState;

use hub::{Counters, PipelineHub};
use session::{PipelineSession, SessionShared};

pub struct Pipeline {
    config: PipelineConfig,
    source: Arc<dyn FrameSource>,
    capture: Arc<FrameCapture>,
    detector: Arc<Detector>,
    hub: Arc<PipelineHub>,
    session: Mutex<Option<PipelineSession>>,
    binding: Mutex<Option<ListenerId>>,
}

impl Pipeline {
    pub fn new(
        source: Arc<dyn FrameSource>,
        capture: Arc<FrameCapture>,
        detector: Arc<Detector>,
        config: PipelineConfig,
    ) -> Self {
        let hub = Arc::new(PipelineHub::new(config.diagnostics_capacity));
        Self {
            config,
            source,
            capture,
            detector,
            hub,
            session: Mutex::new(None),
            binding: Mutex::new(None),
        }
    }

    /// 按配置组装帧缓存、抓帧服务和检测器
    pub fn from_config(
        source: Arc<dyn FrameSource>,
        model: Box<dyn InferenceModel>,
        config: PipelineConfig,
    ) -> Self {
        let cache = Arc::new(FrameCache::new(config.retention));
        let capture = Arc::new(FrameCapture::new(
            source.clone(),
            CaptureOptions::from(&config),
            cache,
        ));
        let detector = Arc::new(Detector::new(model));
        Self::new(source, capture, detector, config)
    }

    /// 开始采样 (阻塞直到检测器就绪); 已有活跃会话时不做任何事
    pub fn start(&self) -> Result<(), PipelineError> {
        let mut slot = self.lock_session();
        if slot.as_ref().map(PipelineSession::is_live).unwrap_or(false) {
            return Ok(());
        }
        if let Some(mut old) = slot.take() {
            old.stop();
        }

        self.detector.load(&LoadOptions::from(&self.config))?;

        let generation = self.hub.next_generation();
        let shared = SessionShared {
            generation,
            hub: self.hub.clone(),
            source: self.source.clone(),
            capture: self.capture.clone(),
            detector: self.detector.clone(),
            flight: SingleFlight::new(),
        };
        let session = PipelineSession::spawn(shared, self.config.interval())?;
        Counters::bump(&self.hub.counters.sessions);
        *slot = Some(session);
        Ok(())
    }

    /// 停止采样; 返回后在途周期的结果不会再写入叠加层
    pub fn stop(&self) {
        let session = self.lock_session().take();
        if let Some(mut session) = session {
            session.stop();
        }
    }

    /// 停止并等待工作线程退出
    pub fn shutdown(&self) {
        self.unbind_playback();
        let session = self.lock_session().take();
        if let Some(session) = session {
            session.join();
        }
        info!("👋 流水线已关闭");
    }

    pub fn is_running(&self) -> bool {
        self.lock_session()
            .as_ref()
            .map(PipelineSession::is_live)
            .unwrap_or(false)
    }

    /// 当前会话代号 (无会话时为 None)
    pub fn generation(&self) -> Option<u64> {
        self.lock_session().as_ref().map(PipelineSession::generation)
    }

    /// 跟随视频源的播放状态自动 start/stop
    ///
    /// 回调只持有弱引用; 绑定时已在播放则立即启动
    pub fn bind_playback(self: &Arc<Self>) -> Result<(), PipelineError> {
        self.unbind_playback();

        let weak = Arc::downgrade(self);
        let id = self
            .source
            .on_playback_state_changed(Arc::new(move |state| {
                let Some(pipeline) = weak.upgrade() else {
                    return;
                };
                match state {
                    PlaybackState::Playing => {
                        if let Err(e) = pipeline.start() {
                            warn!("❌ 流水线启动失败: {}", e);
                            pipeline.hub.report(Diagnostic::StartFailed(e.to_string()));
                        }
                    }
                    PlaybackState::Paused | PlaybackState::Stopped => pipeline.stop(),
                }
            }));
        *self.lock_binding() = Some(id);

        if self.source.playback_state() == PlaybackState::Playing {
            self.start()?;
        }
        Ok(())
    }

    pub fn unbind_playback(&self) {
        if let Some(id) = self.lock_binding().take() {
            self.source.remove_listener(id);
        }
    }

    /// 当前叠加层快照
    pub fn overlay(&self) -> OverlayState {
        self.hub.overlay()
    }

    /// 订阅叠加层替换事件 (在工作线程上回调)
    pub fn on_overlay_updated<F>(&self, listener: F)
    where
        F: Fn(&OverlayState) + Send + Sync + 'static,
    {
        self.hub.subscribe(Arc::new(listener));
    }

    /// 诊断事件接收端, 只能取一次; 之后的调用返回 None
    pub fn diagnostics(&self) -> Option<Receiver<Diagnostic>> {
        self.hub.take_diagnostics()
    }

    pub fn stats(&self) -> PipelineStats {
        self.hub.stats()
    }

    /// 手动注入一次 tick, 与计时器共用单飞门控; 无会话时返回 None
    pub fn inject_tick(&self) -> Option<TickControl> {
        self.lock_session().as_ref().map(PipelineSession::inject_tick)
    }

    /// 在调用线程上同步执行一个周期; 无会话或上一周期未完成时返回 None
    pub fn run_cycle_now(&self) -> Option<Diagnostic> {
        // 不持锁执行, 回调里可以安全调用 stop
        let shared = self.lock_session().as_ref().map(PipelineSession::shared)?;
        shared.run_cycle_now()
    }

    pub fn detector(&self) -> &Arc<Detector> {
        &self.detector
    }

    pub fn cache(&self) -> &Arc<FrameCache> {
        self.capture.cache()
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    fn lock_session(&self) -> MutexGuard<'_, Option<PipelineSession>> {
        self.session.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn lock_binding(&self) -> MutexGuard<'_, Option<ListenerId>> {
        self.binding.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        self.unbind_playback();
        self.stop();
    }
}
