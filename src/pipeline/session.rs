//! 采样会话: 一次 start → stop 之间的计时器 + 工作线程
//!
//! tick (计时器线程) 只做判定和派发, 抓帧/推理在工作线程执行。
//! 周期结束顺序: 提交叠加层 → 释放单飞凭证 → 发送诊断。

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender, TrySendError};
use tracing::{debug, info, warn};

use super::hub::{Counters, Diagnostic, PipelineHub};
use super::sampler::{FlightGuard, Sampler, SingleFlight, TickControl};
use crate::capture::FrameCapture;
use crate::detection::{DetectionBatch, Detector};
use crate::error::{CaptureError, PipelineError};
use crate::input::{FrameSource, PlaybackState};
use crate::overlay;

/// 派发给工作线程的周期任务, 携带单飞凭证
pub(crate) struct Job {
    guard: FlightGuard,
}

/// 会话内各线程共享的协作者
pub(crate) struct SessionShared {
    pub generation: u64,
    pub hub: Arc<PipelineHub>,
    pub source: Arc<dyn FrameSource>,
    pub capture: Arc<FrameCapture>,
    pub detector: Arc<Detector>,
    pub flight: SingleFlight,
}

impl SessionShared {
    /// 计时器回调
    pub fn tick(&self, jobs: &Sender<Job>) -> TickControl {
        if !self.hub.is_current(self.generation) {
            return TickControl::Halt;
        }

        let state = self.source.playback_state();
        if state != PlaybackState::Playing {
            if self.hub.invalidate(self.generation) {
                info!("⏸️ 播放状态为 {}, 采样会话#{} 终止", state, self.generation);
                self.hub.report(Diagnostic::Halted(state));
            }
            return TickControl::Halt;
        }

        let Some(guard) = self.flight.try_acquire() else {
            Counters::bump(&self.hub.counters.skipped_ticks);
            debug!("⏭️ 上一周期未完成, 跳过 tick");
            self.hub.report(Diagnostic::TickSkipped);
            return TickControl::Continue;
        };

        match jobs.try_send(Job { guard }) {
            Ok(()) => {}
            // 凭证随任务一起丢弃
            Err(TrySendError::Full(_)) => {
                Counters::bump(&self.hub.counters.skipped_ticks);
                self.hub.report(Diagnostic::TickSkipped);
            }
            Err(TrySendError::Disconnected(_)) => {
                warn!("⚠️ 工作线程已退出, 会话#{} 终止", self.generation);
                self.hub.invalidate(self.generation);
                return TickControl::Halt;
            }
        }
        TickControl::Continue
    }

    /// 执行一个完整周期: 抓帧 → 检测 → 归约 → 提交
    pub fn run_cycle(&self) -> Diagnostic {
        if !self.hub.is_current(self.generation) {
            Counters::bump(&self.hub.counters.stale_discarded);
            return Diagnostic::StaleResultDiscarded { frame_id: None };
        }

        let start = Instant::now();
        let handle = match self.capture.capture() {
            Ok(handle) => handle,
            Err(e) => {
                Counters::bump(&self.hub.counters.capture_failures);
                match e {
                    CaptureError::SourceUnavailable => debug!("📭 视频源暂无可用帧"),
                    ref other => warn!("⚠️ 抓帧失败: {}", other),
                }
                return Diagnostic::CaptureFailed(e.to_string());
            }
        };

        let frame_id = handle.id();
        let detections = match self.detector.detect(&handle) {
            Ok(detections) => detections,
            Err(e) => {
                Counters::bump(&self.hub.counters.detect_failures);
                warn!("⚠️ 帧#{} 检测失败: {}", frame_id, e);
                return Diagnostic::DetectFailed {
                    frame_id,
                    reason: e.to_string(),
                };
            }
        };

        let batch = DetectionBatch::new(handle, detections);
        let state = overlay::reduce(&batch);
        let kept = state.len();

        if !self.hub.commit(self.generation, state) {
            Counters::bump(&self.hub.counters.stale_discarded);
            debug!("🗑️ 会话#{} 已失效, 丢弃帧#{} 的结果", self.generation, frame_id);
            return Diagnostic::StaleResultDiscarded {
                frame_id: Some(frame_id),
            };
        }

        Counters::bump(&self.hub.counters.cycles);
        let elapsed_ms = start.elapsed().as_secs_f64() * 1000.0;
        debug!(
            "🎯 帧#{}: {} 个检测, 保留 {} 个 ({:.1}ms)",
            frame_id,
            batch.detections.len(),
            kept,
            elapsed_ms
        );
        Diagnostic::CycleCompleted {
            frame_id,
            detections: batch.detections.len(),
            kept,
            elapsed_ms,
        }
    }

    /// 在调用线程上同步执行一个周期, 同样受单飞约束
    pub fn run_cycle_now(&self) -> Option<Diagnostic> {
        let guard = self.flight.try_acquire()?;
        let diagnostic = self.run_cycle();
        drop(guard);
        self.hub.report(diagnostic.clone());
        Some(diagnostic)
    }

    fn work(&self, jobs: Receiver<Job>) {
        while let Ok(Job { guard }) = jobs.recv() {
            let diagnostic = self.run_cycle();
            drop(guard);
            self.hub.report(diagnostic);
        }
        debug!("👋 会话#{} 工作线程退出", self.generation);
    }
}

pub(crate) struct PipelineSession {
    shared: Arc<SessionShared>,
    jobs: Option<Sender<Job>>,
    sampler: Sampler,
    worker: Option<JoinHandle<()>>,
}

impl PipelineSession {
    pub fn spawn(shared: SessionShared, interval: Duration) -> Result<Self, PipelineError> {
        let shared = Arc::new(shared);
        // 容量 1: 单飞保证最多只有一个任务在途
        let (job_tx, job_rx) = crossbeam_channel::bounded::<Job>(1);

        let worker_shared = shared.clone();
        let worker = thread::Builder::new()
            .name(format!("pipeline-worker-{}", shared.generation))
            .spawn(move || worker_shared.work(job_rx))
            .map_err(|source| PipelineError::Spawn {
                what: "pipeline worker",
                source,
            })?;

        let mut sampler = Sampler::new();
        let tick_shared = shared.clone();
        let tick_jobs = job_tx.clone();
        if let Err(e) = sampler.start(interval, move || tick_shared.tick(&tick_jobs)) {
            shared.hub.invalidate(shared.generation);
            return Err(e);
        }

        info!(
            "▶️ 采样会话#{} 启动, 间隔 {}ms",
            shared.generation,
            interval.as_millis()
        );
        Ok(Self {
            shared,
            jobs: Some(job_tx),
            sampler,
            worker: Some(worker),
        })
    }

    pub fn generation(&self) -> u64 {
        self.shared.generation
    }

    /// 计时器仍在运行且会话未失效
    pub fn is_live(&self) -> bool {
        self.sampler.is_running() && self.shared.hub.is_current(self.shared.generation)
    }

    /// 在调用线程上执行一次 tick 判定并派发
    pub fn inject_tick(&self) -> TickControl {
        match &self.jobs {
            Some(jobs) => self.shared.tick(jobs),
            None => TickControl::Halt,
        }
    }

    pub fn shared(&self) -> Arc<SessionShared> {
        self.shared.clone()
    }

    /// 失效 → 停止计时器 → 断开任务通道; 不等待在途周期
    pub fn stop(&mut self) {
        if self.shared.hub.invalidate(self.shared.generation) {
            info!("⏹️ 采样会话#{} 停止", self.shared.generation);
        }
        self.sampler.stop();
        self.jobs.take();
    }

    /// 停止并等待工作线程退出
    pub fn join(mut self) {
        self.stop();
        if let Some(worker) = self.worker.take() {
            if worker.thread().id() != thread::current().id() {
                let _ = worker.join();
            }
        }
    }
}

impl Drop for PipelineSession {
    fn drop(&mut self) {
        self.stop();
    }
}
