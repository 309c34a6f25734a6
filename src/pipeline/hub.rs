//! 流水线共享状态: 当前叠加层、订阅回调、诊断通道、计数器和会话代号
//!
//! 代号校验和叠加层替换都在同一把锁下完成, 所以 `invalidate` 返回后
//! 旧会话的结果不可能再写入叠加层。

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use crossbeam_channel::{Receiver, Sender};
use serde::Serialize;

use crate::input::PlaybackState;
use crate::overlay::OverlayState;

/// 叠加层更新回调
pub type OverlayListener = Arc<dyn Fn(&OverlayState) + Send + Sync>;

/// 流水线诊断事件
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Diagnostic {
    /// 周期完成并已替换叠加层
    CycleCompleted {
        frame_id: u64,
        detections: usize,
        kept: usize,
        elapsed_ms: f64,
    },
    /// 上一个周期仍在执行, 本次 tick 放弃
    TickSkipped,
    CaptureFailed(String),
    DetectFailed { frame_id: u64, reason: String },
    /// 会话已失效, 结果被丢弃 (frame_id 为 None 表示尚未抓帧)
    StaleResultDiscarded { frame_id: Option<u64> },
    /// 观察到非播放状态, 会话终止
    Halted(PlaybackState),
    StartFailed(String),
}

/// 流水线计数快照
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PipelineStats {
    pub sessions: u64,
    pub cycles: u64,
    pub skipped_ticks: u64,
    pub capture_failures: u64,
    pub detect_failures: u64,
    pub stale_discarded: u64,
}

#[derive(Default)]
pub(crate) struct Counters {
    pub sessions: AtomicU64,
    pub cycles: AtomicU64,
    pub skipped_ticks: AtomicU64,
    pub capture_failures: AtomicU64,
    pub detect_failures: AtomicU64,
    pub stale_discarded: AtomicU64,
}

impl Counters {
    pub fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> PipelineStats {
        PipelineStats {
            sessions: self.sessions.load(Ordering::Relaxed),
            cycles: self.cycles.load(Ordering::Relaxed),
            skipped_ticks: self.skipped_ticks.load(Ordering::Relaxed),
            capture_failures: self.capture_failures.load(Ordering::Relaxed),
            detect_failures: self.detect_failures.load(Ordering::Relaxed),
            stale_discarded: self.stale_discarded.load(Ordering::Relaxed),
        }
    }
}

pub(crate) struct PipelineHub {
    overlay: Mutex<OverlayState>,
    listeners: Mutex<Vec<OverlayListener>>,
    active_generation: AtomicU64,
    diag_tx: Sender<Diagnostic>,
    diag_rx: Mutex<Option<Receiver<Diagnostic>>>, // 只交出一次
    pub counters: Counters,
}

impl PipelineHub {
    pub fn new(diagnostics_capacity: usize) -> Self {
        let (diag_tx, diag_rx) = crossbeam_channel::bounded(diagnostics_capacity.max(1));
        Self {
            overlay: Mutex::new(OverlayState::default()),
            listeners: Mutex::new(Vec::new()),
            active_generation: AtomicU64::new(0),
            diag_tx,
            diag_rx: Mutex::new(Some(diag_rx)),
            counters: Counters::default(),
        }
    }

    /// 开启新会话, 返回其代号; 之前的代号全部失效
    pub fn next_generation(&self) -> u64 {
        let _overlay = self.lock_overlay();
        self.active_generation.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// 使指定会话失效 (仅当它仍是当前会话), 返回是否生效
    pub fn invalidate(&self, generation: u64) -> bool {
        let _overlay = self.lock_overlay();
        self.active_generation
            .compare_exchange(generation, generation + 1, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    pub fn is_current(&self, generation: u64) -> bool {
        self.active_generation.load(Ordering::SeqCst) == generation
    }

    /// 会话仍有效时整体替换叠加层并通知订阅者; 已失效返回 false
    pub fn commit(&self, generation: u64, state: OverlayState) -> bool {
        {
            let mut overlay = self.lock_overlay();
            if !self.is_current(generation) {
                return false;
            }
            *overlay = state.clone();
        }

        let listeners: Vec<OverlayListener> = self.lock_listeners().clone();
        for listener in listeners {
            listener(&state);
        }
        true
    }

    pub fn overlay(&self) -> OverlayState {
        self.lock_overlay().clone()
    }

    pub fn subscribe(&self, listener: OverlayListener) {
        self.lock_listeners().push(listener);
    }

    /// 通道满时丢弃, 不阻塞周期
    pub fn report(&self, diagnostic: Diagnostic) {
        let _ = self.diag_tx.try_send(diagnostic);
    }

    /// 交出诊断接收端; 只有第一次调用返回 Some, 事件不会被多个消费者瓜分
    pub fn take_diagnostics(&self) -> Option<Receiver<Diagnostic>> {
        self.diag_rx
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take()
    }

    pub fn stats(&self) -> PipelineStats {
        self.counters.snapshot()
    }

    fn lock_overlay(&self) -> MutexGuard<'_, OverlayState> {
        self.overlay.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn lock_listeners(&self) -> MutexGuard<'_, Vec<OverlayListener>> {
        self.listeners.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
