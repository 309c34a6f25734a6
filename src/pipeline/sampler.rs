//! 采样计时器 (Sampler) + 单飞门控 (SingleFlight)
//!
//! 计时器跑在独立线程上, `stop()` 返回后不会再有任何 tick 被执行。

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{select, Sender};
use tracing::debug;

use crate::error::PipelineError;

/// tick 回调的返回值
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickControl {
    Continue,
    /// 终止计时器, 需外部重新 `start`
    Halt,
}

#[derive(Default)]
pub struct Sampler {
    stop_tx: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
    running: Arc<AtomicBool>,
}

impl Sampler {
    pub fn new() -> Self {
        Self::default()
    }

    /// 启动重复计时器, 每 `interval` 调用一次 `on_tick`; 已在运行时先停止旧计时器
    pub fn start<F>(&mut self, interval: Duration, mut on_tick: F) -> Result<(), PipelineError>
    where
        F: FnMut() -> TickControl + Send + 'static,
    {
        self.stop();

        let (stop_tx, stop_rx) = crossbeam_channel::bounded::<()>(1);
        let running = Arc::new(AtomicBool::new(true));
        let flag = running.clone();

        let handle = thread::Builder::new()
            .name("sampler-timer".into())
            .spawn(move || {
                let ticker = crossbeam_channel::tick(interval);
                loop {
                    select! {
                        recv(stop_rx) -> _ => break,
                        recv(ticker) -> _ => {
                            if on_tick() == TickControl::Halt {
                                debug!("⏹️ 计时器自行终止");
                                break;
                            }
                        }
                    }
                }
                flag.store(false, Ordering::SeqCst);
            })
            .map_err(|source| PipelineError::Spawn {
                what: "sampler",
                source,
            })?;

        self.stop_tx = Some(stop_tx);
        self.handle = Some(handle);
        self.running = running;
        Ok(())
    }

    /// 停止计时器并等待线程退出
    pub fn stop(&mut self) {
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.try_send(());
        }
        if let Some(handle) = self.handle.take() {
            // 在计时器线程内部调用时不能 join 自己
            if handle.thread().id() != thread::current().id() {
                let _ = handle.join();
            }
        }
        self.running.store(false, Ordering::SeqCst);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

impl Drop for Sampler {
    fn drop(&mut self) {
        self.stop();
    }
}

/// 单飞门控: 同一时刻最多一个周期在执行
#[derive(Clone, Default)]
pub struct SingleFlight {
    busy: Arc<AtomicBool>,
}

impl SingleFlight {
    pub fn new() -> Self {
        Self::default()
    }

    /// 空闲时占用并返回凭证, 忙碌时返回 None
    pub fn try_acquire(&self) -> Option<FlightGuard> {
        self.busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| FlightGuard {
                busy: self.busy.clone(),
            })
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }
}

/// 周期凭证, 丢弃 (含 panic 展开) 即标记周期结束
pub struct FlightGuard {
    busy: Arc<AtomicBool>,
}

impl Drop for FlightGuard {
    fn drop(&mut self) {
        self.busy.store(false, Ordering::Release);
    }
}
