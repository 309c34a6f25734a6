/// 帧缓存 - 按抓帧顺序记录已落盘帧, 超出保留数量时淘汰最旧条目并删除文件
use std::collections::VecDeque;
use std::fs;
use std::io::ErrorKind;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};

use tracing::{debug, warn};

use crate::detection::types::FrameHandle;

struct CacheInner {
    entries: VecDeque<FrameHandle>,
    retention: usize,
}

pub struct FrameCache {
    inner: Mutex<CacheInner>,
    evicted: AtomicU64,
}

impl FrameCache {
    /// `retention` 至少为 1
    pub fn new(retention: usize) -> Self {
        let retention = retention.max(1);
        Self {
            inner: Mutex::new(CacheInner {
                entries: VecDeque::with_capacity(retention.min(1024) + 1),
                retention,
            }),
            evicted: AtomicU64::new(0),
        }
    }

    /// 追加一条记录, 必要时淘汰
    pub fn record(&self, handle: FrameHandle) {
        let evicted = {
            let mut inner = self.lock();
            inner.entries.push_back(handle);
            Self::drain_excess(&mut inner)
        };
        self.delete_all(evicted);
    }

    /// 按抓帧顺序返回当前保留的句柄
    pub fn list(&self) -> Vec<FrameHandle> {
        self.lock().entries.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn retention(&self) -> usize {
        self.lock().retention
    }

    /// 调整保留数量, 立即淘汰超出部分
    pub fn set_retention(&self, retention: usize) {
        let evicted = {
            let mut inner = self.lock();
            inner.retention = retention.max(1);
            Self::drain_excess(&mut inner)
        };
        self.delete_all(evicted);
    }

    /// 清空缓存并删除全部文件
    pub fn clear(&self) {
        let evicted: Vec<FrameHandle> = self.lock().entries.drain(..).collect();
        self.delete_all(evicted);
    }

    /// 累计淘汰数量
    pub fn evicted_total(&self) -> u64 {
        self.evicted.load(Ordering::Relaxed)
    }

    fn drain_excess(inner: &mut CacheInner) -> Vec<FrameHandle> {
        let excess = inner.entries.len().saturating_sub(inner.retention);
        inner.entries.drain(..excess).collect()
    }

    fn delete_all(&self, evicted: Vec<FrameHandle>) {
        for handle in evicted {
            match fs::remove_file(handle.path()) {
                Ok(()) => debug!("🗑️ 淘汰帧#{}: {}", handle.id(), handle.path().display()),
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => warn!(
                    "⚠️ 删除帧文件失败 {}: {}",
                    handle.path().display(),
                    e
                ),
            }
            self.evicted.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn lock(&self) -> MutexGuard<'_, CacheInner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
