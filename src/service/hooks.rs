use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// 流水线对外的回调能力: 日志, 状态, 进度, 取消
///
/// 所有方法都可以是空实现; 进度/状态允许丢失, 实现方不得阻塞。
pub trait RunHooks: Send + Sync {
    fn log(&self, _message: &str) {}

    fn status(&self, _message: &str) {}

    fn set_progress_max(&self, _max: usize) {}

    fn set_progress(&self, _value: usize) {}

    fn cancelled(&self) -> bool {
        false
    }
}

/// 全部空实现
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopHooks;

impl RunHooks for NoopHooks {}

/// 共享取消标志
#[derive(Debug, Default, Clone)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// 进度快照
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct ProgressSnapshot {
    pub running: bool,
    pub status: String,
    pub value: usize,
    pub maximum: usize,
}

/// 服务端使用的实现: 转发到 tracing, 并保存最新状态供轮询
#[derive(Debug, Default)]
pub struct TracingHooks {
    cancel: CancelFlag,
    running: AtomicBool,
    value: AtomicUsize,
    maximum: AtomicUsize,
    status: Mutex<String>,
}

impl TracingHooks {
    pub fn new(cancel: CancelFlag) -> Self {
        Self {
            cancel,
            ..Default::default()
        }
    }

    pub fn cancel_flag(&self) -> &CancelFlag {
        &self.cancel
    }

    /// 已在运行时返回 false
    pub fn try_begin(&self) -> bool {
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return false;
        }
        self.cancel.reset();
        self.value.store(0, Ordering::Relaxed);
        self.maximum.store(0, Ordering::Relaxed);
        true
    }

    pub fn finish(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        ProgressSnapshot {
            running: self.running.load(Ordering::SeqCst),
            // 锁被毒化时只丢状态文本
            status: self.status.lock().map(|s| s.clone()).unwrap_or_default(),
            value: self.value.load(Ordering::Relaxed),
            maximum: self.maximum.load(Ordering::Relaxed),
        }
    }
}

impl RunHooks for TracingHooks {
    fn log(&self, message: &str) {
        tracing::info!("{}", message);
    }

    fn status(&self, message: &str) {
        tracing::debug!("status: {}", message);
        if let Ok(mut status) = self.status.try_lock() {
            status.clear();
            status.push_str(message);
        }
    }

    fn set_progress_max(&self, max: usize) {
        self.maximum.store(max, Ordering::Relaxed);
    }

    fn set_progress(&self, value: usize) {
        self.value.store(value, Ordering::Relaxed);
    }

    fn cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}
