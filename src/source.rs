//! 日志消息来源
//!
//! 文件日志器只依赖两个接口：`MessageSource` 提供已缓存的消息和新消息订阅，
//! `LogSink` 用于上报日志器自身的错误（例如无法打开日志文件）。
//! `MessageBuffer` 是两者的内存实现。

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use parking_lot::Mutex;

use crate::config::{LogRecord, Severity};

/// 新消息回调
pub type Subscriber = Arc<dyn Fn(&LogRecord) + Send + Sync>;

/// 订阅句柄
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// 日志上报接口
pub trait LogSink: Send + Sync {
    fn log_msg(&self, text: &str, severity: Severity);
}

/// 消息来源接口
pub trait MessageSource: LogSink {
    /// 已缓存的消息，按产生顺序
    fn messages(&self) -> Vec<LogRecord>;

    /// 订阅新消息
    fn subscribe(&self, subscriber: Subscriber) -> SubscriptionId;

    /// 取消订阅
    fn unsubscribe(&self, id: SubscriptionId);
}

struct BufferInner {
    records: VecDeque<LogRecord>,
    subscribers: Vec<(SubscriptionId, Subscriber)>,
}

/// 有界的内存消息缓冲区
pub struct MessageBuffer {
    inner: Mutex<BufferInner>,
    capacity: usize,
    next_id: AtomicU64,
}

impl MessageBuffer {
    /// 默认最多保留的消息数
    pub const DEFAULT_CAPACITY: usize = 20000;

    pub fn new() -> Self {
        Self::with_capacity(Self::DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(BufferInner {
                records: VecDeque::with_capacity(capacity.min(1024)),
                subscribers: Vec::new(),
            }),
            capacity: capacity.max(1),
            next_id: AtomicU64::new(1),
        }
    }

    /// 发布一条消息：先缓存，再在锁外通知订阅者
    pub fn publish(&self, record: LogRecord) {
        let subscribers: Vec<Subscriber> = {
            let mut inner = self.inner.lock();
            if inner.records.len() >= self.capacity {
                inner.records.pop_front();
            }
            inner.records.push_back(record.clone());
            inner.subscribers.iter().map(|(_, s)| Arc::clone(s)).collect()
        };

        for subscriber in subscribers {
            subscriber(&record);
        }
    }

    /// 当前订阅者数量
    pub fn subscriber_count(&self) -> usize {
        self.inner.lock().subscribers.len()
    }
}

impl Default for MessageBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl LogSink for MessageBuffer {
    fn log_msg(&self, text: &str, severity: Severity) {
        self.publish(LogRecord::now(severity, text));
    }
}

impl MessageSource for MessageBuffer {
    fn messages(&self) -> Vec<LogRecord> {
        self.inner.lock().records.iter().cloned().collect()
    }

    fn subscribe(&self, subscriber: Subscriber) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.inner.lock().subscribers.push((id, subscriber));
        id
    }

    fn unsubscribe(&self, id: SubscriptionId) {
        self.inner.lock().subscribers.retain(|(sid, _)| *sid != id);
    }
}
