//! 日志核心模块 - 文件日志器的对外接口
//!
//! `FileLogger` 本身不做任何文件操作：追加、配置变更和刷新都被转成
//! `LogCommand` 发送给唯一的工作线程，由 `FileProcessor` 按顺序执行。

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use arc_swap::ArcSwap;
use crossbeam_channel::Sender;

use crate::config::{AgeType, ConfigChange, LogRecord, LoggerConfig};
use crate::fmt_impl::Formatter;
use crate::handler::compress::CompressionOutcome;
use crate::handler::file::FileProcessor;
use crate::producer_consumer::{FlushConfig, ProcessorWorker};
use crate::source::{LogSink, MessageSource, SubscriptionId};

/// 等待工作线程确认刷新的最长时间
const FLUSH_TIMEOUT: Duration = Duration::from_secs(30);

/// 统一的日志命令枚举
#[derive(Debug)]
pub enum LogCommand {
    /// 写入日志记录
    Write(LogRecord),
    /// 切换日志目录
    ChangePath(PathBuf),
    /// 修改策略配置
    Configure(ConfigChange),
    /// 后台压缩任务完成
    Compressed(CompressionOutcome),
    /// 强制刷新，可选地在完成后通知调用方
    Flush(Option<Sender<()>>),
    /// 停止工作线程
    Shutdown,
}

/// 日志器错误
#[derive(Debug)]
pub enum LoggerError {
    /// 配置无效
    InvalidConfig(String),
    /// 工作线程不可用
    Worker(String),
}

impl std::fmt::Display for LoggerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LoggerError::InvalidConfig(msg) => write!(f, "配置无效: {}", msg),
            LoggerError::Worker(msg) => write!(f, "工作线程错误: {}", msg),
        }
    }
}

impl std::error::Error for LoggerError {}

/// 文件日志器
///
/// 创建时打开 `<log_dir>/<file_name>`，回放消息来源中已缓存的消息，
/// 然后订阅新消息。所有 setter 都是幂等的，只修改配置；只有
/// `change_path` 会立即触发轮转和过期清理。
pub struct FileLogger {
    worker: ProcessorWorker,
    config: Arc<ArcSwap<LoggerConfig>>,
    source: Arc<dyn MessageSource>,
    subscription: Option<SubscriptionId>,
}

impl FileLogger {
    /// 使用给定配置创建文件日志器
    pub fn new<S>(config: LoggerConfig, source: Arc<S>) -> Result<Self, LoggerError>
    where
        S: MessageSource + 'static,
    {
        LoggerBuilder::from_config(config).build(source)
    }

    /// 创建日志构建器
    pub fn builder() -> LoggerBuilder {
        LoggerBuilder::new()
    }

    /// 追加一条记录（通常由订阅回调调用）
    pub fn append(&self, record: LogRecord) {
        self.send(LogCommand::Write(record));
    }

    /// 切换日志目录
    pub fn change_path<P: Into<PathBuf>>(&self, dir: P) {
        self.send(LogCommand::ChangePath(dir.into()));
    }

    /// 设置触发轮转的文件大小
    pub fn set_max_size(&self, bytes: u64) {
        self.configure(ConfigChange::MaxSize(bytes));
    }

    /// 设置过期时间数值
    pub fn set_age(&self, age: u32) {
        self.configure(ConfigChange::Age(age));
    }

    /// 设置过期时间单位
    pub fn set_age_type(&self, age_type: AgeType) {
        self.configure(ConfigChange::AgeType(age_type));
    }

    /// 启用或禁用备份
    pub fn set_backup(&self, enabled: bool) {
        self.configure(ConfigChange::Backup(enabled));
    }

    /// 启用或禁用备份压缩
    pub fn set_compress_backups(&self, enabled: bool) {
        self.configure(ConfigChange::CompressBackups(enabled));
    }

    /// 启用或禁用过期备份删除
    pub fn set_delete_old(&self, enabled: bool) {
        self.configure(ConfigChange::DeleteOld(enabled));
    }

    fn configure(&self, change: ConfigChange) {
        self.send(LogCommand::Configure(change));
    }

    fn send(&self, command: LogCommand) {
        if let Err(e) = self.worker.send(command) {
            eprintln!("[file_logger] {}", e);
        }
    }

    /// 刷新到磁盘，返回时此前提交的所有命令都已执行
    pub fn flush(&self) -> Result<(), LoggerError> {
        self.worker
            .flush_and_wait(FLUSH_TIMEOUT)
            .map_err(LoggerError::Worker)
    }

    /// 工作线程当前使用的配置
    ///
    /// setter 是异步生效的，需要读到刚设置的值时先调用 `flush`。
    pub fn config(&self) -> LoggerConfig {
        LoggerConfig::clone(&self.config.load())
    }

    /// 活动日志文件路径
    pub fn log_path(&self) -> PathBuf {
        self.config.load().log_path()
    }

    /// 关闭日志器：取消订阅，刷新并关闭活动文件
    ///
    /// 后台压缩任务不会被等待。
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        if let Some(id) = self.subscription.take() {
            self.source.unsubscribe(id);
        }
        self.worker.shutdown();
    }
}

impl Drop for FileLogger {
    fn drop(&mut self) {
        self.stop();
    }
}

/// 日志构建器
pub struct LoggerBuilder {
    config: LoggerConfig,
    formatter: Option<Formatter>,
}

impl LoggerBuilder {
    /// 创建新的日志构建器
    pub fn new() -> Self {
        Self::from_config(LoggerConfig::default())
    }

    /// 从已有配置开始构建
    pub fn from_config(config: LoggerConfig) -> Self {
        Self {
            config,
            formatter: None,
        }
    }

    /// 设置日志目录
    pub fn with_log_dir<P: Into<PathBuf>>(mut self, dir: P) -> Self {
        self.config.log_dir = dir.into();
        self
    }

    /// 设置活动日志文件名
    pub fn with_file_name<S: Into<String>>(mut self, name: S) -> Self {
        self.config.file_name = name.into();
        self
    }

    /// 设置触发轮转的文件大小
    pub fn with_max_size(mut self, bytes: u64) -> Self {
        self.config.max_size = bytes;
        self
    }

    /// 启用或禁用备份
    pub fn with_backup(mut self, enabled: bool) -> Self {
        self.config.backup = enabled;
        self
    }

    /// 启用或禁用备份压缩
    pub fn with_compress_backups(mut self, enabled: bool) -> Self {
        self.config.compress_backups = enabled;
        self
    }

    /// 启用或禁用过期删除
    pub fn with_delete_old(mut self, enabled: bool) -> Self {
        self.config.delete_old = enabled;
        self
    }

    /// 设置过期时间
    pub fn with_max_age(mut self, age: u32, age_type: AgeType) -> Self {
        self.config.max_age = age;
        self.config.age_type = age_type;
        self
    }

    /// 设置延迟刷新间隔
    pub fn with_flush_interval_ms(mut self, ms: u64) -> Self {
        self.config.flush_interval_ms = ms;
        self
    }

    /// 设置压缩等级
    pub fn with_compression_level(mut self, level: u32) -> Self {
        self.config.compression_level = level;
        self
    }

    /// 设置压缩线程数
    pub fn with_compress_threads(mut self, threads: usize) -> Self {
        self.config.compress_threads = threads;
        self
    }

    /// 设置自定义格式化函数
    pub fn with_formatter<F>(mut self, formatter: F) -> Self
    where
        F: Fn(&mut dyn Write, &LogRecord) -> std::io::Result<()> + Send + Sync + 'static,
    {
        self.formatter = Some(Box::new(formatter));
        self
    }

    /// 构建日志器并开始接收消息
    pub fn build<S>(self, source: Arc<S>) -> Result<FileLogger, LoggerError>
    where
        S: MessageSource + 'static,
    {
        self.config.validate().map_err(LoggerError::InvalidConfig)?;

        let sink: Arc<dyn LogSink> = source.clone();
        let mut processor = FileProcessor::new(self.config.clone(), sink);
        if let Some(formatter) = self.formatter {
            processor = processor.with_formatter(formatter);
        }
        let snapshot = processor.snapshot();

        let worker = ProcessorWorker::new(
            processor,
            FlushConfig {
                flush_interval_ms: self.config.flush_interval_ms,
            },
        )
        .map_err(LoggerError::Worker)?;

        worker
            .send_change_path(self.config.log_dir.clone())
            .map_err(LoggerError::Worker)?;
        for record in source.messages() {
            worker.send_write(record).map_err(LoggerError::Worker)?;
        }

        let sender = worker.sender().clone();
        let subscription = source.subscribe(Arc::new(move |record: &LogRecord| {
            // 日志器关闭后发送失败，直接忽略
            let _ = sender.send(LogCommand::Write(record.clone()));
        }));

        Ok(FileLogger {
            worker,
            config: snapshot,
            source,
            subscription: Some(subscription),
        })
    }
}

impl Default for LoggerBuilder {
    fn default() -> Self {
        Self::new()
    }
}
