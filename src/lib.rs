//! rat_filelog - 轮转文件日志
//!
//! 把日志记录追加到 `<目录>/app.log`，文件超过大小上限时轮转为
//! `app.log.bak[N]`，可选地在后台压缩为 `.gz`，并按时间删除过期备份。
//!
//! ```no_run
//! use std::sync::Arc;
//! use rat_filelog::{FileLogger, MessageBuffer, Severity, LogSink};
//!
//! let source = Arc::new(MessageBuffer::new());
//! let logger = FileLogger::builder()
//!     .with_log_dir("./logs")
//!     .with_max_size(1024 * 1024)
//!     .with_compress_backups(true)
//!     .build(source.clone())
//!     .unwrap();
//!
//! source.log_msg("服务已启动", Severity::Info);
//! logger.set_delete_old(true);
//! ```

pub mod config;
pub mod core;
pub mod fmt_impl;
pub mod gzip;
pub mod handler;
pub mod policy;
pub mod producer_consumer;
pub mod source;

use std::path::PathBuf;
use std::sync::Arc;

// 重新导出主要类型
pub use config::{AgeType, ConfigChange, LogRecord, LoggerConfig, Severity};
pub use crate::core::{FileLogger, LoggerBuilder, LoggerError, LogCommand};
pub use handler::{CompressError, CompressionWorker, FileProcessor};
pub use policy::is_obsolete;
pub use source::{LogSink, MessageBuffer, MessageSource, SubscriptionId};

/// 便捷初始化函数：在 `dir` 下以默认配置打开文件日志
pub fn open<P, S>(dir: P, source: Arc<S>) -> Result<FileLogger, LoggerError>
where
    P: Into<PathBuf>,
    S: MessageSource + 'static,
{
    LoggerBuilder::new().with_log_dir(dir).build(source)
}
