//! 文件处理器模块
//!
//! - `file`: 活动日志文件与轮转
//! - `backup`: 备份命名与过期清理
//! - `compress`: 后台备份压缩

pub mod backup;
pub mod compress;
pub mod file;

pub use file::FileProcessor;
pub use compress::{CompressError, CompressionOutcome, CompressionWorker};
