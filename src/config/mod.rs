//! 配置模块

use serde::{Serialize, Deserialize};
use std::path::PathBuf;

/// 默认刷新间隔（毫秒）
pub const DEFAULT_FLUSH_INTERVAL_MS: u64 = 2000;

/// 后台备份压缩使用的 gzip 等级
pub const DEFAULT_COMPRESSION_LEVEL: u32 = 6;

/// 日志严重程度
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Severity {
    Info,
    Warning,
    Critical,
    Normal,
}

impl Severity {
    /// 写入文件时使用的单字母代码
    pub fn code(&self) -> char {
        match self {
            Severity::Info => 'I',
            Severity::Warning => 'W',
            Severity::Critical => 'C',
            Severity::Normal => 'N',
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Severity::Info => write!(f, "INFO"),
            Severity::Warning => write!(f, "WARNING"),
            Severity::Critical => write!(f, "CRITICAL"),
            Severity::Normal => write!(f, "NORMAL"),
        }
    }
}

/// 备份过期时间单位
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AgeType {
    Days,
    Months,
    Years,
}

impl AgeType {
    /// 从旧版整数配置值转换
    ///
    /// 0 = 天，1 = 月，其余任何值都按年处理。这是历史兼容行为，
    /// 并不是输入校验。
    pub fn from_raw(value: i32) -> Self {
        match value {
            0 => AgeType::Days,
            1 => AgeType::Months,
            _ => AgeType::Years,
        }
    }
}

impl From<i32> for AgeType {
    fn from(value: i32) -> Self {
        AgeType::from_raw(value)
    }
}

/// 日志记录
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogRecord {
    /// 自 UNIX 纪元起的秒数
    pub timestamp: i64,
    pub severity: Severity,
    pub text: String,
}

impl LogRecord {
    pub fn new<S: Into<String>>(timestamp: i64, severity: Severity, text: S) -> Self {
        Self {
            timestamp,
            severity,
            text: text.into(),
        }
    }

    /// 以当前时间创建记录
    pub fn now<S: Into<String>>(severity: Severity, text: S) -> Self {
        Self::new(chrono::Utc::now().timestamp(), severity, text)
    }
}

/// 文件日志配置
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggerConfig {
    /// 日志目录
    pub log_dir: PathBuf,
    /// 活动日志文件名
    pub file_name: String,
    /// 触发轮转的文件大小（字节）
    pub max_size: u64,
    /// 是否启用备份（关闭时不会按大小轮转）
    pub backup: bool,
    /// 是否在后台压缩备份
    pub compress_backups: bool,
    /// 是否删除过期备份
    pub delete_old: bool,
    /// 过期时间数值
    pub max_age: u32,
    /// 过期时间单位
    pub age_type: AgeType,
    /// 延迟刷新间隔（毫秒）
    pub flush_interval_ms: u64,
    /// gzip 压缩等级 0-9
    pub compression_level: u32,
    /// 压缩线程数
    pub compress_threads: usize,
}

impl LoggerConfig {
    /// 活动日志文件的完整路径
    pub fn log_path(&self) -> PathBuf {
        self.log_dir.join(&self.file_name)
    }

    /// 验证配置的有效性
    pub fn validate(&self) -> Result<(), String> {
        if self.file_name.is_empty() {
            return Err("配置错误: 日志文件名不能为空".to_string());
        }
        if self.file_name.contains('/') || self.file_name.contains('\\') {
            return Err(format!("配置错误: 日志文件名不能包含路径分隔符: {}", self.file_name));
        }
        if self.max_size == 0 {
            return Err("配置错误: 最大文件大小不能为 0".to_string());
        }
        if self.flush_interval_ms == 0 {
            return Err("配置错误: 刷新间隔不能为 0".to_string());
        }
        if self.flush_interval_ms > 60000 {
            return Err("配置错误: 刷新间隔过长 (最大 60秒)".to_string());
        }
        if self.compression_level > 9 {
            return Err(format!("配置错误: 压缩等级必须在 0-9 之间，当前为 {}", self.compression_level));
        }
        if self.compress_threads == 0 {
            return Err("配置错误: 压缩线程数不能为 0".to_string());
        }
        Ok(())
    }

    /// 应用一次配置变更
    pub fn apply(&mut self, change: ConfigChange) {
        match change {
            ConfigChange::MaxSize(bytes) => self.max_size = bytes,
            ConfigChange::Age(age) => self.max_age = age,
            ConfigChange::AgeType(age_type) => self.age_type = age_type,
            ConfigChange::Backup(enabled) => self.backup = enabled,
            ConfigChange::CompressBackups(enabled) => self.compress_backups = enabled,
            ConfigChange::DeleteOld(enabled) => self.delete_old = enabled,
        }
    }
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            log_dir: PathBuf::from("./logs"),
            file_name: "app.log".to_string(),
            max_size: 64 * 1024, // 64KB
            backup: true,
            compress_backups: false,
            delete_old: true,
            max_age: 1,
            age_type: AgeType::Months,
            flush_interval_ms: DEFAULT_FLUSH_INTERVAL_MS,
            compression_level: DEFAULT_COMPRESSION_LEVEL,
            compress_threads: 1,
        }
    }
}

/// 单个策略字段的变更，除路径外的所有 setter 都落到这里
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigChange {
    MaxSize(u64),
    Age(u32),
    AgeType(AgeType),
    Backup(bool),
    CompressBackups(bool),
    DeleteOld(bool),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_age_type_fallback() {
        assert_eq!(AgeType::from_raw(0), AgeType::Days);
        assert_eq!(AgeType::from_raw(1), AgeType::Months);
        assert_eq!(AgeType::from_raw(2), AgeType::Years);
        // 越界值按年处理
        assert_eq!(AgeType::from_raw(-1), AgeType::Years);
        assert_eq!(AgeType::from(42), AgeType::Years);
    }

    #[test]
    fn test_default_config_is_valid() {
        let config = LoggerConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.log_path(), PathBuf::from("./logs").join("app.log"));
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = LoggerConfig::default();
        config.max_size = 0;
        assert!(config.validate().is_err());

        let mut config = LoggerConfig::default();
        config.compression_level = 10;
        assert!(config.validate().is_err());

        let mut config = LoggerConfig::default();
        config.file_name = "sub/app.log".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_apply_changes() {
        let mut config = LoggerConfig::default();
        config.apply(ConfigChange::MaxSize(100));
        config.apply(ConfigChange::AgeType(AgeType::Days));
        config.apply(ConfigChange::CompressBackups(true));
        config.apply(ConfigChange::Backup(false));
        assert_eq!(config.max_size, 100);
        assert_eq!(config.age_type, AgeType::Days);
        assert!(config.compress_backups);
        assert!(!config.backup);

        // 重复设置同一个值是幂等的
        let snapshot = config.clone();
        config.apply(ConfigChange::MaxSize(100));
        assert_eq!(config, snapshot);
    }
}
