//! 日志行格式
//!
//! 每条记录写成一行：
//!
//! ```text
//! (I) 2024-05-01T08:30:00 - message text
//! ```
//!
//! 严重程度代码为 `I`/`W`/`C`/`N`，时间为本地时间的 ISO 8601 表示（不带时区）。

use std::io::{self, Write};
use chrono::{Local, TimeZone};

use crate::config::LogRecord;

/// 格式化函数类型，与文件处理器的自定义格式化接口一致
pub type Formatter = Box<dyn Fn(&mut dyn Write, &LogRecord) -> io::Result<()> + Send + Sync>;

/// 本地时间的 ISO 8601 表示
pub fn iso_timestamp(timestamp: i64) -> String {
    match Local.timestamp_opt(timestamp, 0).earliest() {
        Some(time) => time.format("%Y-%m-%dT%H:%M:%S").to_string(),
        None => timestamp.to_string(),
    }
}

/// 默认格式化函数
pub fn default_format(buf: &mut dyn Write, record: &LogRecord) -> io::Result<()> {
    writeln!(
        buf,
        "({}) {} - {}",
        record.severity.code(),
        iso_timestamp(record.timestamp),
        record.text
    )
}

/// 按默认格式生成一行文本（包含换行符）
pub fn format_record(record: &LogRecord) -> String {
    let mut buf = Vec::with_capacity(record.text.len() + 32);
    // 写入 Vec 不会失败
    let _ = default_format(&mut buf, record);
    String::from_utf8_lossy(&buf).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Severity;

    #[test]
    fn test_severity_codes() {
        for (severity, code) in [
            (Severity::Info, "(I) "),
            (Severity::Warning, "(W) "),
            (Severity::Critical, "(C) "),
            (Severity::Normal, "(N) "),
        ] {
            let line = format_record(&LogRecord::new(0, severity, "x"));
            assert!(line.starts_with(code), "{}", line);
        }
    }

    #[test]
    fn test_line_shape() {
        let timestamp = 1_700_000_000;
        let line = format_record(&LogRecord::new(timestamp, Severity::Info, "hello world"));
        let expected = format!("(I) {} - hello world\n", iso_timestamp(timestamp));
        assert_eq!(line, expected);

        // "YYYY-MM-DDTHH:MM:SS"
        let stamp = iso_timestamp(timestamp);
        assert_eq!(stamp.len(), 19);
        assert_eq!(&stamp[10..11], "T");
    }
}
