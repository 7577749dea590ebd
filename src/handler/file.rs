//! 文件日志处理器 - 活动日志文件与轮转逻辑
//!
//! 处理器只在工作线程上运行，所有文件操作（写入、轮转、备份命名、过期清理、
//! 压缩结果改名）都在同一条时间线上串行完成。

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use arc_swap::ArcSwap;
use crossbeam_channel::Sender;

use crate::config::{ConfigChange, LogRecord, LoggerConfig, Severity};
use crate::core::LogCommand;
use crate::fmt_impl::{Formatter, default_format};
use crate::handler::backup::{self, PendingTemp};
use crate::handler::compress::{CompressionOutcome, CompressionWorker, compress_backup};
use crate::policy::is_obsolete;
use crate::producer_consumer::{LogProcessor, WriteOutcome};
use crate::source::LogSink;

/// 文件日志处理器
pub struct FileProcessor {
    config: LoggerConfig,
    snapshot: Arc<ArcSwap<LoggerConfig>>,
    sink: Arc<dyn LogSink>,
    formatter: Formatter,
    current_dir: Option<PathBuf>,
    file: Option<BufWriter<File>>,
    size: u64,
    compressor: CompressionWorker,
    /// 尚未处理结果的压缩任务：临时文件 -> 源备份
    in_flight: HashMap<PathBuf, PathBuf>,
    mailbox: Option<Sender<LogCommand>>,
}

impl FileProcessor {
    /// 创建新的文件处理器，日志文件在第一次 `change_path` 时打开
    pub fn new(config: LoggerConfig, sink: Arc<dyn LogSink>) -> Self {
        let compressor = CompressionWorker::new(config.compress_threads, config.compression_level);
        Self {
            snapshot: Arc::new(ArcSwap::from_pointee(config.clone())),
            config,
            sink,
            formatter: Box::new(default_format),
            current_dir: None,
            file: None,
            size: 0,
            compressor,
            in_flight: HashMap::new(),
            mailbox: None,
        }
    }

    /// 设置自定义格式化函数
    pub fn with_formatter<F>(mut self, formatter: F) -> Self
    where
        F: Fn(&mut dyn Write, &LogRecord) -> std::io::Result<()> + Send + Sync + 'static,
    {
        self.formatter = Box::new(formatter);
        self
    }

    /// 供外部读取的配置快照
    pub fn snapshot(&self) -> Arc<ArcSwap<LoggerConfig>> {
        Arc::clone(&self.snapshot)
    }

    pub fn config(&self) -> &LoggerConfig {
        &self.config
    }

    /// 活动日志文件路径
    pub fn log_path(&self) -> PathBuf {
        self.config.log_path()
    }

    pub fn is_open(&self) -> bool {
        self.file.is_some()
    }

    /// 当前活动文件大小（包含尚未刷新的部分）
    pub fn size(&self) -> u64 {
        self.size
    }

    fn publish_config(&self) {
        self.snapshot.store(Arc::new(self.config.clone()));
    }

    fn open_log_file(&mut self) {
        let path = self.log_path();
        match open_for_append(&path) {
            Ok(file) => {
                self.size = file.metadata().map(|m| m.len()).unwrap_or(0);
                self.file = Some(BufWriter::new(file));
            }
            Err(e) => {
                self.file = None;
                self.size = 0;
                self.sink.log_msg(
                    &format!("打开日志文件 {} 时出错，文件日志已禁用: {}", path.display(), e),
                    Severity::Critical,
                );
            }
        }
    }

    fn close_log_file(&mut self) {
        if let Some(mut file) = self.file.take() {
            if let Err(e) = file.flush() {
                eprintln!("[{}] 关闭日志文件时刷新失败: {}", self.name(), e);
            }
        }
    }

    fn evict_obsolete(&self) {
        if !self.config.delete_old {
            return;
        }
        backup::evict_obsolete(
            &self.log_path(),
            self.config.compress_backups,
            self.config.age_type,
            self.config.max_age,
        );
    }

    /// 把已关闭的活动文件改名为备份，必要时安排压缩
    fn make_backup(&mut self) {
        let base = self.log_path();
        let target = self.next_backup_name(&base, false);
        match backup::rename_no_clobber(&base, &target) {
            Ok(()) => {
                if self.config.compress_backups {
                    self.schedule_compression(target);
                }
            }
            Err(e) => eprintln!(
                "[{}] 备份 {} -> {} 失败: {}",
                self.name(),
                base.display(),
                target.display(),
                e
            ),
        }
        self.evict_obsolete();
    }

    fn rotate(&mut self) {
        self.close_log_file();
        self.make_backup();
        self.open_log_file();
    }

    /// 下一个备份名，压缩结果尚未处理的编号保持占用
    fn next_backup_name(&self, base: &Path, compressed: bool) -> PathBuf {
        backup::next_backup_name_reserved(base, compressed, |plain| {
            self.in_flight.values().any(|source| source == plain)
        })
    }

    fn schedule_compression(&mut self, source: PathBuf) {
        let temp = backup::compress_temp_path(&source);
        self.in_flight.insert(temp.clone(), source.clone());

        match self.mailbox.clone() {
            Some(mailbox) => {
                self.compressor.submit(source, temp, move |outcome| {
                    // 日志器已关闭时通道断开，结果直接丢弃，临时文件留待下次启动时接管
                    let _ = mailbox.send(LogCommand::Compressed(outcome));
                });
            }
            None => {
                // 没有工作线程时在当前线程完成压缩
                let result = compress_backup(&source, &temp, self.config.compression_level);
                self.finish_compression(CompressionOutcome { source, temp, result });
            }
        }
    }

    fn finish_compression(&mut self, outcome: CompressionOutcome) {
        self.in_flight.remove(&outcome.temp);
        if let Err(e) = outcome.result {
            eprintln!("[{}] 压缩备份失败，保留未压缩文件: {}", self.name(), e);
            return;
        }

        let base = outcome.source.with_file_name(&self.config.file_name);
        let target = self.next_backup_name(&base, true);
        if let Err(e) = backup::rename_no_clobber(&outcome.temp, &target) {
            eprintln!(
                "[{}] 压缩备份改名 {} -> {} 失败: {}",
                self.name(),
                outcome.temp.display(),
                target.display(),
                e
            );
        }
    }

    /// 接管上次运行遗留的压缩临时文件
    ///
    /// 源备份已不存在说明压缩已完整写入，改名到 `.gz` 编号；源备份仍在说明
    /// 压缩未完成，删除临时文件。本进程尚未处理结果的任务按临时文件识别，不受影响。
    fn recover_pending(&mut self) {
        let base = self.log_path();
        let pending = match backup::pending_temps(&base) {
            Ok(pending) => pending,
            Err(e) => {
                eprintln!("[{}] 扫描压缩临时文件失败: {}", self.name(), e);
                return;
            }
        };

        for PendingTemp { temp, source } in pending {
            if self.in_flight.contains_key(&temp) {
                continue;
            }
            if fs::symlink_metadata(&source).is_ok() {
                if let Err(e) = fs::remove_file(&temp) {
                    eprintln!("[{}] 删除未完成的压缩文件 {} 失败: {}", self.name(), temp.display(), e);
                }
                continue;
            }
            let target = self.next_backup_name(&base, true);
            if let Err(e) = backup::rename_no_clobber(&temp, &target) {
                eprintln!("[{}] 接管压缩文件 {} 失败: {}", self.name(), temp.display(), e);
            }
        }
    }

    fn same_dir(&self, dir: &Path) -> bool {
        // 按原始字符串比较，大小写敏感，不做规范化
        self.current_dir
            .as_ref()
            .is_some_and(|current| current.as_os_str() == dir.as_os_str())
    }
}

fn open_for_append(path: &Path) -> std::io::Result<File> {
    let file = OpenOptions::new().create(true).append(true).open(path)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        file.set_permissions(fs::Permissions::from_mode(0o600))?;
    }
    Ok(file)
}

impl LogProcessor for FileProcessor {
    fn name(&self) -> &'static str {
        "file_processor"
    }

    fn attach(&mut self, mailbox: Sender<LogCommand>) {
        self.mailbox = Some(mailbox);
    }

    fn process(&mut self, record: &LogRecord) -> Result<WriteOutcome, String> {
        if self.file.is_none() {
            return Ok(WriteOutcome::Dropped);
        }

        let mut line = Vec::with_capacity(record.text.len() + 32);
        (self.formatter)(&mut line, record)
            .map_err(|e| format!("格式化失败: {}", e))?;
        let len = line.len() as u64;

        // 非空文件放不下这条记录时先轮转，保证文件最多超出一条记录的长度
        if self.config.backup && self.size > 0 && self.size + len > self.config.max_size {
            self.rotate();
        }

        let Some(file) = self.file.as_mut() else {
            return Ok(WriteOutcome::Dropped);
        };
        file.write_all(&line)
            .map_err(|e| format!("写入日志文件失败: {}", e))?;
        self.size += len;

        // 写入后检查：刚好写满的记录留在被轮转出去的文件里
        if self.config.backup && self.size >= self.config.max_size {
            self.rotate();
            return Ok(WriteOutcome::Rotated);
        }
        Ok(WriteOutcome::Written)
    }

    fn change_path(&mut self, dir: &Path) -> Result<(), String> {
        if self.same_dir(dir) {
            return Ok(());
        }

        self.close_log_file();
        self.current_dir = Some(dir.to_path_buf());
        self.config.log_dir = dir.to_path_buf();
        self.publish_config();

        if let Err(e) = fs::create_dir_all(dir) {
            eprintln!("[{}] 创建日志目录 {} 失败: {}", self.name(), dir.display(), e);
        }

        self.recover_pending();
        self.evict_obsolete();

        let path = self.log_path();
        if let Ok(metadata) = fs::metadata(&path) {
            // 过期判定不受 delete_old 影响，delete_old 只控制备份清理
            let obsolete = metadata
                .modified()
                .is_ok_and(|modified| is_obsolete(modified, self.config.age_type, self.config.max_age));
            if obsolete {
                if let Err(e) = fs::remove_file(&path) {
                    eprintln!("[{}] 删除过期日志文件 {} 失败: {}", self.name(), path.display(), e);
                }
            } else if self.config.backup && metadata.len() >= self.config.max_size {
                self.make_backup();
            }
        }

        self.open_log_file();
        Ok(())
    }

    fn configure(&mut self, change: ConfigChange) {
        self.config.apply(change);
        self.publish_config();
    }

    fn handle_compressed(&mut self, outcome: CompressionOutcome) -> Result<(), String> {
        self.finish_compression(outcome);
        Ok(())
    }

    fn flush(&mut self) -> Result<(), String> {
        if let Some(file) = self.file.as_mut() {
            file.flush()
                .map_err(|e| format!("刷新日志文件失败: {}", e))?;
        }
        Ok(())
    }

    fn cleanup(&mut self) -> Result<(), String> {
        // 后台压缩任务不等待，线程池在处理完已提交的任务后自行退出
        self.close_log_file();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fmt_impl::format_record;
    use crate::gzip::decompress_bytes;
    use crate::source::{MessageBuffer, MessageSource};
    use filetime::FileTime;
    use tempfile::TempDir;

    fn processor(dir: &Path, max_size: u64) -> (FileProcessor, Arc<MessageBuffer>) {
        let sink = Arc::new(MessageBuffer::new());
        let config = LoggerConfig {
            log_dir: dir.to_path_buf(),
            max_size,
            delete_old: false,
            ..LoggerConfig::default()
        };
        let mut processor = FileProcessor::new(config, sink.clone());
        processor.change_path(dir).unwrap();
        (processor, sink)
    }

    /// 生成格式化后恰好 `len` 字节的记录
    fn record_of_len(len: usize) -> LogRecord {
        let overhead = format_record(&LogRecord::new(0, Severity::Info, "")).len();
        LogRecord::new(0, Severity::Info, "x".repeat(len - overhead))
    }

    #[test]
    fn test_rotates_before_overflowing() {
        let dir = TempDir::new().unwrap();
        let (mut processor, _) = processor(dir.path(), 100);
        let first = record_of_len(80);
        let second = record_of_len(70);

        assert_eq!(processor.process(&first).unwrap(), WriteOutcome::Written);
        assert_eq!(processor.process(&second).unwrap(), WriteOutcome::Written);
        processor.flush().unwrap();

        let active = fs::read_to_string(processor.log_path()).unwrap();
        assert_eq!(active, format_record(&second));
        let backup = fs::read_to_string(dir.path().join("app.log.bak")).unwrap();
        assert_eq!(backup, format_record(&first));
    }

    #[test]
    fn test_record_that_fills_file_is_rotated_out_with_it() {
        let dir = TempDir::new().unwrap();
        let (mut processor, _) = processor(dir.path(), 100);
        let first = record_of_len(40);
        let second = record_of_len(60);

        processor.process(&first).unwrap();
        assert_eq!(processor.process(&second).unwrap(), WriteOutcome::Rotated);

        let backup = fs::read_to_string(dir.path().join("app.log.bak")).unwrap();
        assert_eq!(backup, format!("{}{}", format_record(&first), format_record(&second)));
        assert_eq!(fs::metadata(processor.log_path()).unwrap().len(), 0);
        assert_eq!(processor.size(), 0);
    }

    #[test]
    fn test_no_rotation_when_backup_disabled() {
        let dir = TempDir::new().unwrap();
        let (mut processor, _) = processor(dir.path(), 50);
        processor.configure(ConfigChange::Backup(false));

        for _ in 0..5 {
            assert_eq!(processor.process(&record_of_len(40)).unwrap(), WriteOutcome::Written);
        }
        processor.flush().unwrap();
        assert_eq!(fs::metadata(processor.log_path()).unwrap().len(), 200);
        assert!(!dir.path().join("app.log.bak").exists());
    }

    #[test]
    fn test_inline_compression_without_worker() {
        let dir = TempDir::new().unwrap();
        let (mut processor, _) = processor(dir.path(), 100);
        processor.configure(ConfigChange::CompressBackups(true));

        let record = record_of_len(100);
        assert_eq!(processor.process(&record).unwrap(), WriteOutcome::Rotated);

        assert!(!dir.path().join("app.log.bak").exists());
        let compressed = fs::read(dir.path().join("app.log.bak.gz")).unwrap();
        assert_eq!(decompress_bytes(&compressed).unwrap(), format_record(&record).into_bytes());
    }

    #[test]
    fn test_change_path_rotates_oversized_file() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("nested").join("logs");
        fs::create_dir_all(&target).unwrap();
        fs::write(target.join("app.log"), vec![b'a'; 150]).unwrap();

        let (mut processor, _) = processor(dir.path(), 100);
        processor.change_path(&target).unwrap();

        assert!(processor.is_open());
        assert_eq!(fs::read(target.join("app.log.bak")).unwrap().len(), 150);
        assert_eq!(fs::metadata(target.join("app.log")).unwrap().len(), 0);
        assert_eq!(processor.snapshot().load().log_dir, target);
    }

    #[test]
    fn test_change_path_to_same_dir_is_noop() {
        let dir = TempDir::new().unwrap();
        let (mut processor, _) = processor(dir.path(), 1000);
        processor.process(&record_of_len(40)).unwrap();
        processor.change_path(dir.path()).unwrap();
        // 文件未被关闭重开，缓冲区仍然有效
        assert_eq!(processor.size(), 40);
        assert!(processor.is_open());
    }

    #[test]
    fn test_change_path_deletes_obsolete_file() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("old");
        fs::create_dir_all(&target).unwrap();
        let stale = target.join("app.log");
        fs::write(&stale, b"stale contents\n").unwrap();
        filetime::set_file_mtime(&stale, FileTime::from_unix_time(1_000_000, 0)).unwrap();

        // 清理开关关闭时过期的活动文件同样直接删除
        let (mut processor, _) = processor(dir.path(), 1000);
        assert!(!processor.config().delete_old);
        processor.change_path(&target).unwrap();

        assert_eq!(fs::metadata(&stale).unwrap().len(), 0);
        assert!(!target.join("app.log.bak").exists());
    }

    #[test]
    fn test_slot_stays_reserved_until_compression_is_handled() {
        let dir = TempDir::new().unwrap();
        let (mut processor, _) = processor(dir.path(), 100);
        let (mailbox, results) = crossbeam_channel::unbounded();
        processor.attach(mailbox);
        processor.configure(ConfigChange::CompressBackups(true));

        let wait_outcome = || match results.recv_timeout(std::time::Duration::from_secs(10)).unwrap() {
            LogCommand::Compressed(outcome) => outcome,
            other => panic!("unexpected command: {:?}", other),
        };

        let first = record_of_len(100);
        processor.process(&first).unwrap();
        // 第一个任务已经删除了 app.log.bak，但结果还没有交给处理器
        let first_outcome = wait_outcome();
        assert!(!dir.path().join("app.log.bak").exists());

        let second = record_of_len(100);
        processor.process(&second).unwrap();
        let second_outcome = wait_outcome();
        assert_ne!(first_outcome.temp, second_outcome.temp);
        assert_eq!(second_outcome.source, dir.path().join("app.log.bak1"));
        assert!(first_outcome.result.is_ok());
        assert!(second_outcome.result.is_ok());

        processor.handle_compressed(first_outcome).unwrap();
        processor.handle_compressed(second_outcome).unwrap();

        let mut names: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .collect();
        names.sort();
        assert_eq!(names, vec!["app.log", "app.log.bak.gz", "app.log.bak1.gz"]);

        let mut contents: Vec<_> = ["app.log.bak.gz", "app.log.bak1.gz"]
            .iter()
            .map(|name| decompress_bytes(&fs::read(dir.path().join(name)).unwrap()).unwrap())
            .collect();
        contents.sort();
        let mut expected = vec![format_record(&first).into_bytes(), format_record(&second).into_bytes()];
        expected.sort();
        assert_eq!(contents, expected);
    }

    #[test]
    fn test_unhandled_job_temp_survives_change_path() {
        let dir = TempDir::new().unwrap();
        let other = dir.path().join("other");
        let base = dir.path().join("app.log");
        let source = backup::backup_path(&base, 0, false);
        fs::write(&source, b"plain").unwrap();

        let (mut processor, _) = processor(dir.path(), 1000);

        // 同一个源编号先后有两个任务，前一个的结果先到
        let finished = dir.path().join("app.log.bak.gz.job1");
        let running = dir.path().join("app.log.bak.gz.job2");
        fs::write(&running, b"\x1f\x8b").unwrap();
        processor.in_flight.insert(finished.clone(), source.clone());
        processor.in_flight.insert(running.clone(), source.clone());
        processor.handle_compressed(CompressionOutcome {
            source: source.clone(),
            temp: finished,
            result: Err(crate::handler::compress::CompressError::Open(
                source.clone(),
                std::io::Error::from(std::io::ErrorKind::NotFound),
            )),
        })
        .unwrap();

        processor.change_path(&other).unwrap();
        processor.change_path(dir.path()).unwrap();

        // 仍在进行的任务的临时文件不能被当作遗留文件删除
        assert!(running.exists());
        assert!(source.exists());
    }

    #[test]
    fn test_failed_backup_rename_still_reopens_file() {
        let dir = TempDir::new().unwrap();
        let (mut processor, _) = processor(dir.path(), 200);

        processor.process(&record_of_len(100)).unwrap();
        // 活动文件被外部删除，轮转时改名失败
        fs::remove_file(processor.log_path()).unwrap();
        assert_eq!(processor.process(&record_of_len(150)).unwrap(), WriteOutcome::Written);
        assert!(!dir.path().join("app.log.bak").exists());

        assert!(processor.is_open());
        let later = record_of_len(40);
        assert_eq!(processor.process(&later).unwrap(), WriteOutcome::Written);
        processor.flush().unwrap();
        let active = fs::read_to_string(processor.log_path()).unwrap();
        assert!(active.ends_with(&format_record(&later)));
        assert_eq!(active.len(), 190);
    }

    #[test]
    fn test_open_failure_reports_critical_and_drops() {
        let dir = TempDir::new().unwrap();
        // 目录位置上放一个普通文件，目录无法创建
        let blocker = dir.path().join("blocker");
        fs::write(&blocker, b"").unwrap();

        let (mut processor, sink) = processor(dir.path(), 1000);
        processor.change_path(&blocker.join("logs")).unwrap();

        assert!(!processor.is_open());
        assert_eq!(processor.process(&record_of_len(40)).unwrap(), WriteOutcome::Dropped);
        let critical: Vec<_> = sink
            .messages()
            .into_iter()
            .filter(|r| r.severity == Severity::Critical)
            .collect();
        assert_eq!(critical.len(), 1);

        // 切回可用目录后恢复写入
        processor.change_path(dir.path()).unwrap();
        assert!(processor.is_open());
        assert_eq!(processor.process(&record_of_len(40)).unwrap(), WriteOutcome::Written);
    }

    #[test]
    fn test_recovers_finished_and_partial_temps() {
        let dir = TempDir::new().unwrap();
        let base = dir.path().join("app.log");

        // 源已删除：压缩已完成，应被接管
        let finished = dir.path().join("app.log.bak2.gz.abc");
        fs::write(&finished, crate::gzip::compress_bytes(b"done", 6).unwrap()).unwrap();
        // 源仍在：压缩未完成，应被删除
        let source = backup::backup_path(&base, 3, false);
        fs::write(&source, b"plain").unwrap();
        let partial = dir.path().join("app.log.bak3.gz.abd");
        fs::write(&partial, b"\x1f\x8b").unwrap();

        let (_processor, _) = processor(dir.path(), 1000);

        assert!(!finished.exists());
        assert!(!partial.exists());
        assert!(source.exists());
        let adopted = fs::read(backup::backup_path(&base, 0, true)).unwrap();
        assert_eq!(decompress_bytes(&adopted).unwrap(), b"done");
    }
}
