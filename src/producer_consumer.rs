//! 单写者工作线程
//! 追加、配置变更、压缩完成通知和定时刷新全部经由同一个命令通道，按到达顺序串行执行

use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};
use crossbeam_channel::{Sender, Receiver, RecvTimeoutError, bounded, unbounded};

use crate::config::{ConfigChange, LogRecord, DEFAULT_FLUSH_INTERVAL_MS};
use crate::handler::compress::CompressionOutcome;

// 重新导出core模块中的LogCommand
pub use crate::core::LogCommand;

/// 刷新配置
#[derive(Debug, Clone)]
pub struct FlushConfig {
    /// 写入后延迟刷新的时间（毫秒）
    pub flush_interval_ms: u64,
}

impl Default for FlushConfig {
    fn default() -> Self {
        Self {
            flush_interval_ms: DEFAULT_FLUSH_INTERVAL_MS,
        }
    }
}

/// 一次写入之后活动文件的状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// 已写入，缓冲区中有待刷新的数据
    Written,
    /// 写入后发生了轮转，新文件中没有待刷新的数据
    Rotated,
    /// 日志文件未打开，记录被丢弃
    Dropped,
}

/// 处理器 trait - 工作线程上唯一的状态持有者
pub trait LogProcessor: Send + 'static {
    /// 处理器名称
    fn name(&self) -> &'static str;

    /// 在工作线程启动前拿到命令通道，用于把后台任务的结果送回本线程
    fn attach(&mut self, _mailbox: Sender<LogCommand>) {}

    /// 处理单条日志记录
    fn process(&mut self, record: &LogRecord) -> Result<WriteOutcome, String>;

    /// 切换日志目录 - 默认忽略
    fn change_path(&mut self, _dir: &Path) -> Result<(), String> {
        Ok(())
    }

    /// 应用配置变更 - 默认忽略
    fn configure(&mut self, _change: ConfigChange) {}

    /// 处理压缩完成通知 - 默认忽略
    fn handle_compressed(&mut self, _outcome: CompressionOutcome) -> Result<(), String> {
        Ok(())
    }

    /// 刷新操作
    fn flush(&mut self) -> Result<(), String>;

    /// 清理资源
    fn cleanup(&mut self) -> Result<(), String>;
}

/// 单个处理器的工作线程
pub struct ProcessorWorker {
    sender: Sender<LogCommand>,
    worker_thread: Option<thread::JoinHandle<()>>,
}

impl ProcessorWorker {
    /// 创建新的处理器工作线程
    pub fn new<P>(mut processor: P, config: FlushConfig) -> Result<Self, String>
    where
        P: LogProcessor + Send + 'static,
    {
        let (sender, receiver) = unbounded();
        processor.attach(sender.clone());

        let processor_name = processor.name();
        let worker_thread = thread::Builder::new()
            .name(format!("rat_filelog-{}", processor_name))
            .spawn(move || {
                Self::worker_thread(processor, receiver, config, processor_name);
            })
            .map_err(|e| format!("启动工作线程失败: {}", e))?;

        Ok(Self {
            sender,
            worker_thread: Some(worker_thread),
        })
    }

    /// 工作线程实现
    ///
    /// 延迟刷新是单次定时器：写入后如果没有待刷新的定时，就在
    /// `flush_interval` 之后刷新一次；期间的多次写入合并为一次刷新。
    /// 轮转、切换目录和显式刷新都会取消定时。
    fn worker_thread<P>(
        mut processor: P,
        receiver: Receiver<LogCommand>,
        config: FlushConfig,
        processor_name: &'static str,
    ) where
        P: LogProcessor + Send + 'static,
    {
        let flush_interval = Duration::from_millis(config.flush_interval_ms);
        let mut flush_deadline: Option<Instant> = None;

        loop {
            let command = match flush_deadline {
                Some(deadline) => match receiver.recv_deadline(deadline) {
                    Ok(command) => command,
                    Err(RecvTimeoutError::Timeout) => {
                        flush_deadline = None;
                        if let Err(e) = processor.flush() {
                            eprintln!("[{}] 定时刷新失败: {}", processor_name, e);
                        }
                        continue;
                    }
                    Err(RecvTimeoutError::Disconnected) => break,
                },
                None => match receiver.recv() {
                    Ok(command) => command,
                    Err(_) => break,
                },
            };

            match command {
                LogCommand::Write(record) => match processor.process(&record) {
                    Ok(WriteOutcome::Written) => {
                        if flush_deadline.is_none() {
                            flush_deadline = Some(Instant::now() + flush_interval);
                        }
                    }
                    Ok(WriteOutcome::Rotated) => flush_deadline = None,
                    Ok(WriteOutcome::Dropped) => {}
                    Err(e) => eprintln!("[{}] 写入失败: {}", processor_name, e),
                },

                LogCommand::ChangePath(dir) => {
                    flush_deadline = None;
                    if let Err(e) = processor.change_path(&dir) {
                        eprintln!("[{}] 切换日志目录失败: {}", processor_name, e);
                    }
                }

                LogCommand::Configure(change) => processor.configure(change),

                LogCommand::Compressed(outcome) => {
                    if let Err(e) = processor.handle_compressed(outcome) {
                        eprintln!("[{}] 处理压缩结果失败: {}", processor_name, e);
                    }
                }

                LogCommand::Flush(ack) => {
                    flush_deadline = None;
                    if let Err(e) = processor.flush() {
                        eprintln!("[{}] 处理器刷新失败: {}", processor_name, e);
                    }
                    if let Some(ack) = ack {
                        let _ = ack.send(());
                    }
                }

                LogCommand::Shutdown => {
                    if let Err(e) = processor.flush() {
                        eprintln!("[{}] 关闭时处理器刷新失败: {}", processor_name, e);
                    }
                    if let Err(e) = processor.cleanup() {
                        eprintln!("[{}] 处理器清理失败: {}", processor_name, e);
                    }
                    break;
                }
            }
        }
    }

    /// 发送任意命令
    pub fn send(&self, command: LogCommand) -> Result<(), String> {
        self.sender.send(command)
            .map_err(|e| format!("发送命令失败: {}", e))
    }

    /// 发送写入命令
    pub fn send_write(&self, record: LogRecord) -> Result<(), String> {
        self.send(LogCommand::Write(record))
    }

    /// 发送切换目录命令
    pub fn send_change_path(&self, dir: PathBuf) -> Result<(), String> {
        self.send(LogCommand::ChangePath(dir))
    }

    /// 发送配置变更命令
    pub fn send_configure(&self, change: ConfigChange) -> Result<(), String> {
        self.send(LogCommand::Configure(change))
    }

    /// 发送刷新命令并等待工作线程处理完此前的所有命令
    pub fn flush_and_wait(&self, timeout: Duration) -> Result<(), String> {
        let (ack, done) = bounded(1);
        self.send(LogCommand::Flush(Some(ack)))?;
        done.recv_timeout(timeout)
            .map_err(|e| format!("等待刷新完成失败: {}", e))
    }

    /// 发送停止命令
    pub fn send_shutdown(&self) -> Result<(), String> {
        self.send(LogCommand::Shutdown)
    }

    /// 获取发送者（用于订阅回调）
    pub fn sender(&self) -> &Sender<LogCommand> {
        &self.sender
    }

    /// 停止工作线程并等待其退出
    pub fn shutdown(&mut self) {
        if let Some(thread) = self.worker_thread.take() {
            let _ = self.sender.send(LogCommand::Shutdown);
            let _ = thread.join();
        }
    }
}

impl Drop for ProcessorWorker {
    fn drop(&mut self) {
        self.shutdown();
    }
}
