//! 后台备份压缩
//!
//! 每个任务把一个普通备份压缩到 `<源>.gz.<任务标记>` 临时文件。只有在目标
//! 文件完整写入并落盘之后才删除源文件；任何一步失败都会删除临时文件，
//! 源文件保持原样。最终改名由持有日志文件的工作线程完成。

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter};
use std::path::{Path, PathBuf};
use filetime::FileTime;
use threadpool::ThreadPool;

use crate::gzip::{self, GzipError};

/// 读取源文件时的缓冲区大小
const CHUNK_SIZE: usize = 512 * 1024;

/// 压缩任务错误
#[derive(Debug)]
pub enum CompressError {
    /// 无法打开源文件
    Open(PathBuf, io::Error),
    /// 无法创建目标文件
    Create(PathBuf, io::Error),
    /// 压缩或写入失败
    Codec(PathBuf, GzipError),
    /// 无法落盘或恢复时间戳
    Finalize(PathBuf, io::Error),
    /// 无法删除源文件
    RemoveSource(PathBuf, io::Error),
}

impl std::fmt::Display for CompressError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CompressError::Open(path, e) => write!(f, "无法打开 {}: {}", path.display(), e),
            CompressError::Create(path, e) => write!(f, "无法创建 {}: {}", path.display(), e),
            CompressError::Codec(path, e) => write!(f, "无法压缩 {}: {}", path.display(), e),
            CompressError::Finalize(path, e) => write!(f, "无法保存 {}: {}", path.display(), e),
            CompressError::RemoveSource(path, e) => write!(f, "无法删除源文件 {}: {}", path.display(), e),
        }
    }
}

impl std::error::Error for CompressError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CompressError::Codec(_, e) => Some(e),
            CompressError::Open(_, e)
            | CompressError::Create(_, e)
            | CompressError::Finalize(_, e)
            | CompressError::RemoveSource(_, e) => Some(e),
        }
    }
}

/// 一次压缩任务的结果
#[derive(Debug)]
pub struct CompressionOutcome {
    /// 被压缩的普通备份
    pub source: PathBuf,
    /// 任务的临时目标文件，同时也是任务的唯一标识
    pub temp: PathBuf,
    /// 成功时 `temp` 已完整写入且源备份已删除
    pub result: Result<(), CompressError>,
}

/// 把 `source` 压缩到新文件 `dest`，成功后删除 `source`
///
/// 目标文件以 create-new 方式打开，绝不覆盖已有文件。访问时间和修改时间
/// 会被复制到目标文件；创建时间和元数据变更时间在 Unix 上无法设置，忽略。
pub fn compress_backup(source: &Path, dest: &Path, level: u32) -> Result<(), CompressError> {
    let input = File::open(source).map_err(|e| CompressError::Open(source.to_path_buf(), e))?;
    let metadata = input
        .metadata()
        .map_err(|e| CompressError::Open(source.to_path_buf(), e))?;
    let atime = FileTime::from_last_access_time(&metadata);
    let mtime = FileTime::from_last_modification_time(&metadata);

    let output = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(dest)
        .map_err(|e| CompressError::Create(dest.to_path_buf(), e))?;

    let written = write_compressed(input, &output, dest, level)
        .and_then(|()| {
            output
                .sync_all()
                .map_err(|e| CompressError::Finalize(dest.to_path_buf(), e))
        });
    drop(output);

    let finished = written.and_then(|()| {
        filetime::set_file_times(dest, atime, mtime)
            .map_err(|e| CompressError::Finalize(dest.to_path_buf(), e))?;
        fs::remove_file(source).map_err(|e| CompressError::RemoveSource(source.to_path_buf(), e))
    });

    if finished.is_err() {
        let _ = fs::remove_file(dest);
    }
    finished
}

fn write_compressed(input: File, output: &File, dest: &Path, level: u32) -> Result<(), CompressError> {
    let mut reader = BufReader::with_capacity(CHUNK_SIZE, input);
    let writer = BufWriter::with_capacity(CHUNK_SIZE, output);
    gzip::compress_stream(&mut reader, writer, level)
        .map(|_| ())
        .map_err(|e| CompressError::Codec(dest.to_path_buf(), e))
}

/// 压缩工作池
pub struct CompressionWorker {
    pool: ThreadPool,
    level: u32,
}

impl CompressionWorker {
    /// 创建压缩工作池
    pub fn new(threads: usize, level: u32) -> Self {
        Self {
            pool: threadpool::Builder::new()
                .num_threads(threads.max(1))
                .thread_name("rat_filelog-compress".to_string())
                .build(),
            level,
        }
    }

    /// 提交一个压缩任务，不阻塞调用方
    ///
    /// `temp` 必须是本次任务独占的路径。`on_done` 在工作线程上调用，
    /// 只应把结果转交给日志文件的持有者。
    pub fn submit<F>(&self, source: PathBuf, temp: PathBuf, on_done: F)
    where
        F: FnOnce(CompressionOutcome) + Send + 'static,
    {
        let level = self.level;
        self.pool.execute(move || {
            let result = compress_backup(&source, &temp, level);
            on_done(CompressionOutcome { source, temp, result });
        });
    }
}
