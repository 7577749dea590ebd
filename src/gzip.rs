//! gzip 压缩原语

use std::io::{self, Read, Write};
use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;

/// 流式压缩时每次读取的块大小
const CHUNK_SIZE: usize = 128 * 1024;

/// gzip 错误
#[derive(Debug)]
pub enum GzipError {
    /// 压缩等级不在 0-9 之间
    InvalidLevel(u32),
    /// 输入为空
    EmptyInput,
    /// 读写或编解码失败
    Io(io::Error),
}

impl std::fmt::Display for GzipError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GzipError::InvalidLevel(level) => write!(f, "无效的压缩等级: {} (应为 0-9)", level),
            GzipError::EmptyInput => f.write_str("输入数据为空"),
            GzipError::Io(e) => write!(f, "gzip 读写失败: {}", e),
        }
    }
}

impl std::error::Error for GzipError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            GzipError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for GzipError {
    fn from(e: io::Error) -> Self {
        GzipError::Io(e)
    }
}

fn check_level(level: u32) -> Result<Compression, GzipError> {
    if level > 9 {
        return Err(GzipError::InvalidLevel(level));
    }
    Ok(Compression::new(level))
}

/// 将 `source` 的全部内容压缩写入 `dest`，返回读取的原始字节数
pub fn compress_stream<R, W>(source: &mut R, dest: W, level: u32) -> Result<u64, GzipError>
where
    R: Read + ?Sized,
    W: Write,
{
    let compression = check_level(level)?;
    let mut encoder = GzEncoder::new(dest, compression);
    let mut buffer = vec![0u8; CHUNK_SIZE];
    let mut total = 0u64;

    loop {
        let read = match source.read(&mut buffer) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        };
        encoder.write_all(&buffer[..read])?;
        total += read as u64;
    }

    encoder.finish()?.flush()?;
    Ok(total)
}

/// 压缩一段内存数据
pub fn compress_bytes(data: &[u8], level: u32) -> Result<Vec<u8>, GzipError> {
    if data.is_empty() {
        return Err(GzipError::EmptyInput);
    }

    let mut output = Vec::with_capacity(data.len() / 2);
    let mut source = data;
    compress_stream(&mut source, &mut output, level)?;
    Ok(output)
}

/// 解压一段 gzip 数据
pub fn decompress_bytes(data: &[u8]) -> Result<Vec<u8>, GzipError> {
    if data.is_empty() {
        return Err(GzipError::EmptyInput);
    }

    let mut output = Vec::with_capacity(data.len() * 3);
    GzDecoder::new(data).read_to_end(&mut output)?;
    Ok(output)
}
