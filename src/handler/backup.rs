//! 备份文件命名与过期清理
//!
//! 备份文件名为 `<日志文件名>.bak[N][.gz]`。编号 N 在两种形式之间共享：
//! 只要 `.bakN` 或 `.bakN.gz` 任一存在，这个编号就算被占用。
//! 压缩过程中的临时文件名为 `<源备份>.gz.<任务标记>`。

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::config::AgeType;
use crate::policy::is_obsolete;

const BAK: &str = ".bak";
const GZ: &str = ".gz";
/// 4 位 36 进制序号的取值范围
const SEQUENCE_SPAN: u64 = 36 * 36 * 36 * 36;

/// 目录中的一个备份文件
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupEntry {
    pub path: PathBuf,
    pub modified: SystemTime,
}

/// 一个尚未改名的压缩临时文件及其对应的源备份
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingTemp {
    pub temp: PathBuf,
    pub source: PathBuf,
}

fn with_suffix(base: &Path, suffix: &str) -> PathBuf {
    let mut path = base.as_os_str().to_owned();
    path.push(suffix);
    PathBuf::from(path)
}

fn path_taken(path: &Path) -> bool {
    fs::symlink_metadata(path).is_ok()
}

/// 指定编号的备份路径，编号 0 表示不带数字的 `.bak`
pub fn backup_path(base: &Path, slot: u32, compressed: bool) -> PathBuf {
    let mut suffix = String::from(BAK);
    if slot > 0 {
        suffix.push_str(&slot.to_string());
    }
    if compressed {
        suffix.push_str(GZ);
    }
    with_suffix(base, &suffix)
}

/// 下一个可用的备份文件名
///
/// 从 `.bak` 开始，编号被占用时依次尝试 `.bak1`、`.bak2`……
/// 返回的路径在调用时一定不存在，但不会预留，调用方需要立即改名。
pub fn next_backup_name(base: &Path, compressed: bool) -> PathBuf {
    next_backup_name_reserved(base, compressed, |_| false)
}

/// 同 [`next_backup_name`]，但 `reserved` 对普通形式路径返回 true 的编号也视为被占用
///
/// 压缩任务在结果被处理之前就会删除源备份，持有者用它为这些编号保留位置。
pub fn next_backup_name_reserved<F>(base: &Path, compressed: bool, reserved: F) -> PathBuf
where
    F: Fn(&Path) -> bool,
{
    let mut slot = 0u32;
    loop {
        let plain = backup_path(base, slot, false);
        let gz = backup_path(base, slot, true);
        if !path_taken(&plain) && !path_taken(&gz) && !reserved(&plain) {
            return if compressed { gz } else { plain };
        }
        slot += 1;
    }
}

/// 解析备份文件名，返回 (编号, 是否压缩)
pub fn parse_backup_name(file_name: &str, base_name: &str) -> Option<(u32, bool)> {
    let rest = file_name.strip_prefix(base_name)?.strip_prefix(BAK)?;
    let (digits, compressed) = match rest.strip_suffix(GZ) {
        Some(digits) => (digits, true),
        None => (rest, false),
    };

    if digits.is_empty() {
        return Some((0, compressed));
    }
    if !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok().map(|slot| (slot, compressed))
}

fn split_base(base: &Path) -> Option<(&Path, &str)> {
    let dir = base.parent()?;
    let name = base.file_name()?.to_str()?;
    let dir = if dir.as_os_str().is_empty() { Path::new(".") } else { dir };
    Some((dir, name))
}

/// 列出指定形式（普通或压缩）的备份，按修改时间从旧到新排序
pub fn list_backups(base: &Path, compressed: bool) -> io::Result<Vec<BackupEntry>> {
    let Some((dir, base_name)) = split_base(base) else {
        return Ok(Vec::new());
    };

    let mut entries = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let file_name = entry.file_name();
        let Some(file_name) = file_name.to_str() else { continue };
        match parse_backup_name(file_name, base_name) {
            Some((_, is_gz)) if is_gz == compressed => {}
            _ => continue,
        }

        let metadata = entry.metadata()?;
        if !metadata.is_file() {
            continue;
        }
        entries.push(BackupEntry {
            path: entry.path(),
            modified: metadata.modified()?,
        });
    }

    entries.sort_by(|a, b| a.modified.cmp(&b.modified).then_with(|| a.path.cmp(&b.path)));
    Ok(entries)
}

/// 删除过期备份，返回被删除的路径
///
/// 从最旧的备份开始检查，遇到第一个未过期的备份即停止。这里假设
/// 修改时间越早的文件越旧；如果外部程序改动过目录中的文件，这个假设
/// 可能不成立，后面的过期文件会留到下一次清理。删除失败的文件会被跳过。
pub fn evict_obsolete(base: &Path, compressed: bool, unit: AgeType, amount: u32) -> Vec<PathBuf> {
    let entries = match list_backups(base, compressed) {
        Ok(entries) => entries,
        Err(e) => {
            eprintln!("[backup] 列出备份文件失败 {}: {}", base.display(), e);
            return Vec::new();
        }
    };

    sweep(entries, unit, amount, |path| fs::remove_file(path))
}

/// 按顺序删除过期条目，删除失败时跳过并继续
fn sweep<F>(entries: Vec<BackupEntry>, unit: AgeType, amount: u32, mut remove: F) -> Vec<PathBuf>
where
    F: FnMut(&Path) -> io::Result<()>,
{
    let mut removed = Vec::new();
    for entry in entries {
        if !is_obsolete(entry.modified, unit, amount) {
            break;
        }
        match remove(&entry.path) {
            Ok(()) => removed.push(entry.path),
            Err(e) => eprintln!("[backup] 删除过期备份失败 {}: {}", entry.path.display(), e),
        }
    }
    removed
}

/// 改名，目标已存在时失败而不是覆盖
pub fn rename_no_clobber(from: &Path, to: &Path) -> io::Result<()> {
    if path_taken(to) {
        return Err(io::Error::new(
            io::ErrorKind::AlreadyExists,
            format!("目标文件已存在: {}", to.display()),
        ));
    }
    fs::rename(from, to)
}

fn to_base36(mut value: u64) -> String {
    const DIGITS: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    if value == 0 {
        return "0".to_string();
    }
    let mut out = Vec::new();
    while value > 0 {
        out.push(DIGITS[(value % 36) as usize]);
        value /= 36;
    }
    out.reverse();
    String::from_utf8_lossy(&out).into_owned()
}

/// 压缩任务的临时目标路径：`<源>.gz.<纳秒时间戳的 36 进制><4 位序号>`
///
/// 同一进程内每次调用得到的路径都不同。
pub fn compress_temp_path(source: &Path) -> PathBuf {
    static SEQUENCE: AtomicU64 = AtomicU64::new(0);

    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or_default();
    let seq = SEQUENCE.fetch_add(1, Ordering::Relaxed) % SEQUENCE_SPAN;
    with_suffix(source, &format!("{}.{}{:0>4}", GZ, to_base36(nanos), to_base36(seq)))
}

/// 列出遗留的压缩临时文件（上次进程在压缩完成后、改名前退出）
pub fn pending_temps(base: &Path) -> io::Result<Vec<PendingTemp>> {
    let Some((dir, base_name)) = split_base(base) else {
        return Ok(Vec::new());
    };

    let marker = format!("{}.", GZ);
    let mut temps = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let file_name = entry.file_name();
        let Some(file_name) = file_name.to_str() else { continue };
        let Some(pos) = file_name.rfind(&marker) else { continue };

        let (source_name, token) = (&file_name[..pos], &file_name[pos + marker.len()..]);
        if token.is_empty() || !token.bytes().all(|b| b.is_ascii_alphanumeric()) {
            continue;
        }
        if !matches!(parse_backup_name(source_name, base_name), Some((_, false))) {
            continue;
        }
        temps.push(PendingTemp {
            temp: entry.path(),
            source: dir.join(source_name),
        });
    }
    temps.sort_by(|a, b| a.temp.cmp(&b.temp));
    Ok(temps)
}
