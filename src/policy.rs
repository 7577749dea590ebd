//! 过期判定策略

use std::time::SystemTime;
use chrono::{DateTime, Days, Local, Months, NaiveDateTime, Offset, TimeDelta, TimeZone, Utc};

use crate::config::AgeType;

/// 判断修改时间为 `modified` 的文件在当前时刻是否已经过期
pub fn is_obsolete(modified: SystemTime, unit: AgeType, amount: u32) -> bool {
    is_obsolete_at(modified, unit, amount, Local::now())
}

/// 以给定的当前时间判断是否过期，日历计算使用 `now` 所在的时区
///
/// 按本地日历计算 `modified + amount`：月份溢出时取目标月的最后一天
/// （1月31日 + 1个月 = 2月最后一天），一年按 12 个月计。结果落在
/// 夏令时跳变的空隙里时向后顺延，落在重复的一小时里时取较早的时刻。
/// 结果 `<= now` 即为过期；只有计算溢出时视为未过期。
pub fn is_obsolete_at<Tz: TimeZone>(modified: SystemTime, unit: AgeType, amount: u32, now: DateTime<Tz>) -> bool {
    let tz = now.timezone();
    let modified = DateTime::<Utc>::from(modified).with_timezone(&tz).naive_local();
    let expires = match unit {
        AgeType::Days => modified.checked_add_days(Days::new(u64::from(amount))),
        AgeType::Months => modified.checked_add_months(Months::new(amount)),
        AgeType::Years => amount
            .checked_mul(12)
            .and_then(|months| modified.checked_add_months(Months::new(months))),
    };

    match expires.and_then(|expires| resolve_local(&tz, expires)) {
        Some(expires) => expires <= now,
        None => false,
    }
}

fn resolve_local<Tz: TimeZone>(tz: &Tz, local: NaiveDateTime) -> Option<DateTime<Tz>> {
    if let Some(resolved) = tz.from_local_datetime(&local).earliest() {
        return Some(resolved);
    }
    // 跳变空隙：按跳变前的偏移换算，得到空隙之后的时刻
    let before = tz
        .offset_from_utc_datetime(&local.checked_sub_signed(TimeDelta::days(1))?)
        .fix();
    let utc = local.checked_sub_signed(TimeDelta::seconds(i64::from(before.local_minus_utc())))?;
    Some(tz.from_utc_datetime(&utc))
}
