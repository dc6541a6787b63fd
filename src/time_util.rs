use chrono::{TimeZone, Timelike, Utc};

/// 当前UTC时间的毫秒时间戳
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

pub fn mill_time_to_datetime(timestamp_ms: i64) -> Result<String, String> {
    // 将毫秒级时间戳转换为 DateTime<Utc>
    match Utc.timestamp_millis_opt(timestamp_ms) {
        chrono::LocalResult::Single(datetime) => {
            // 格式化时间为字符串
            let formatted_datetime = datetime.format("%Y-%m-%d %H:%M:%S").to_string();
            Ok(formatted_datetime)
        }
        chrono::LocalResult::None => Err("Invalid timestamp: None".to_string()),
        chrono::LocalResult::Ambiguous(_, _) => Err("Invalid timestamp: Ambiguous".to_string()),
    }
}

/// 按UTC日历把毫秒时间戳压回当天零点，用于按日统计
pub fn start_of_day_utc(timestamp_ms: i64) -> i64 {
    match Utc.timestamp_millis_opt(timestamp_ms) {
        chrono::LocalResult::Single(datetime) => {
            let day_start = datetime
                .with_hour(0)
                .and_then(|d| d.with_minute(0))
                .and_then(|d| d.with_second(0))
                .and_then(|d| d.with_nanosecond(0));
            match day_start {
                Some(d) => d.timestamp_millis(),
                None => timestamp_ms,
            }
        }
        _ => timestamp_ms,
    }
}

/// 毫秒时间戳转成 yyyyMMdd，券商日内查询接口使用该格式
pub fn mill_time_to_yyyymmdd(timestamp_ms: i64) -> String {
    match Utc.timestamp_millis_opt(timestamp_ms) {
        chrono::LocalResult::Single(datetime) => datetime.format("%Y%m%d").to_string(),
        _ => Utc::now().format("%Y%m%d").to_string(),
    }
}

/// 券商应答里的 yyyyMMdd + HHmmss 组合转毫秒时间戳，解析失败返回None
pub fn yyyymmdd_hhmmss_to_millis(date: &str, time: &str) -> Option<i64> {
    let joined = format!("{}{}", date.trim(), time.trim());
    let naive = chrono::NaiveDateTime::parse_from_str(&joined, "%Y%m%d%H%M%S").ok()?;
    Some(naive.and_utc().timestamp_millis())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_start_of_day_utc() {
        // 2024-05-01 13:45:30 UTC
        let ts = 1714571130000_i64;
        let day = start_of_day_utc(ts);
        assert_eq!(mill_time_to_datetime(day).unwrap(), "2024-05-01 00:00:00");
    }

    #[test]
    fn test_mill_time_to_yyyymmdd() {
        let ts = 1714571130000_i64;
        assert_eq!(mill_time_to_yyyymmdd(ts), "20240501");
    }

    #[test]
    fn test_yyyymmdd_hhmmss_to_millis() {
        let ms = yyyymmdd_hhmmss_to_millis("20240501", "134530").unwrap();
        assert_eq!(mill_time_to_datetime(ms).unwrap(), "2024-05-01 13:45:30");
        assert!(yyyymmdd_hhmmss_to_millis("2024-05-01", "134530").is_none());
    }
}
