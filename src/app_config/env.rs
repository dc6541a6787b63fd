use std::env;

/// 读取布尔型环境变量：支持 true/false/1/0（大小写不敏感）
pub fn env_is_true(key: &str, default: bool) -> bool {
    match env::var(key) {
        Ok(v) => {
            let v = v.trim();
            v.eq_ignore_ascii_case("true") || v == "1"
        }
        Err(_) => default,
    }
}

/// 读取字符串环境变量，若不存在则返回默认值
pub fn env_or_default(key: &str, default: &str) -> String {
    match env::var(key) {
        Ok(v) => v,
        Err(_) => default.to_string(),
    }
}

/// 读取usize型环境变量，缺失或解析失败时返回默认值
pub fn env_usize(key: &str, default: usize) -> usize {
    match env::var(key) {
        Ok(v) => v.trim().parse::<usize>().unwrap_or(default),
        Err(_) => default,
    }
}

/// 读取u64型环境变量，缺失或解析失败时返回默认值
pub fn env_u64(key: &str, default: u64) -> u64 {
    match env::var(key) {
        Ok(v) => v.trim().parse::<u64>().unwrap_or(default),
        Err(_) => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_is_true() {
        std::env::set_var("ENV_FLAG_FOR_TEST", "1");
        assert!(env_is_true("ENV_FLAG_FOR_TEST", false));
        std::env::set_var("ENV_FLAG_FOR_TEST", "False");
        assert!(!env_is_true("ENV_FLAG_FOR_TEST", true));
        assert!(env_is_true("ENV_FLAG_NOT_SET_FOR_TEST", true));
    }

    #[test]
    fn test_env_usize() {
        std::env::set_var("ENV_USIZE_FOR_TEST", "42");
        assert_eq!(env_usize("ENV_USIZE_FOR_TEST", 7), 42);
        std::env::set_var("ENV_USIZE_FOR_TEST", "not-a-number");
        assert_eq!(env_usize("ENV_USIZE_FOR_TEST", 7), 7);
    }
}
