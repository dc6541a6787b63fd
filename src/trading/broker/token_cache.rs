use std::collections::HashMap;

use once_cell::sync::Lazy;
use tokio::sync::Mutex;

use crate::time_util;
use crate::trading::broker::Broker;

/// token提前这么久视为过期，避免边界上拿到将失效的token
const EXPIRY_MARGIN_MS: i64 = 60_000;

#[derive(Debug, Clone)]
pub struct CachedToken {
    pub access_token: String,
    pub expires_at_ms: i64,
}

/// 进程内access token缓存，key是broker+owner。
/// 凭证更新或登出时必须同步失效，避免旧token继续被用
static TOKEN_CACHE: Lazy<Mutex<HashMap<String, CachedToken>>> =
    Lazy::new(|| Mutex::new(HashMap::new()));

fn cache_key(owner_id: &str, broker: Broker) -> String {
    format!("{}:{}", broker, owner_id)
}

pub async fn get_valid(owner_id: &str, broker: Broker) -> Option<CachedToken> {
    let cache = TOKEN_CACHE.lock().await;
    let token = cache.get(&cache_key(owner_id, broker))?;
    if token.expires_at_ms - EXPIRY_MARGIN_MS <= time_util::now_millis() {
        return None;
    }
    Some(token.clone())
}

pub async fn put(owner_id: &str, broker: Broker, token: CachedToken) {
    let mut cache = TOKEN_CACHE.lock().await;
    cache.insert(cache_key(owner_id, broker), token);
}

/// 凭证变更时失效单个broker的token
pub async fn invalidate(owner_id: &str, broker: Broker) {
    let mut cache = TOKEN_CACHE.lock().await;
    cache.remove(&cache_key(owner_id, broker));
}

/// 登出时失效owner名下全部token
pub async fn invalidate_owner(owner_id: &str) {
    let mut cache = TOKEN_CACHE.lock().await;
    let suffix = format!(":{}", owner_id);
    cache.retain(|key, _| !key.ends_with(&suffix));
}
