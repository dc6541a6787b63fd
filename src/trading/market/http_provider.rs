use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tokio_retry::strategy::{jitter, ExponentialBackoff};
use tokio_retry::RetryIf;
use tracing::{debug, warn};

use crate::app_config::env::{env_or_default, env_usize};
use crate::error::AppError;
use crate::trading::market::{PriceHistoryProvider, PricePoint};

/// 行情网关的统一应答壳，code非0表示业务失败
#[derive(Deserialize)]
struct ApiResponse<T> {
    code: i32,
    #[serde(default)]
    message: String,
    data: Option<T>,
}

/// 行情网关返回的K线行，字段缺失的行直接丢弃
#[derive(Deserialize)]
struct HistoryRow {
    ts: Option<i64>,
    close: Option<f64>,
    volume: Option<f64>,
}

#[derive(Deserialize)]
struct QuoteRow {
    code: Option<String>,
    price: Option<f64>,
}

/// 行情网关HTTP客户端。只有限流和5xx会按退避重试，
/// 业务失败(code非0)原样抛出。
pub struct HttpMarketProvider {
    client: Client,
    base_url: String,
    retry_attempts: usize,
}

impl HttpMarketProvider {
    pub fn from_env() -> Self {
        HttpMarketProvider {
            client: Client::new(),
            base_url: env_or_default("MARKET_API_BASE", "https://quote.finpick.kr"),
            retry_attempts: env_usize("HTTP_RETRY_ATTEMPTS", 3),
        }
    }

    /// 200/400/800ms退避并带抖动
    fn backoff(&self) -> impl Iterator<Item = Duration> {
        ExponentialBackoff::from_millis(2)
            .factor(100)
            .max_delay(Duration::from_secs(2))
            .map(jitter)
            .take(self.retry_attempts)
    }

    async fn get_json<T: DeserializeOwned>(&self, path_and_query: &str) -> Result<T, AppError> {
        let url = format!("{}{}", self.base_url, path_and_query);
        RetryIf::spawn(
            self.backoff(),
            || self.try_get::<T>(&url),
            |e: &AppError| e.is_retryable(),
        )
        .await
    }

    async fn try_get<T: DeserializeOwned>(&self, url: &str) -> Result<T, AppError> {
        let response = self.client.get(url).send().await?;
        let status = response.status();
        let body = response.text().await?;
        debug!("market response: url={}, status={}", url, status);

        match status {
            StatusCode::OK => {}
            StatusCode::TOO_MANY_REQUESTS => {
                return Err(AppError::RateLimited(format!("行情接口限流: {}", url)));
            }
            StatusCode::NOT_FOUND => {
                return Err(AppError::NotFound(format!("行情不存在: {}", url)));
            }
            s if s.is_server_error() => {
                return Err(AppError::Upstream(format!("行情接口5xx: {}", s)));
            }
            s => {
                return Err(AppError::Market(format!("行情接口异常应答: {}", s)));
            }
        }

        let envelope: ApiResponse<T> = serde_json::from_str(&body)?;
        if envelope.code != 0 {
            return Err(AppError::Market(format!(
                "行情业务失败: code={}, msg={}",
                envelope.code, envelope.message
            )));
        }
        envelope
            .data
            .ok_or_else(|| AppError::Market("行情应答缺少data字段".to_string()))
    }
}

#[async_trait]
impl PriceHistoryProvider for HttpMarketProvider {
    async fn fetch_history(
        &self,
        inst_id: &str,
        max_points: usize,
    ) -> Result<Vec<PricePoint>, AppError> {
        let rows: Vec<HistoryRow> = self
            .get_json(&format!(
                "/api/v1/history?code={}&count={}",
                inst_id, max_points
            ))
            .await?;

        let total = rows.len();
        let mut series: Vec<PricePoint> = rows
            .into_iter()
            .filter_map(|row| match (row.ts, row.close) {
                (Some(ts), Some(close)) => Some(PricePoint {
                    ts,
                    close,
                    volume: row.volume.unwrap_or(0.0),
                }),
                _ => None,
            })
            .collect();
        if series.len() < total {
            warn!(
                "行情数据存在脏行: inst_id={}, 丢弃={}",
                inst_id,
                total - series.len()
            );
        }
        // 上游顺序不可信，统一整理成最新在前
        series.sort_by(|a, b| b.ts.cmp(&a.ts));
        series.truncate(max_points);
        Ok(series)
    }

    async fn fetch_latest(&self, inst_ids: &[String]) -> Result<HashMap<String, f64>, AppError> {
        if inst_ids.is_empty() {
            return Ok(HashMap::new());
        }
        let rows: Vec<QuoteRow> = self
            .get_json(&format!("/api/v1/quotes?codes={}", inst_ids.join(",")))
            .await?;

        let mut quotes = HashMap::new();
        for row in rows {
            if let (Some(code), Some(price)) = (row.code, row.price) {
                quotes.insert(code, price);
            }
        }
        Ok(quotes)
    }
}
