use std::time::Duration;

use async_trait::async_trait;
use hmac::{Hmac, Mac};
use reqwest::{Client, Method, StatusCode};
use serde::Deserialize;
use sha2::Sha256;
use tokio_retry::strategy::{jitter, ExponentialBackoff};
use tokio_retry::RetryIf;
use tracing::{debug, info, warn};

use crate::app_config::env::env_or_default;
use crate::error::AppError;
use crate::time_util;
use crate::trading::broker::{
    Balance, Broker, BrokerApi, OrderHistoryItem, OrderRequest, OrderResult, PlainCreds,
};

/// 沙盒统一应答壳，code=0才是业务成功
#[derive(Deserialize)]
struct SandboxResp<T> {
    code: i32,
    #[serde(default)]
    message: String,
    data: Option<T>,
}

#[derive(Deserialize)]
struct SandboxOrderData {
    #[serde(default)]
    order_ref: String,
}

#[derive(Deserialize)]
struct SandboxBalanceData {
    currency: String,
    cash: f64,
    total_value: f64,
}

/// 自营纸面交易沙盒。没有实盘通道，凭证全部按模拟盘处理。
/// 鉴权是逐请求HMAC签名，不存在token，也就不用进token缓存
pub struct SandboxClient {
    client: Client,
    base_url: String,
    retry_attempts: usize,
}

impl SandboxClient {
    pub fn from_env(retry_attempts: usize) -> SandboxClient {
        SandboxClient {
            client: Client::new(),
            base_url: env_or_default("SANDBOX_API_BASE", "https://sandbox-api.papertrade.kr"),
            retry_attempts,
        }
    }

    fn backoff(&self) -> impl Iterator<Item = Duration> {
        ExponentialBackoff::from_millis(2)
            .factor(100)
            .map(jitter)
            .take(self.retry_attempts)
    }

    /// 签名串 = 时间戳 + 方法 + 带query的路径 + 原始body，HMAC-SHA256后转hex。
    /// HMAC对任意长度key都合法，new_from_slice不会失败
    fn sign(secret: &str, timestamp: &str, method: &str, path: &str, body: &str) -> String {
        let payload = format!("{}{}{}{}", timestamp, method, path, body);
        let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(payload.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    fn classify_status(status: StatusCode, body: &str) -> AppError {
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            AppError::CredentialInvalid(format!("沙盒鉴权失败({}): {}", status.as_u16(), body))
        } else if status == StatusCode::TOO_MANY_REQUESTS {
            AppError::RateLimited(format!("沙盒限流: {}", body))
        } else if status.is_server_error() {
            AppError::Upstream(format!("沙盒服务异常({}): {}", status.as_u16(), body))
        } else {
            AppError::BrokerRejected(format!("沙盒拒绝请求({}): {}", status.as_u16(), body))
        }
    }

    /// path带query串，签名和URL用同一份，避免两边对不上
    async fn send_signed(
        &self,
        creds: &PlainCreds,
        method: Method,
        path: &str,
        body: Option<&serde_json::Value>,
    ) -> Result<String, AppError> {
        let timestamp = time_util::now_millis().to_string();
        let body_str = match body {
            Some(value) => value.to_string(),
            None => String::new(),
        };
        let signature = Self::sign(
            &creds.app_secret,
            &timestamp,
            method.as_str(),
            path,
            &body_str,
        );
        let url = format!("{}{}", self.base_url, path);
        let mut request_builder = self
            .client
            .request(method, &url)
            .header("Content-Type", "application/json")
            .header("X-API-KEY", &creds.app_key)
            .header("X-TIMESTAMP", &timestamp)
            .header("X-SIGNATURE", signature)
            .header("X-ACCOUNT-ID", &creds.account_id);
        if !body_str.is_empty() {
            request_builder = request_builder.body(body_str);
        }
        let response = request_builder.send().await?;
        let status = response.status();
        let text = response.text().await?;
        debug!("path:{},sandbox_response: {}", path, text);
        if status != StatusCode::OK {
            return Err(Self::classify_status(status, &text));
        }
        Ok(text)
    }

    fn parse_envelope<T: for<'a> Deserialize<'a>>(text: &str) -> Result<SandboxResp<T>, AppError> {
        serde_json::from_str(text).map_err(|e| AppError::Upstream(format!("沙盒应答解析失败: {}", e)))
    }

    async fn get_balance_once(&self, creds: &PlainCreds) -> Result<Balance, AppError> {
        let text = self
            .send_signed(creds, Method::GET, "/v1/balance", None)
            .await?;
        let resp: SandboxResp<SandboxBalanceData> = Self::parse_envelope(&text)?;
        if resp.code != 0 {
            return Err(AppError::BrokerRejected(resp.message));
        }
        let data = resp
            .data
            .ok_or_else(|| AppError::Upstream("余额应答缺少data".to_string()))?;
        Ok(Balance {
            currency: data.currency,
            cash: data.cash,
            total_value: data.total_value,
        })
    }

    async fn get_history_once(
        &self,
        creds: &PlainCreds,
        start_ts: i64,
        end_ts: i64,
    ) -> Result<Vec<OrderHistoryItem>, AppError> {
        let path = format!("/v1/orders?start_ts={}&end_ts={}", start_ts, end_ts);
        let text = self.send_signed(creds, Method::GET, &path, None).await?;
        let resp: SandboxResp<Vec<OrderHistoryItem>> = Self::parse_envelope(&text)?;
        if resp.code != 0 {
            return Err(AppError::BrokerRejected(resp.message));
        }
        Ok(resp.data.unwrap_or_default())
    }

    async fn place_order_once(
        &self,
        creds: &PlainCreds,
        request: &OrderRequest,
    ) -> Result<OrderResult, AppError> {
        let body = serde_json::to_value(request)?;
        let text = self
            .send_signed(creds, Method::POST, "/v1/orders", Some(&body))
            .await?;
        let resp: SandboxResp<SandboxOrderData> = Self::parse_envelope(&text)?;
        if resp.code == 0 {
            let order_ref = resp.data.map(|d| d.order_ref).filter(|r| !r.is_empty());
            info!(
                "沙盒下单成功 inst_id:{} side:{} order_ref:{:?}",
                request.inst_id, request.side, order_ref
            );
            Ok(OrderResult {
                success: true,
                order_ref,
                message: resp.message,
            })
        } else {
            warn!(
                "沙盒拒单 inst_id:{} side:{} msg:{}",
                request.inst_id, request.side, resp.message
            );
            Ok(OrderResult {
                success: false,
                order_ref: None,
                message: resp.message,
            })
        }
    }
}

#[async_trait]
impl BrokerApi for SandboxClient {
    fn broker(&self) -> Broker {
        Broker::Sandbox
    }

    fn supports_live(&self) -> bool {
        false
    }

    async fn validate_credentials(&self, creds: &PlainCreds) -> Result<(), AppError> {
        if !creds.simulated {
            return Err(AppError::CapabilityNotSupported(
                "沙盒券商只支持模拟盘".to_string(),
            ));
        }
        let text = self
            .send_signed(creds, Method::GET, "/v1/ping", None)
            .await?;
        let resp: SandboxResp<serde_json::Value> = Self::parse_envelope(&text)?;
        if resp.code != 0 {
            return Err(AppError::CredentialInvalid(format!(
                "沙盒凭证校验失败: {}",
                resp.message
            )));
        }
        Ok(())
    }

    /// 和KIS一样，下单只对429限流重试，其余失败只发一次
    async fn place_order(
        &self,
        creds: &PlainCreds,
        request: &OrderRequest,
    ) -> Result<OrderResult, AppError> {
        if !creds.simulated {
            return Err(AppError::CapabilityNotSupported(
                "沙盒券商只支持模拟盘".to_string(),
            ));
        }
        RetryIf::spawn(
            self.backoff(),
            || self.place_order_once(creds, request),
            |e: &AppError| matches!(e, AppError::RateLimited(_)),
        )
        .await
    }

    async fn get_balance(&self, creds: &PlainCreds) -> Result<Balance, AppError> {
        RetryIf::spawn(
            self.backoff(),
            || self.get_balance_once(creds),
            |e: &AppError| e.is_retryable(),
        )
        .await
    }

    async fn get_order_history(
        &self,
        creds: &PlainCreds,
        start_ts: i64,
        end_ts: i64,
    ) -> Result<Vec<OrderHistoryItem>, AppError> {
        RetryIf::spawn(
            self.backoff(),
            || self.get_history_once(creds, start_ts, end_ts),
            |e: &AppError| e.is_retryable(),
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sign_known_vector() {
        // HMAC-SHA256("key", "The quick brown fox jumps over the lazy dog")
        let signature = SandboxClient::sign(
            "key",
            "The quick brown fox ",
            "jumps",
            " over ",
            "the lazy dog",
        );
        assert_eq!(
            signature,
            "f7bc83f430538424b13298e6aa6fb143ef4d59a14946175997479dbc2d1a3cd8"
        );
    }

    #[test]
    fn test_sign_changes_with_payload() {
        let a = SandboxClient::sign("secret", "1714571130000", "POST", "/v1/orders", "{}");
        let b = SandboxClient::sign("secret", "1714571130000", "POST", "/v1/orders", "{\"q\":1}");
        let c = SandboxClient::sign("secret2", "1714571130000", "POST", "/v1/orders", "{}");
        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|ch| ch.is_ascii_hexdigit()));
        assert_ne!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_classify_status() {
        let err = SandboxClient::classify_status(StatusCode::FORBIDDEN, "bad key");
        assert!(matches!(err, AppError::CredentialInvalid(_)));
        let err = SandboxClient::classify_status(StatusCode::SERVICE_UNAVAILABLE, "down");
        assert!(err.is_retryable());
    }
}
