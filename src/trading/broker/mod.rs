use std::fmt::{Display, Formatter};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::app_config::env::env_usize;
use crate::error::AppError;

pub mod kis;
pub mod sandbox;
pub mod secret;
pub mod token_cache;

/// 下单方向
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Buy,
    Sell,
}

impl Display for Side {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Side::Buy => write!(f, "buy"),
            Side::Sell => write!(f, "sell"),
        }
    }
}

/// 委托方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStyle {
    /// 市价单
    Market,
    /// 限价单，价格取触发时的观察价
    Limit,
}

impl OrderStyle {
    pub fn from_str(value: &str) -> Option<OrderStyle> {
        match value {
            "market" => Some(OrderStyle::Market),
            "limit" => Some(OrderStyle::Limit),
            _ => None,
        }
    }
}

impl Display for OrderStyle {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            OrderStyle::Market => write!(f, "market"),
            OrderStyle::Limit => write!(f, "limit"),
        }
    }
}

/// 已接入的券商后端
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Broker {
    /// 韩投证券OpenAPI，实盘与模拟盘双通道
    Kis,
    /// 自营纸面交易沙盒，只有模拟盘
    Sandbox,
}

impl Broker {
    pub fn as_str(&self) -> &'static str {
        match self {
            Broker::Kis => "kis",
            Broker::Sandbox => "sandbox",
        }
    }

    pub fn from_str(value: &str) -> Option<Broker> {
        match value {
            "kis" => Some(Broker::Kis),
            "sandbox" => Some(Broker::Sandbox),
            _ => None,
        }
    }
}

impl Display for Broker {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// 解密后的券商凭证，只在内存中短暂存在，禁止落日志
#[derive(Clone)]
pub struct PlainCreds {
    pub owner_id: String,
    pub broker: Broker,
    pub app_key: String,
    pub app_secret: String,
    pub account_id: String,
    pub simulated: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct OrderRequest {
    pub inst_id: String,
    pub side: Side,
    pub qty: f64,
    /// 限价单的委托价，市价单为None
    pub price: Option<f64>,
    pub style: OrderStyle,
}

/// 券商对一笔委托的最终答复。券商明确拒单不算传输错误，
/// success=false并把券商原话带回来
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderResult {
    pub success: bool,
    pub order_ref: Option<String>,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Balance {
    pub currency: String,
    pub cash: f64,
    pub total_value: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderHistoryItem {
    pub order_ref: String,
    pub inst_id: String,
    pub side: String,
    pub qty: f64,
    pub price: f64,
    pub status: String,
    pub ts: i64,
}

/// 单个券商后端要实现的能力面
#[async_trait]
pub trait BrokerApi: Send + Sync {
    fn broker(&self) -> Broker;

    /// 是否支持实盘。false的后端收到实盘请求必须拒绝
    fn supports_live(&self) -> bool;

    /// 用一次轻量鉴权调用验证凭证有效性，注册凭证前必须通过
    async fn validate_credentials(&self, creds: &PlainCreds) -> Result<(), AppError>;

    async fn place_order(
        &self,
        creds: &PlainCreds,
        request: &OrderRequest,
    ) -> Result<OrderResult, AppError>;

    async fn get_balance(&self, creds: &PlainCreds) -> Result<Balance, AppError>;

    async fn get_order_history(
        &self,
        creds: &PlainCreds,
        start_ts: i64,
        end_ts: i64,
    ) -> Result<Vec<OrderHistoryItem>, AppError>;
}

/// 统一出入口：按凭证上的broker字段分发到具体后端。
/// 模拟盘校验在分发前做一次，后端内部还会再守一道。
pub struct BrokerGateway {
    kis: kis::KisClient,
    sandbox: sandbox::SandboxClient,
}

impl BrokerGateway {
    pub fn from_env() -> BrokerGateway {
        let retry_attempts = env_usize("HTTP_RETRY_ATTEMPTS", 3);
        BrokerGateway {
            kis: kis::KisClient::from_env(retry_attempts),
            sandbox: sandbox::SandboxClient::from_env(retry_attempts),
        }
    }

    pub fn backend(&self, broker: Broker) -> &dyn BrokerApi {
        match broker {
            Broker::Kis => &self.kis,
            Broker::Sandbox => &self.sandbox,
        }
    }

    fn check_capability(&self, creds: &PlainCreds) -> Result<(), AppError> {
        let backend = self.backend(creds.broker);
        if !creds.simulated && !backend.supports_live() {
            return Err(AppError::CapabilityNotSupported(format!(
                "券商{}只支持模拟盘",
                creds.broker
            )));
        }
        Ok(())
    }

    pub async fn validate_credentials(&self, creds: &PlainCreds) -> Result<(), AppError> {
        self.check_capability(creds)?;
        self.backend(creds.broker).validate_credentials(creds).await
    }

    pub async fn place_order(
        &self,
        creds: &PlainCreds,
        request: &OrderRequest,
    ) -> Result<OrderResult, AppError> {
        self.check_capability(creds)?;
        self.backend(creds.broker).place_order(creds, request).await
    }

    pub async fn get_balance(&self, creds: &PlainCreds) -> Result<Balance, AppError> {
        self.check_capability(creds)?;
        self.backend(creds.broker).get_balance(creds).await
    }

    pub async fn get_order_history(
        &self,
        creds: &PlainCreds,
        start_ts: i64,
        end_ts: i64,
    ) -> Result<Vec<OrderHistoryItem>, AppError> {
        self.check_capability(creds)?;
        self.backend(creds.broker)
            .get_order_history(creds, start_ts, end_ts)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_side_wire_format() {
        assert_eq!(Side::Buy.to_string(), "buy");
        assert_eq!(Side::Sell.to_string(), "sell");
        assert_eq!(serde_json::to_string(&Side::Sell).unwrap(), "\"sell\"");
    }

    #[test]
    fn test_order_style_parse() {
        assert_eq!(OrderStyle::from_str("market"), Some(OrderStyle::Market));
        assert_eq!(OrderStyle::from_str("limit"), Some(OrderStyle::Limit));
        assert_eq!(OrderStyle::from_str("iceberg"), None);
    }

    #[test]
    fn test_broker_parse() {
        assert_eq!(Broker::from_str("kis"), Some(Broker::Kis));
        assert_eq!(Broker::from_str("sandbox"), Some(Broker::Sandbox));
        assert_eq!(Broker::from_str("okx"), None);
    }

    #[tokio::test]
    async fn test_gateway_rejects_live_on_sandbox() {
        let gateway = BrokerGateway::from_env();
        let creds = PlainCreds {
            owner_id: "owner-1".to_string(),
            broker: Broker::Sandbox,
            app_key: "k".to_string(),
            app_secret: "s".to_string(),
            account_id: "acc".to_string(),
            simulated: false,
        };
        let err = gateway.validate_credentials(&creds).await.unwrap_err();
        assert!(matches!(err, AppError::CapabilityNotSupported(_)));
    }
}
