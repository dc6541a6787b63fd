use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::json;
use tokio_retry::strategy::{jitter, ExponentialBackoff};
use tokio_retry::RetryIf;
use tracing::{debug, info, warn};

use crate::app_config::env::env_or_default;
use crate::error::AppError;
use crate::time_util;
use crate::trading::broker::token_cache::{self, CachedToken};
use crate::trading::broker::{
    Balance, Broker, BrokerApi, OrderHistoryItem, OrderRequest, OrderResult, OrderStyle,
    PlainCreds, Side,
};

/// 现金委托的tr_id，实盘T开头，模拟盘V开头
const TR_ORDER_BUY_REAL: &str = "TTTC0802U";
const TR_ORDER_SELL_REAL: &str = "TTTC0801U";
const TR_ORDER_BUY_MOCK: &str = "VTTC0802U";
const TR_ORDER_SELL_MOCK: &str = "VTTC0801U";
const TR_BALANCE_REAL: &str = "TTTC8434R";
const TR_BALANCE_MOCK: &str = "VTTC8434R";
const TR_DAILY_ORDERS_REAL: &str = "TTTC8001R";
const TR_DAILY_ORDERS_MOCK: &str = "VTTC8001R";

#[derive(Deserialize)]
struct KisTokenResp {
    access_token: String,
    expires_in: i64,
}

#[derive(Deserialize)]
struct KisOrderResp {
    rt_cd: String,
    #[serde(default)]
    msg1: String,
    output: Option<KisOrderOutput>,
}

/// order-cash的output字段是大写key
#[derive(Deserialize)]
struct KisOrderOutput {
    #[serde(rename = "ODNO", default)]
    odno: String,
}

#[derive(Deserialize)]
struct KisBalanceResp {
    rt_cd: String,
    #[serde(default)]
    msg1: String,
    #[serde(default)]
    output2: Vec<KisBalanceRow>,
}

#[derive(Deserialize)]
struct KisBalanceRow {
    #[serde(default)]
    dnca_tot_amt: String,
    #[serde(default)]
    tot_evlu_amt: String,
}

#[derive(Deserialize)]
struct KisHistoryResp {
    rt_cd: String,
    #[serde(default)]
    msg1: String,
    #[serde(default)]
    output1: Vec<KisHistoryRow>,
}

#[derive(Deserialize)]
struct KisHistoryRow {
    #[serde(default)]
    odno: String,
    #[serde(default)]
    pdno: String,
    /// 01卖出 02买入
    #[serde(default)]
    sll_buy_dvsn_cd: String,
    #[serde(default)]
    ord_qty: String,
    #[serde(default)]
    ord_unpr: String,
    #[serde(default)]
    tot_ccld_qty: String,
    #[serde(default)]
    ord_dt: String,
    #[serde(default)]
    ord_tmd: String,
}

/// 韩投证券OpenAPI客户端。实盘与模拟盘域名不同，按凭证的simulated切换
pub struct KisClient {
    client: Client,
    real_base: String,
    mock_base: String,
    retry_attempts: usize,
}

impl KisClient {
    pub fn from_env(retry_attempts: usize) -> KisClient {
        KisClient {
            client: Client::new(),
            real_base: env_or_default("KIS_API_BASE", "https://openapi.koreainvestment.com:9443"),
            mock_base: env_or_default(
                "KIS_MOCK_API_BASE",
                "https://openapivts.koreainvestment.com:29443",
            ),
            retry_attempts,
        }
    }

    fn base_for(&self, creds: &PlainCreds) -> &str {
        if creds.simulated {
            &self.mock_base
        } else {
            &self.real_base
        }
    }

    fn backoff(&self) -> impl Iterator<Item = Duration> {
        // 200ms起步指数退避，带抖动
        ExponentialBackoff::from_millis(2)
            .factor(100)
            .map(jitter)
            .take(self.retry_attempts)
    }

    /// 账号格式形如12345678-01，横杠前是综合账号CANO，后是商品代码
    fn split_account(account_id: &str) -> Result<(String, String), AppError> {
        match account_id.split_once('-') {
            Some((cano, prdt)) if !cano.is_empty() && !prdt.is_empty() => {
                Ok((cano.to_string(), prdt.to_string()))
            }
            _ => Err(AppError::CredentialInvalid(format!(
                "账号格式应为CANO-商品代码: {}",
                account_id
            ))),
        }
    }

    fn order_tr_id(simulated: bool, side: Side) -> &'static str {
        match (simulated, side) {
            (false, Side::Buy) => TR_ORDER_BUY_REAL,
            (false, Side::Sell) => TR_ORDER_SELL_REAL,
            (true, Side::Buy) => TR_ORDER_BUY_MOCK,
            (true, Side::Sell) => TR_ORDER_SELL_MOCK,
        }
    }

    fn classify_status(status: StatusCode, body: &str) -> AppError {
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            AppError::CredentialInvalid(format!("券商鉴权失败({}): {}", status.as_u16(), body))
        } else if status == StatusCode::TOO_MANY_REQUESTS {
            AppError::RateLimited(format!("券商限流: {}", body))
        } else if status.is_server_error() {
            AppError::Upstream(format!("券商服务异常({}): {}", status.as_u16(), body))
        } else {
            AppError::BrokerRejected(format!("券商拒绝请求({}): {}", status.as_u16(), body))
        }
    }

    /// 直接用凭证换一次token，不读缓存。注册前校验也走这里
    async fn fetch_token(&self, creds: &PlainCreds) -> Result<CachedToken, AppError> {
        let url = format!("{}/oauth2/tokenP", self.base_for(creds));
        let body = json!({
            "grant_type": "client_credentials",
            "appkey": creds.app_key,
            "appsecret": creds.app_secret,
        });
        let response = self
            .client
            .post(&url)
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await?;
        let status = response.status();
        let text = response.text().await?;
        if status != StatusCode::OK {
            // 换token失败基本都是appkey或secret不对
            if status == StatusCode::TOO_MANY_REQUESTS {
                return Err(AppError::RateLimited(format!("token接口限流: {}", text)));
            }
            if status.is_server_error() {
                return Err(AppError::Upstream(format!(
                    "token接口异常({}): {}",
                    status.as_u16(),
                    text
                )));
            }
            return Err(AppError::CredentialInvalid(format!("换取token失败: {}", text)));
        }
        let parsed: KisTokenResp = serde_json::from_str(&text)
            .map_err(|e| AppError::Upstream(format!("token应答解析失败: {}", e)))?;
        Ok(CachedToken {
            access_token: parsed.access_token,
            expires_at_ms: time_util::now_millis() + parsed.expires_in * 1000,
        })
    }

    async fn access_token(&self, creds: &PlainCreds) -> Result<String, AppError> {
        if let Some(cached) = token_cache::get_valid(&creds.owner_id, Broker::Kis).await {
            return Ok(cached.access_token);
        }
        let token = RetryIf::spawn(
            self.backoff(),
            || self.fetch_token(creds),
            |e: &AppError| e.is_retryable(),
        )
        .await?;
        let access_token = token.access_token.clone();
        token_cache::put(&creds.owner_id, Broker::Kis, token).await;
        debug!("owner:{} 刷新KIS access token", creds.owner_id);
        Ok(access_token)
    }

    async fn get_with_tr<T: for<'a> Deserialize<'a>>(
        &self,
        creds: &PlainCreds,
        path: &str,
        tr_id: &str,
        query: &[(&str, &str)],
    ) -> Result<T, AppError> {
        let token = self.access_token(creds).await?;
        let url = format!("{}{}", self.base_for(creds), path);
        let response = self
            .client
            .get(&url)
            .header("Content-Type", "application/json; charset=utf-8")
            .header("authorization", format!("Bearer {}", token))
            .header("appkey", &creds.app_key)
            .header("appsecret", &creds.app_secret)
            .header("tr_id", tr_id)
            .header("custtype", "P")
            .query(query)
            .send()
            .await?;
        let status = response.status();
        let text = response.text().await?;
        debug!("path:{},kis_response: {}", path, text);
        if status == StatusCode::UNAUTHORIZED {
            // token被对端提前作废，清掉缓存让下次重新换
            token_cache::invalidate(&creds.owner_id, Broker::Kis).await;
        }
        if status != StatusCode::OK {
            return Err(Self::classify_status(status, &text));
        }
        serde_json::from_str(&text)
            .map_err(|e| AppError::Upstream(format!("券商应答解析失败: {}", e)))
    }

    async fn get_balance_once(&self, creds: &PlainCreds) -> Result<Balance, AppError> {
        let (cano, prdt) = Self::split_account(&creds.account_id)?;
        let tr_id = if creds.simulated {
            TR_BALANCE_MOCK
        } else {
            TR_BALANCE_REAL
        };
        let query = [
            ("CANO", cano.as_str()),
            ("ACNT_PRDT_CD", prdt.as_str()),
            ("AFHR_FLPR_YN", "N"),
            ("OFL_YN", ""),
            ("INQR_DVSN", "02"),
            ("UNPR_DVSN", "01"),
            ("FUND_STTL_ICLD_YN", "N"),
            ("FNCG_AMT_AUTO_RDPT_YN", "N"),
            ("PRCS_DVSN", "00"),
            ("CTX_AREA_FK100", ""),
            ("CTX_AREA_NK100", ""),
        ];
        let resp: KisBalanceResp = self
            .get_with_tr(creds, "/uapi/domestic-stock/v1/trading/inquire-balance", tr_id, &query)
            .await?;
        if resp.rt_cd != "0" {
            return Err(AppError::BrokerRejected(resp.msg1));
        }
        let row = resp
            .output2
            .first()
            .ok_or_else(|| AppError::Upstream("余额应答缺少output2".to_string()))?;
        Ok(Balance {
            currency: "KRW".to_string(),
            cash: parse_amount(&row.dnca_tot_amt),
            total_value: parse_amount(&row.tot_evlu_amt),
        })
    }

    async fn place_order_once(
        &self,
        creds: &PlainCreds,
        request: &OrderRequest,
    ) -> Result<OrderResult, AppError> {
        let (cano, prdt) = Self::split_account(&creds.account_id)?;
        let token = self.access_token(creds).await?;
        let tr_id = Self::order_tr_id(creds.simulated, request.side);
        let ord_dvsn = match request.style {
            OrderStyle::Market => "01",
            OrderStyle::Limit => "00",
        };
        let ord_unpr = match (request.style, request.price) {
            (OrderStyle::Limit, Some(price)) => format!("{}", price.round() as i64),
            _ => "0".to_string(),
        };
        let body = json!({
            "CANO": cano,
            "ACNT_PRDT_CD": prdt,
            "PDNO": request.inst_id,
            "ORD_DVSN": ord_dvsn,
            "ORD_QTY": format!("{}", request.qty.round() as i64),
            "ORD_UNPR": ord_unpr,
        });
        let url = format!(
            "{}/uapi/domestic-stock/v1/trading/order-cash",
            self.base_for(creds)
        );
        let response = self
            .client
            .post(&url)
            .header("Content-Type", "application/json; charset=utf-8")
            .header("authorization", format!("Bearer {}", token))
            .header("appkey", &creds.app_key)
            .header("appsecret", &creds.app_secret)
            .header("tr_id", tr_id)
            .header("custtype", "P")
            .json(&body)
            .send()
            .await?;
        let status = response.status();
        let text = response.text().await?;
        debug!("path:order-cash,kis_response: {}", text);
        if status == StatusCode::UNAUTHORIZED {
            token_cache::invalidate(&creds.owner_id, Broker::Kis).await;
        }
        if status != StatusCode::OK {
            return Err(Self::classify_status(status, &text));
        }
        let parsed: KisOrderResp = serde_json::from_str(&text)
            .map_err(|e| AppError::Upstream(format!("下单应答解析失败: {}", e)))?;
        if parsed.rt_cd == "0" {
            let order_ref = parsed.output.map(|o| o.odno).filter(|o| !o.is_empty());
            info!(
                "KIS下单成功 inst_id:{} side:{} odno:{:?}",
                request.inst_id, request.side, order_ref
            );
            Ok(OrderResult {
                success: true,
                order_ref,
                message: parsed.msg1,
            })
        } else {
            // 业务拒单原话带回，由上层决定怎么落库
            warn!(
                "KIS拒单 inst_id:{} side:{} msg:{}",
                request.inst_id, request.side, parsed.msg1
            );
            Ok(OrderResult {
                success: false,
                order_ref: None,
                message: parsed.msg1,
            })
        }
    }

    async fn get_history_once(
        &self,
        creds: &PlainCreds,
        start_ts: i64,
        end_ts: i64,
    ) -> Result<Vec<OrderHistoryItem>, AppError> {
        let (cano, prdt) = Self::split_account(&creds.account_id)?;
        let tr_id = if creds.simulated {
            TR_DAILY_ORDERS_MOCK
        } else {
            TR_DAILY_ORDERS_REAL
        };
        let start_dt = time_util::mill_time_to_yyyymmdd(start_ts);
        let end_dt = time_util::mill_time_to_yyyymmdd(end_ts);
        let query = [
            ("CANO", cano.as_str()),
            ("ACNT_PRDT_CD", prdt.as_str()),
            ("INQR_STRT_DT", start_dt.as_str()),
            ("INQR_END_DT", end_dt.as_str()),
            ("SLL_BUY_DVSN_CD", "00"),
            ("INQR_DVSN", "00"),
            ("PDNO", ""),
            ("CCLD_DVSN", "00"),
            ("ORD_GNO_BRNO", ""),
            ("ODNO", ""),
            ("INQR_DVSN_3", "00"),
            ("INQR_DVSN_1", ""),
            ("CTX_AREA_FK100", ""),
            ("CTX_AREA_NK100", ""),
        ];
        let resp: KisHistoryResp = self
            .get_with_tr(
                creds,
                "/uapi/domestic-stock/v1/trading/inquire-daily-ccld",
                tr_id,
                &query,
            )
            .await?;
        if resp.rt_cd != "0" {
            return Err(AppError::BrokerRejected(resp.msg1));
        }
        let items = resp
            .output1
            .iter()
            .map(|row| {
                let side = match row.sll_buy_dvsn_cd.as_str() {
                    "01" => "sell",
                    "02" => "buy",
                    other => other,
                };
                let filled = !row.tot_ccld_qty.is_empty()
                    && row.tot_ccld_qty != "0"
                    && row.tot_ccld_qty == row.ord_qty;
                OrderHistoryItem {
                    order_ref: row.odno.clone(),
                    inst_id: row.pdno.clone(),
                    side: side.to_string(),
                    qty: parse_amount(&row.ord_qty),
                    price: parse_amount(&row.ord_unpr),
                    status: if filled { "filled" } else { "open" }.to_string(),
                    ts: time_util::yyyymmdd_hhmmss_to_millis(&row.ord_dt, &row.ord_tmd)
                        .unwrap_or(0),
                }
            })
            .collect();
        Ok(items)
    }
}

/// 券商把金额都给成字符串，脏数据当0处理
fn parse_amount(value: &str) -> f64 {
    value.trim().parse::<f64>().unwrap_or_else(|_| {
        if !value.trim().is_empty() {
            warn!("金额字段无法解析: {}", value);
        }
        0.0
    })
}

#[async_trait]
impl BrokerApi for KisClient {
    fn broker(&self) -> Broker {
        Broker::Kis
    }

    fn supports_live(&self) -> bool {
        true
    }

    async fn validate_credentials(&self, creds: &PlainCreds) -> Result<(), AppError> {
        Self::split_account(&creds.account_id)?;
        // 能换出token就认为凭证有效，不写缓存
        self.fetch_token(creds).await?;
        Ok(())
    }

    /// 下单只对429限流重试，被限流的请求没有进交易系统。
    /// 超时和5xx不重试，那种失败下重发可能把同一笔委托下两遍
    async fn place_order(
        &self,
        creds: &PlainCreds,
        request: &OrderRequest,
    ) -> Result<OrderResult, AppError> {
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
    fn test_split_account() {
        let (cano, prdt) = KisClient::split_account("12345678-01").unwrap();
        assert_eq!(cano, "12345678");
        assert_eq!(prdt, "01");
        assert!(KisClient::split_account("12345678").is_err());
        assert!(KisClient::split_account("-01").is_err());
    }

    #[test]
    fn test_order_tr_id() {
        assert_eq!(KisClient::order_tr_id(false, Side::Buy), "TTTC0802U");
        assert_eq!(KisClient::order_tr_id(false, Side::Sell), "TTTC0801U");
        assert_eq!(KisClient::order_tr_id(true, Side::Buy), "VTTC0802U");
        assert_eq!(KisClient::order_tr_id(true, Side::Sell), "VTTC0801U");
    }

    #[test]
    fn test_parse_amount() {
        assert_eq!(parse_amount("1234567"), 1234567.0);
        assert_eq!(parse_amount(" 150000.5 "), 150000.5);
        assert_eq!(parse_amount(""), 0.0);
        assert_eq!(parse_amount("n/a"), 0.0);
    }

    #[test]
    fn test_classify_status() {
        let err = KisClient::classify_status(StatusCode::UNAUTHORIZED, "x");
        assert!(matches!(err, AppError::CredentialInvalid(_)));
        let err = KisClient::classify_status(StatusCode::TOO_MANY_REQUESTS, "x");
        assert!(err.is_retryable());
        let err = KisClient::classify_status(StatusCode::BAD_GATEWAY, "x");
        assert!(err.is_retryable());
        let err = KisClient::classify_status(StatusCode::BAD_REQUEST, "x");
        assert!(matches!(err, AppError::BrokerRejected(_)));
    }
}
