use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::app_config::env::{env_u64, env_usize};
use crate::error::AppError;
use crate::time_util;
use crate::trading::broker::{OrderRequest, OrderStyle, Side};
use crate::trading::model::execution::execution_log::{action, ExecutionLogEntity, ExecutionLogModel};
use crate::trading::model::execution::stop_watch::{mode, status, StopWatchEntity, StopWatchModel};
use crate::trading::services::credential_service::CredentialService;

pub const STOP_WATCH_SKILL_CODE: &str = "stop_watch";

#[derive(Debug, Clone, Deserialize)]
pub struct CreateStopWatchReq {
    pub owner_id: String,
    pub inst_id: String,
    pub entry_price: f64,
    pub quantity: f64,
    pub stop_percent: f64,
    pub mode: String,
}

/// 一次喂价后的水位结果。highest和stop只会上移，fixed模式stop保持不变
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StopDecision {
    pub highest_observed_price: f64,
    pub current_stop_price: f64,
    pub triggered: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct WatchCheckResult {
    pub triggered: bool,
    pub detail: String,
}

/// 纯函数的水位推进: 先抬高最高价，trailing再按新高重算止损价，最后判触发。
/// 喂价 <= 止损价即触发，边界价也卖
pub fn apply_price(watch: &StopWatchEntity, price: f64) -> StopDecision {
    let highest = watch.highest_observed_price.max(price);
    let stop = if watch.mode == mode::TRAILING && price > watch.highest_observed_price {
        highest * (1.0 - watch.stop_percent / 100.0)
    } else {
        watch.current_stop_price
    };
    StopDecision {
        highest_observed_price: highest,
        current_stop_price: stop,
        triggered: price <= stop,
    }
}

/// 持仓止损监控单: 创建、取消、按最新价推进并在跌破时市价清仓
pub struct StopWatchService {
    credentials: CredentialService,
}

impl StopWatchService {
    pub fn from_env() -> Result<StopWatchService, AppError> {
        Ok(StopWatchService {
            credentials: CredentialService::from_env()?,
        })
    }

    pub fn with_credentials(credentials: CredentialService) -> StopWatchService {
        StopWatchService { credentials }
    }

    pub async fn create(&self, req: CreateStopWatchReq) -> Result<StopWatchEntity, AppError> {
        if req.inst_id.trim().is_empty() {
            return Err(AppError::InvalidParams("必须指定标的".to_string()));
        }
        if req.entry_price <= 0.0 {
            return Err(AppError::InvalidParams("买入价必须大于0".to_string()));
        }
        if req.quantity <= 0.0 {
            return Err(AppError::InvalidParams("持仓数量必须大于0".to_string()));
        }
        if req.stop_percent <= 0.0 || req.stop_percent >= 100.0 {
            return Err(AppError::InvalidParams(
                "止损比例必须在0到100之间".to_string(),
            ));
        }
        if req.mode != mode::FIXED && req.mode != mode::TRAILING {
            return Err(AppError::InvalidParams(format!(
                "不支持的止损模式: {}",
                req.mode
            )));
        }

        let model = StopWatchModel::new().await;
        let quota = env_u64("MAX_STOP_WATCHES_PER_OWNER", 20);
        let active = model.count_active_by_owner(&req.owner_id).await?;
        if active >= quota {
            return Err(AppError::QuotaExceeded(format!(
                "止损监控最多同时开{}个",
                quota
            )));
        }

        let now = time_util::now_millis();
        let watch = StopWatchEntity {
            id: Uuid::new_v4().to_string(),
            owner_id: req.owner_id.clone(),
            inst_id: req.inst_id.clone(),
            entry_price: req.entry_price,
            quantity: req.quantity,
            stop_percent: req.stop_percent,
            mode: req.mode.clone(),
            current_stop_price: req.entry_price * (1.0 - req.stop_percent / 100.0),
            highest_observed_price: req.entry_price,
            status: status::ACTIVE.to_string(),
            fail_count: 0,
            last_error: None,
            created_ts: now,
            updated_ts: now,
        };
        model.add(&watch).await?;
        info!(
            "owner:{} 创建止损监控 inst:{} mode:{} stop:{:.2} id:{}",
            req.owner_id, req.inst_id, req.mode, watch.current_stop_price, watch.id
        );
        Ok(watch)
    }

    pub async fn list(&self, owner_id: &str) -> Result<Vec<StopWatchEntity>, AppError> {
        let model = StopWatchModel::new().await;
        Ok(model.list_by_owner(owner_id).await?)
    }

    pub async fn cancel(&self, owner_id: &str, id: &str) -> Result<StopWatchEntity, AppError> {
        let model = StopWatchModel::new().await;
        let watch = self.owned_watch(owner_id, id).await?;
        let mut updated = watch.clone();
        updated.status = status::CANCELLED.to_string();
        updated.updated_ts = time_util::now_millis();
        if !model.guarded_update(&updated, status::ACTIVE).await? {
            let fresh = model
                .get_by_id(id)
                .await?
                .ok_or_else(|| AppError::NotFound(format!("监控单不存在: {}", id)))?;
            return Err(AppError::InvalidStatus {
                current: fresh.status,
                allowed: status::ACTIVE.to_string(),
            });
        }
        info!("owner:{} 取消止损监控 id:{}", owner_id, id);
        Ok(updated)
    }

    /// 用最新价推进一个监控单。触发时先CAS占住triggered再下卖单，
    /// 卖出失败回退active并累计fail_count，到上限转error不再自动卖
    pub async fn process_watch(
        &self,
        watch: &StopWatchEntity,
        price: f64,
    ) -> Result<WatchCheckResult, AppError> {
        let model = StopWatchModel::new().await;
        let decision = apply_price(watch, price);
        let now = time_util::now_millis();

        if !decision.triggered {
            let mut updated = watch.clone();
            updated.highest_observed_price = decision.highest_observed_price;
            updated.current_stop_price = decision.current_stop_price;
            updated.updated_ts = now;
            if !model.guarded_update(&updated, status::ACTIVE).await? {
                return Ok(WatchCheckResult {
                    triggered: false,
                    detail: "已被并发处理，跳过".to_string(),
                });
            }
            return Ok(WatchCheckResult {
                triggered: false,
                detail: format!(
                    "最新价{:.2}高于止损价{:.2}",
                    price, decision.current_stop_price
                ),
            });
        }

        // 先占状态再下单，另一个sweep拿不到这个triggered
        let mut claimed = watch.clone();
        claimed.highest_observed_price = decision.highest_observed_price;
        claimed.current_stop_price = decision.current_stop_price;
        claimed.status = status::TRIGGERED.to_string();
        claimed.updated_ts = now;
        if !model.guarded_update(&claimed, status::ACTIVE).await? {
            return Ok(WatchCheckResult {
                triggered: false,
                detail: "已被并发处理，跳过".to_string(),
            });
        }

        let detail = format!(
            "最新价{:.2}跌破止损价{:.2}，市价卖出{}股",
            price, decision.current_stop_price, watch.quantity
        );
        let sell = self.try_sell(&claimed).await;
        let log_model = ExecutionLogModel::new().await;
        match sell {
            Ok(message) => {
                self.append_order_log(
                    &log_model,
                    &claimed,
                    price,
                    format!("{}: {}", detail, message),
                )
                .await?;
                Ok(WatchCheckResult {
                    triggered: true,
                    detail,
                })
            }
            Err(e) => {
                let attempts = claimed.fail_count + 1;
                let limit = env_usize("STOP_WATCH_MAX_SELL_ATTEMPTS", 3);
                let mut reverted = claimed.clone();
                reverted.fail_count = attempts;
                reverted.last_error = Some(e.to_string());
                reverted.updated_ts = time_util::now_millis();
                // 上限为0表示不设限，一直回退重试
                if limit > 0 && attempts as usize >= limit {
                    reverted.status = status::ERROR.to_string();
                    warn!("监控单{}连续{}次卖出失败，转error", watch.id, attempts);
                } else {
                    reverted.status = status::ACTIVE.to_string();
                }
                if !model.guarded_update(&reverted, status::TRIGGERED).await? {
                    warn!("监控单{}卖出失败后状态CAS未命中", watch.id);
                }
                self.append_order_log(
                    &log_model,
                    &claimed,
                    price,
                    format!("止损卖出失败(第{}次): {}", attempts, e),
                )
                .await?;
                Ok(WatchCheckResult {
                    triggered: true,
                    detail: format!("{}，但下单失败: {}", detail, e),
                })
            }
        }
    }

    async fn try_sell(&self, watch: &StopWatchEntity) -> Result<String, AppError> {
        let creds = self
            .credentials
            .resolve_trading_creds(&watch.owner_id)
            .await?;
        let request = OrderRequest {
            inst_id: watch.inst_id.clone(),
            side: Side::Sell,
            qty: watch.quantity,
            price: None,
            style: OrderStyle::Market,
        };
        let result = self
            .credentials
            .gateway()
            .place_order(&creds, &request)
            .await?;
        if !result.success {
            return Err(AppError::BrokerRejected(result.message));
        }
        Ok(result.message)
    }

    async fn owned_watch(&self, owner_id: &str, id: &str) -> Result<StopWatchEntity, AppError> {
        let model = StopWatchModel::new().await;
        let watch = model
            .get_by_id(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("监控单不存在: {}", id)))?;
        // 他人的监控单一律按不存在处理
        if watch.owner_id != owner_id {
            return Err(AppError::NotFound(format!("监控单不存在: {}", id)));
        }
        Ok(watch)
    }

    async fn append_order_log(
        &self,
        log_model: &ExecutionLogModel,
        watch: &StopWatchEntity,
        price: f64,
        detail: String,
    ) -> Result<(), AppError> {
        let mut entry = ExecutionLogEntity::base(
            &watch.id,
            &watch.owner_id,
            STOP_WATCH_SKILL_CODE,
            Some(watch.inst_id.clone()),
            action::ORDER,
            detail,
        );
        entry.observed_price = Some(price);
        log_model.append(&entry).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn watch(mode_str: &str, entry: f64, pct: f64) -> StopWatchEntity {
        StopWatchEntity {
            id: "w1".to_string(),
            owner_id: "u1".to_string(),
            inst_id: "005930".to_string(),
            entry_price: entry,
            quantity: 10.0,
            stop_percent: pct,
            mode: mode_str.to_string(),
            current_stop_price: entry * (1.0 - pct / 100.0),
            highest_observed_price: entry,
            status: status::ACTIVE.to_string(),
            fail_count: 0,
            last_error: None,
            created_ts: 0,
            updated_ts: 0,
        }
    }

    #[test]
    fn test_fixed_stop_never_moves() {
        let mut w = watch(mode::FIXED, 100.0, 5.0);
        for price in [101.0, 120.0, 150.0, 96.0] {
            let d = apply_price(&w, price);
            assert_eq!(d.current_stop_price, 95.0);
            assert!(!d.triggered);
            w.highest_observed_price = d.highest_observed_price;
            w.current_stop_price = d.current_stop_price;
        }
        let d = apply_price(&w, 95.0);
        assert!(d.triggered);
    }

    #[test]
    fn test_trailing_stop_follows_new_high() {
        let mut w = watch(mode::TRAILING, 100.0, 5.0);
        let d = apply_price(&w, 120.0);
        assert_eq!(d.highest_observed_price, 120.0);
        assert_eq!(d.current_stop_price, 114.0);
        assert!(!d.triggered);
        w.highest_observed_price = d.highest_observed_price;
        w.current_stop_price = d.current_stop_price;

        // 回落但没破新止损价，水位不动
        let d = apply_price(&w, 118.0);
        assert_eq!(d.highest_observed_price, 120.0);
        assert_eq!(d.current_stop_price, 114.0);
        assert!(!d.triggered);

        let d = apply_price(&w, 114.0);
        assert!(d.triggered);
    }

    #[test]
    fn test_trailing_levels_never_decrease() {
        let mut w = watch(mode::TRAILING, 100.0, 5.0);
        let mut prev_high = w.highest_observed_price;
        let mut prev_stop = w.current_stop_price;
        for price in [103.0, 99.0, 110.0, 104.8, 130.0, 124.0] {
            let d = apply_price(&w, price);
            assert!(d.highest_observed_price >= prev_high);
            assert!(d.current_stop_price >= prev_stop);
            prev_high = d.highest_observed_price;
            prev_stop = d.current_stop_price;
            w.highest_observed_price = d.highest_observed_price;
            w.current_stop_price = d.current_stop_price;
        }
    }

    #[test]
    fn test_boundary_price_triggers() {
        let w = watch(mode::FIXED, 100.0, 5.0);
        assert!(apply_price(&w, 95.0).triggered);
        assert!(apply_price(&w, 94.9).triggered);
        assert!(!apply_price(&w, 95.01).triggered);
    }

    #[test]
    fn test_fixed_stop_sequence() {
        // 买入价10000、5%止损 -> 止损价9500。前两个价不触发，9400触发
        let mut w = watch(mode::FIXED, 10_000.0, 5.0);
        assert_eq!(w.current_stop_price, 9_500.0);
        for price in [10_200.0, 9_600.0] {
            let d = apply_price(&w, price);
            assert!(!d.triggered);
            w.highest_observed_price = d.highest_observed_price;
            w.current_stop_price = d.current_stop_price;
        }
        let d = apply_price(&w, 9_400.0);
        assert!(d.triggered);
        assert_eq!(d.current_stop_price, 9_500.0);
    }
}
