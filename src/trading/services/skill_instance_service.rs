use std::sync::Arc;

use rbatis::executor::Executor;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};
use uuid::Uuid;

use crate::app_config::db;
use crate::app_config::env::{env_u64, env_usize};
use crate::error::AppError;
use crate::time_util;
use crate::trading::broker::{OrderRequest, OrderResult, OrderStyle};
use crate::trading::market::PriceHistoryProvider;
use crate::trading::model::execution::execution_log::{
    action, ExecutionLogEntity, ExecutionLogModel,
};
use crate::trading::model::skill::skill_instance::{
    status, SkillInstanceEntity, SkillInstanceModel,
};
use crate::trading::services::credential_service::CredentialService;
use crate::trading::skill::evaluator::{self, Evaluation};
use crate::trading::skill::params::{validate_params, SkillParams};
use crate::trading::skill::registry::SkillRegistry;
use crate::trading::skill::{SkillCategory, SkillCode};

#[derive(Debug, Clone, Deserialize)]
pub struct CreateInstanceReq {
    pub owner_id: String,
    pub skill_code: String,
    pub label: Option<String>,
    pub inst_id: Option<String>,
    pub params: Value,
    pub order_qty: f64,
    pub order_style: String,
    pub priority: i32,
}

/// check的返回，detail与indicators同时写入执行流水
#[derive(Debug, Clone, Serialize)]
pub struct CheckOutcome {
    pub triggered: bool,
    pub detail: String,
    pub indicators: Value,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExecuteOutcome {
    pub success: bool,
    pub message: String,
    pub detail: String,
    pub order_result: Option<OrderResult>,
}

/// 技能实例的生命周期服务: 创建、启停、删除、条件检查与触发执行。
/// 状态迁移一律走带前置状态的CAS更新，并发的check/execute不会重复下单
pub struct SkillInstanceService {
    registry: Arc<SkillRegistry>,
    credentials: CredentialService,
}

impl SkillInstanceService {
    pub fn new(registry: Arc<SkillRegistry>) -> Result<SkillInstanceService, AppError> {
        Ok(SkillInstanceService {
            registry,
            credentials: CredentialService::from_env()?,
        })
    }

    pub fn with_credentials(
        registry: Arc<SkillRegistry>,
        credentials: CredentialService,
    ) -> SkillInstanceService {
        SkillInstanceService {
            registry,
            credentials,
        }
    }

    /// 创建实例。配额与查重和插入放在同一个事务里做
    pub async fn create(&self, req: CreateInstanceReq) -> Result<SkillInstanceEntity, AppError> {
        let def = self
            .registry
            .get(&req.skill_code)
            .ok_or_else(|| AppError::NotFound(format!("技能不存在: {}", req.skill_code)))?;
        if def.enabled == 0 {
            return Err(AppError::InvalidParams(format!(
                "技能{}已停用，不能创建新实例",
                req.skill_code
            )));
        }
        let code = SkillCode::from_code(&req.skill_code).ok_or_else(|| {
            AppError::CapabilityNotSupported(format!("技能{}没有对应的评估规则", req.skill_code))
        })?;
        if code.category() != SkillCategory::Risk {
            if req.inst_id.as_deref().map_or(true, |s| s.trim().is_empty()) {
                return Err(AppError::InvalidParams(
                    "非风控技能必须指定标的".to_string(),
                ));
            }
            if req.order_qty <= 0.0 {
                return Err(AppError::InvalidParams("下单数量必须大于0".to_string()));
            }
        }
        OrderStyle::from_str(&req.order_style)
            .ok_or_else(|| AppError::InvalidParams(format!("不支持的下单方式: {}", req.order_style)))?;
        let merged = validate_params(def, &req.params)?;

        let now = time_util::now_millis();
        let entity = SkillInstanceEntity {
            id: Uuid::new_v4().to_string(),
            owner_id: req.owner_id.clone(),
            skill_code: req.skill_code.clone(),
            label: req.label.clone(),
            inst_id: req.inst_id.clone(),
            params: merged.to_string(),
            order_qty: req.order_qty,
            order_style: req.order_style.clone(),
            priority: req.priority,
            status: status::ACTIVE.to_string(),
            last_checked_ts: None,
            triggered_ts: None,
            last_error: None,
            created_ts: now,
            updated_ts: now,
        };

        let model = SkillInstanceModel::new().await;
        let tx = db::get_db_client().acquire_begin().await?;
        let guarded = Self::create_guarded(&tx, &model, &req, &entity).await;
        match guarded {
            Ok(()) => {
                tx.commit().await.map_err(AppError::from)?;
                info!(
                    "owner:{} 创建技能实例 code:{} inst:{:?} id:{}",
                    req.owner_id, req.skill_code, req.inst_id, entity.id
                );
                Ok(entity)
            }
            Err(e) => {
                let _ = tx.rollback().await;
                Err(e)
            }
        }
    }

    async fn create_guarded(
        tx: &dyn Executor,
        model: &SkillInstanceModel,
        req: &CreateInstanceReq,
        entity: &SkillInstanceEntity,
    ) -> Result<(), AppError> {
        let quota = env_u64("MAX_SKILL_INSTANCES_PER_OWNER", 20);
        let total = model.count_by_owner(tx, &req.owner_id).await?;
        if total >= quota {
            return Err(AppError::QuotaExceeded(format!(
                "技能实例最多保存{}个",
                quota
            )));
        }
        let duplicates = model
            .count_active_same_target(tx, &req.owner_id, &req.skill_code, req.inst_id.as_deref())
            .await?;
        if duplicates > 0 {
            return Err(AppError::DuplicateInstance {
                owner_id: req.owner_id.clone(),
                skill_code: req.skill_code.clone(),
                inst_id: req.inst_id.clone().unwrap_or_else(|| "-".to_string()),
            });
        }
        model.add_in_tx(tx, entity).await?;
        Ok(())
    }

    pub async fn get(&self, id: &str) -> Result<SkillInstanceEntity, AppError> {
        let model = SkillInstanceModel::new().await;
        model
            .get_by_id(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("实例不存在: {}", id)))
    }

    pub async fn list(&self, owner_id: &str) -> Result<Vec<SkillInstanceEntity>, AppError> {
        let model = SkillInstanceModel::new().await;
        Ok(model.list_by_owner(owner_id).await?)
    }

    /// 暂停或恢复。只有active能暂停，只有paused能恢复
    pub async fn set_paused(
        &self,
        owner_id: &str,
        id: &str,
        paused: bool,
    ) -> Result<SkillInstanceEntity, AppError> {
        let model = SkillInstanceModel::new().await;
        let instance = self.owned_instance(owner_id, id).await?;
        let (from_status, to_status) = if paused {
            (status::ACTIVE, status::PAUSED)
        } else {
            (status::PAUSED, status::ACTIVE)
        };
        if instance.status != from_status {
            return Err(AppError::InvalidStatus {
                current: instance.status,
                allowed: from_status.to_string(),
            });
        }
        let mut updated = instance.clone();
        updated.status = to_status.to_string();
        updated.updated_ts = time_util::now_millis();
        if !model.guarded_update(&updated, from_status).await? {
            let fresh = self.get(id).await?;
            return Err(AppError::InvalidStatus {
                current: fresh.status,
                allowed: from_status.to_string(),
            });
        }
        let log_model = ExecutionLogModel::new().await;
        self.append_log(
            &log_model,
            &updated,
            action::STATE_CHANGE,
            if paused { "用户暂停".to_string() } else { "用户恢复".to_string() },
            None,
            None,
            None,
        )
        .await?;
        Ok(updated)
    }

    /// 删除实例。completed/error留作审计，不允许删
    pub async fn delete(&self, owner_id: &str, id: &str) -> Result<(), AppError> {
        let model = SkillInstanceModel::new().await;
        let instance = self.owned_instance(owner_id, id).await?;
        if instance.status == status::COMPLETED || instance.status == status::ERROR {
            return Err(AppError::InvalidStatus {
                current: instance.status,
                allowed: "active/paused/triggered".to_string(),
            });
        }
        model.delete_by_id(id).await?;
        info!("owner:{} 删除技能实例 id:{}", owner_id, id);
        Ok(())
    }

    /// 评估一次触发条件。无论成败都会刷新last_checked_ts并追加一条check流水
    pub async fn check(
        &self,
        provider: &dyn PriceHistoryProvider,
        id: &str,
    ) -> Result<CheckOutcome, AppError> {
        let model = SkillInstanceModel::new().await;
        let log_model = ExecutionLogModel::new().await;
        let instance = self.get(id).await?;
        if instance.status != status::ACTIVE {
            return Err(AppError::InvalidStatus {
                current: instance.status,
                allowed: status::ACTIVE.to_string(),
            });
        }

        let evaluated = self.evaluate_instance(provider, &instance).await;
        let now = time_util::now_millis();
        match evaluated {
            Ok((eval, observed)) => {
                let mut updated = instance.clone();
                updated.last_checked_ts = Some(now);
                updated.updated_ts = now;
                updated.last_error = None;
                if eval.triggered {
                    updated.status = status::TRIGGERED.to_string();
                    updated.triggered_ts = Some(now);
                    if model.guarded_update(&updated, status::ACTIVE).await? {
                        self.append_log(
                            &log_model,
                            &instance,
                            action::TRIGGER,
                            eval.rationale.clone(),
                            observed,
                            Some(&eval.indicators),
                            None,
                        )
                        .await?;
                    } else {
                        warn!("实例{}在评估期间被并发修改，触发结果不落库", instance.id);
                    }
                } else {
                    // active -> active的守卫更新，避免覆盖掉并发的暂停/删除
                    model.guarded_update(&updated, status::ACTIVE).await?;
                }
                self.append_log(
                    &log_model,
                    &instance,
                    action::CHECK,
                    eval.rationale.clone(),
                    observed,
                    Some(&eval.indicators),
                    None,
                )
                .await?;
                Ok(CheckOutcome {
                    triggered: eval.triggered,
                    detail: eval.rationale,
                    indicators: eval.indicators,
                })
            }
            Err(e) => {
                let mut updated = instance.clone();
                updated.last_checked_ts = Some(now);
                updated.updated_ts = now;
                updated.last_error = Some(e.to_string());
                model.guarded_update(&updated, status::ACTIVE).await?;
                self.append_log(
                    &log_model,
                    &instance,
                    action::CHECK,
                    format!("评估失败: {}", e),
                    None,
                    None,
                    None,
                )
                .await?;
                Err(e)
            }
        }
    }

    /// 触发后的下单流程。下单前重评一次，条件不再满足就不动状态直接返回。
    /// 券商给出明确结果后才迁移状态: 成交completed，拒单或传输失败error
    pub async fn execute(
        &self,
        provider: &dyn PriceHistoryProvider,
        id: &str,
    ) -> Result<ExecuteOutcome, AppError> {
        let model = SkillInstanceModel::new().await;
        let log_model = ExecutionLogModel::new().await;
        let instance = self.get(id).await?;
        if instance.status != status::ACTIVE && instance.status != status::TRIGGERED {
            return Err(AppError::InvalidStatus {
                current: instance.status,
                allowed: "active/triggered".to_string(),
            });
        }

        let (eval, observed) = self.evaluate_instance(provider, &instance).await?;
        if !eval.triggered {
            return Ok(ExecuteOutcome {
                success: false,
                message: "条件不再满足".to_string(),
                detail: eval.rationale,
                order_result: None,
            });
        }
        let side = match eval.side {
            Some(side) => side,
            None => {
                return Err(AppError::InvalidParams(
                    "评估已触发但没有给出下单方向".to_string(),
                ))
            }
        };
        let inst_code = instance
            .inst_id
            .clone()
            .ok_or_else(|| AppError::InvalidParams("该实例没有标的，无法下单".to_string()))?;
        let style = OrderStyle::from_str(&instance.order_style).ok_or_else(|| {
            AppError::InvalidParams(format!("下单方式字段损坏: {}", instance.order_style))
        })?;
        let price = match style {
            OrderStyle::Limit => observed,
            OrderStyle::Market => None,
        };

        // 凭证与风控问题都不改实例状态，修复后可以重试
        let creds = self
            .credentials
            .resolve_trading_creds(&instance.owner_id)
            .await?;
        let order_value = instance.order_qty * observed.unwrap_or(0.0);
        self.enforce_order_risk(&instance.owner_id, order_value).await?;

        let request = OrderRequest {
            inst_id: inst_code,
            side,
            qty: instance.order_qty,
            price,
            style,
        };
        let placed = self
            .credentials
            .gateway()
            .place_order(&creds, &request)
            .await;

        let now = time_util::now_millis();
        let mut updated = instance.clone();
        updated.updated_ts = now;
        if updated.triggered_ts.is_none() {
            updated.triggered_ts = Some(now);
        }
        match placed {
            Ok(result) if result.success => {
                updated.status = status::COMPLETED.to_string();
                updated.last_error = None;
                if !model.guarded_update(&updated, &instance.status).await? {
                    warn!("实例{}下单后状态CAS未命中", instance.id);
                }
                self.append_log(
                    &log_model,
                    &instance,
                    action::ORDER,
                    format!("下单成功: {}", result.message),
                    observed,
                    Some(&eval.indicators),
                    Some(serde_json::to_string(&result)?),
                )
                .await?;
                Ok(ExecuteOutcome {
                    success: true,
                    message: result.message.clone(),
                    detail: eval.rationale,
                    order_result: Some(result),
                })
            }
            Ok(result) => {
                updated.status = status::ERROR.to_string();
                updated.last_error = Some(result.message.clone());
                if !model.guarded_update(&updated, &instance.status).await? {
                    warn!("实例{}拒单后状态CAS未命中", instance.id);
                }
                self.append_log(
                    &log_model,
                    &instance,
                    action::ORDER,
                    format!("券商拒单: {}", result.message),
                    observed,
                    Some(&eval.indicators),
                    Some(serde_json::to_string(&result)?),
                )
                .await?;
                Ok(ExecuteOutcome {
                    success: false,
                    message: result.message.clone(),
                    detail: eval.rationale,
                    order_result: Some(result),
                })
            }
            Err(e) => {
                updated.status = status::ERROR.to_string();
                updated.last_error = Some(e.to_string());
                if !model.guarded_update(&updated, &instance.status).await? {
                    warn!("实例{}下单失败后状态CAS未命中", instance.id);
                }
                self.append_log(
                    &log_model,
                    &instance,
                    action::ORDER,
                    format!("下单失败: {}", e),
                    observed,
                    Some(&eval.indicators),
                    None,
                )
                .await?;
                Ok(ExecuteOutcome {
                    success: false,
                    message: e.to_string(),
                    detail: eval.rationale,
                    order_result: None,
                })
            }
        }
    }

    /// owner名下激活的风控实例逐条过一遍，任何一条不过直接拦截
    pub async fn enforce_order_risk(
        &self,
        owner_id: &str,
        order_value: f64,
    ) -> Result<(), AppError> {
        let model = SkillInstanceModel::new().await;
        let rows = model.list_by_owner(owner_id).await?;
        for row in rows.iter().filter(|r| r.status == status::ACTIVE) {
            let code = match SkillCode::from_code(&row.skill_code) {
                Some(c) if c.category() == SkillCategory::Risk => c,
                _ => continue,
            };
            let def = match self.registry.get(&row.skill_code) {
                Some(d) => d,
                None => {
                    warn!("风控实例{}的技能定义缺失，跳过", row.id);
                    continue;
                }
            };
            let params = SkillParams::from_instance(def, &row.params)?;
            match code {
                SkillCode::RiskOrderValueLimit => {
                    let max_value = params.f64("max_order_value").ok_or_else(|| {
                        AppError::InvalidParams("风控实例缺少max_order_value".to_string())
                    })?;
                    if order_value > max_value {
                        return Err(AppError::RiskBlocked(format!(
                            "单笔金额{:.0}超过上限{:.0}",
                            order_value, max_value
                        )));
                    }
                }
                SkillCode::RiskDailyOrderLimit => {
                    let max_orders = params.usize("max_orders_per_day").ok_or_else(|| {
                        AppError::InvalidParams("风控实例缺少max_orders_per_day".to_string())
                    })?;
                    let log_model = ExecutionLogModel::new().await;
                    let since = time_util::start_of_day_utc(time_util::now_millis());
                    let count = log_model.count_orders_since(owner_id, since).await?;
                    if count >= max_orders as u64 {
                        return Err(AppError::RiskBlocked(format!(
                            "当日下单已达{}次上限",
                            max_orders
                        )));
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }

    async fn evaluate_instance(
        &self,
        provider: &dyn PriceHistoryProvider,
        instance: &SkillInstanceEntity,
    ) -> Result<(Evaluation, Option<f64>), AppError> {
        let max_points = env_usize("HISTORY_MAX_POINTS", 120);
        let series = match &instance.inst_id {
            Some(inst) => provider.fetch_history(inst, max_points).await?,
            None => Vec::new(),
        };
        let eval = evaluator::evaluate(&self.registry, instance, &series)?;
        Ok((eval, series.first().map(|p| p.close)))
    }

    async fn owned_instance(
        &self,
        owner_id: &str,
        id: &str,
    ) -> Result<SkillInstanceEntity, AppError> {
        let instance = self.get(id).await?;
        // 他人的实例一律按不存在处理
        if instance.owner_id != owner_id {
            return Err(AppError::NotFound(format!("实例不存在: {}", id)));
        }
        Ok(instance)
    }

    #[allow(clippy::too_many_arguments)]
    async fn append_log(
        &self,
        log_model: &ExecutionLogModel,
        instance: &SkillInstanceEntity,
        action_kind: &str,
        detail: String,
        observed_price: Option<f64>,
        indicators: Option<&Value>,
        order_outcome: Option<String>,
    ) -> Result<(), AppError> {
        let mut entry = ExecutionLogEntity::base(
            &instance.id,
            &instance.owner_id,
            &instance.skill_code,
            instance.inst_id.clone(),
            action_kind,
            detail,
        );
        entry.observed_price = observed_price;
        entry.indicator_snapshot = indicators.map(|v| v.to_string());
        entry.order_outcome = order_outcome;
        log_model.append(&entry).await?;
        Ok(())
    }
}
