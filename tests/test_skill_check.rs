use std::collections::HashMap;
use std::env;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use dotenv::dotenv;
use serde_json::json;
use uuid::Uuid;

use skill_engine::app_config::db::{init_db, init_schema};
use skill_engine::app_config::log::setup_logging;
use skill_engine::trading::market::{PriceHistoryProvider, PricePoint};
use skill_engine::trading::model::execution::execution_log::ExecutionLogModel;
use skill_engine::trading::model::skill::skill_instance::SkillInstanceModel;
use skill_engine::trading::services::skill_instance_service::{
    CreateInstanceReq, SkillInstanceService,
};
use skill_engine::trading::skill::definition::seed_skill_definitions;
use skill_engine::trading::skill::registry::SkillRegistry;
use skill_engine::AppError;

static SETUP: tokio::sync::OnceCell<()> = tokio::sync::OnceCell::const_new();

async fn setup() -> Result<Arc<SkillRegistry>> {
    SETUP
        .get_or_try_init(|| async {
            dotenv().ok();
            env::set_var(
                "DATABASE_URL",
                format!("sqlite://target/skill_check_{}.db", Uuid::new_v4().simple()),
            );
            env::set_var("CREDENTIAL_SECRET_KEY", "unit-test-secret");
            setup_logging().await?;
            init_db().await;
            init_schema().await?;
            seed_skill_definitions().await?;
            Ok::<(), anyhow::Error>(())
        })
        .await?;
    Ok(Arc::new(SkillRegistry::load().await?))
}

/// 固定返回一段倒序日K的行情桩
struct FixedProvider {
    closes: Vec<f64>,
}

#[async_trait]
impl PriceHistoryProvider for FixedProvider {
    async fn fetch_history(
        &self,
        _inst_id: &str,
        _max_points: usize,
    ) -> Result<Vec<PricePoint>, AppError> {
        let day = 86_400_000i64;
        Ok(self
            .closes
            .iter()
            .enumerate()
            .map(|(i, c)| PricePoint {
                ts: 1_714_521_600_000 - i as i64 * day,
                close: *c,
                volume: 120_000.0,
            })
            .collect())
    }

    async fn fetch_latest(&self, inst_ids: &[String]) -> Result<HashMap<String, f64>, AppError> {
        let mut out = HashMap::new();
        if let Some(first) = self.closes.first() {
            for inst in inst_ids {
                out.insert(inst.clone(), *first);
            }
        }
        Ok(out)
    }
}

fn req(owner: &str, code: &str, params: serde_json::Value) -> CreateInstanceReq {
    CreateInstanceReq {
        owner_id: owner.to_string(),
        skill_code: code.to_string(),
        label: None,
        inst_id: Some("005930".to_string()),
        params,
        order_qty: 10.0,
        order_style: "market".to_string(),
        priority: 0,
    }
}

#[tokio::test]
async fn test_check_triggers_and_transitions() -> Result<()> {
    let registry = setup().await?;
    let service = SkillInstanceService::new(registry)?;
    let owner = format!("u-{}", Uuid::new_v4().simple());
    let provider = FixedProvider {
        closes: vec![69_500.0, 69_800.0],
    };

    let created = service
        .create(req(&owner, "buy_below", json!({"target_price": 70_000.0})))
        .await?;
    let outcome = service.check(&provider, &created.id).await?;
    assert!(outcome.triggered);

    let after = service.get(&created.id).await?;
    assert_eq!(after.status, "triggered");
    assert!(after.triggered_ts.is_some());
    assert!(after.last_checked_ts.is_some());

    // 触发和检查各落一条流水
    let log_model = ExecutionLogModel::new().await;
    let rows = log_model.list_by_instance(&created.id, 20).await?;
    let actions: Vec<&str> = rows.iter().map(|r| r.action.as_str()).collect();
    assert!(actions.contains(&"trigger"));
    assert!(actions.contains(&"check"));

    // triggered状态不能再check
    let err = service.check(&provider, &created.id).await.unwrap_err();
    assert!(matches!(err, AppError::InvalidStatus { .. }));
    Ok(())
}

#[tokio::test]
async fn test_check_not_triggered_keeps_active() -> Result<()> {
    let registry = setup().await?;
    let service = SkillInstanceService::new(registry)?;
    let owner = format!("u-{}", Uuid::new_v4().simple());
    let provider = FixedProvider {
        closes: vec![69_500.0, 69_800.0],
    };

    let created = service
        .create(req(&owner, "sell_above", json!({"target_price": 100_000.0})))
        .await?;
    let outcome = service.check(&provider, &created.id).await?;
    assert!(!outcome.triggered);

    let after = service.get(&created.id).await?;
    assert_eq!(after.status, "active");
    assert!(after.last_checked_ts.is_some());
    assert!(after.triggered_ts.is_none());
    Ok(())
}

#[tokio::test]
async fn test_check_insufficient_history_fails_soft() -> Result<()> {
    let registry = setup().await?;
    let service = SkillInstanceService::new(registry)?;
    let owner = format!("u-{}", Uuid::new_v4().simple());
    // rsi默认周期14，需要15根，只给3根
    let provider = FixedProvider {
        closes: vec![69_500.0, 69_800.0, 70_100.0],
    };

    let created = service
        .create(req(&owner, "rsi_oversold", json!({})))
        .await?;
    let outcome = service.check(&provider, &created.id).await?;
    assert!(!outcome.triggered);
    assert!(!outcome.detail.is_empty());

    let after = service.get(&created.id).await?;
    assert_eq!(after.status, "active");
    Ok(())
}

#[tokio::test]
async fn test_check_corrupted_params_errors() -> Result<()> {
    let registry = setup().await?;
    let service = SkillInstanceService::new(registry)?;
    let owner = format!("u-{}", Uuid::new_v4().simple());
    let provider = FixedProvider {
        closes: vec![69_500.0],
    };

    let created = service
        .create(req(&owner, "buy_below", json!({"target_price": 70_000.0})))
        .await?;

    // 直接把库里的参数改坏，模拟定义升级后留下的脏数据
    let model = SkillInstanceModel::new().await;
    let mut row = service.get(&created.id).await?;
    row.params = "{}".to_string();
    model.update(&row).await?;

    let err = service.check(&provider, &created.id).await.unwrap_err();
    assert!(matches!(err, AppError::InvalidParams(_)));

    let after = service.get(&created.id).await?;
    assert_eq!(after.status, "active");
    assert!(after.last_error.as_deref().unwrap_or("").contains("target_price"));

    let log_model = ExecutionLogModel::new().await;
    let rows = log_model.list_by_instance(&created.id, 20).await?;
    assert!(rows.iter().any(|r| r.detail.contains("评估失败")));
    Ok(())
}
