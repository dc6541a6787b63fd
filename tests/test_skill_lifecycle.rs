use std::env;
use std::sync::Arc;

use anyhow::Result;
use dotenv::dotenv;
use serde_json::json;
use uuid::Uuid;

use skill_engine::app_config::db::{init_db, init_schema};
use skill_engine::app_config::log::setup_logging;
use skill_engine::trading::model::skill::skill_definition::SkillDefinitionModel;
use skill_engine::trading::model::skill::skill_instance::SkillInstanceModel;
use skill_engine::trading::services::skill_instance_service::{
    CreateInstanceReq, SkillInstanceService,
};
use skill_engine::trading::skill::definition::seed_skill_definitions;
use skill_engine::trading::skill::registry::SkillRegistry;
use skill_engine::AppError;

static SETUP: tokio::sync::OnceCell<()> = tokio::sync::OnceCell::const_new();

/// 测试共用一个每次运行都全新的sqlite库，建库和种子只做一次
async fn setup() -> Result<Arc<SkillRegistry>> {
    SETUP
        .get_or_try_init(|| async {
            dotenv().ok();
            env::set_var(
                "DATABASE_URL",
                format!(
                    "sqlite://target/skill_lifecycle_{}.db",
                    Uuid::new_v4().simple()
                ),
            );
            env::set_var("CREDENTIAL_SECRET_KEY", "unit-test-secret");
            env::set_var("MAX_SKILL_INSTANCES_PER_OWNER", "5");
            setup_logging().await?;
            init_db().await;
            init_schema().await?;
            seed_skill_definitions().await?;
            Ok::<(), anyhow::Error>(())
        })
        .await?;
    Ok(Arc::new(SkillRegistry::load().await?))
}

fn buy_below_req(owner: &str, inst: &str) -> CreateInstanceReq {
    CreateInstanceReq {
        owner_id: owner.to_string(),
        skill_code: "buy_below".to_string(),
        label: Some("低吸三星".to_string()),
        inst_id: Some(inst.to_string()),
        params: json!({"target_price": 70000.0}),
        order_qty: 10.0,
        order_style: "market".to_string(),
        priority: 0,
    }
}

#[tokio::test]
async fn test_create_and_list() -> Result<()> {
    let registry = setup().await?;
    let service = SkillInstanceService::new(registry)?;
    let owner = format!("u-{}", Uuid::new_v4().simple());

    let created = service.create(buy_below_req(&owner, "005930")).await?;
    assert_eq!(created.status, "active");
    assert_eq!(created.skill_code, "buy_below");

    let got = service.get(&created.id).await?;
    assert_eq!(got.owner_id, owner);
    let params: serde_json::Value = serde_json::from_str(&got.params)?;
    assert_eq!(params["target_price"], json!(70000.0));

    let rows = service.list(&owner).await?;
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].id, created.id);
    Ok(())
}

#[tokio::test]
async fn test_create_validation() -> Result<()> {
    let registry = setup().await?;
    let service = SkillInstanceService::new(registry)?;
    let owner = format!("u-{}", Uuid::new_v4().simple());

    // 不存在的技能
    let mut req = buy_below_req(&owner, "005930");
    req.skill_code = "no_such_skill".to_string();
    assert!(matches!(
        service.create(req).await.unwrap_err(),
        AppError::NotFound(_)
    ));

    // 参数类型不对
    let mut req = buy_below_req(&owner, "005930");
    req.params = json!({"target_price": "abc"});
    assert!(matches!(
        service.create(req).await.unwrap_err(),
        AppError::InvalidParams(_)
    ));

    // 不认识的参数键
    let mut req = buy_below_req(&owner, "005930");
    req.params = json!({"target_price": 70000.0, "foo": 1});
    assert!(matches!(
        service.create(req).await.unwrap_err(),
        AppError::InvalidParams(_)
    ));

    // 非风控技能必须有标的和正数量
    let mut req = buy_below_req(&owner, "005930");
    req.inst_id = None;
    assert!(matches!(
        service.create(req).await.unwrap_err(),
        AppError::InvalidParams(_)
    ));
    let mut req = buy_below_req(&owner, "005930");
    req.order_qty = 0.0;
    assert!(matches!(
        service.create(req).await.unwrap_err(),
        AppError::InvalidParams(_)
    ));

    // 不支持的下单方式
    let mut req = buy_below_req(&owner, "005930");
    req.order_style = "iceberg".to_string();
    assert!(matches!(
        service.create(req).await.unwrap_err(),
        AppError::InvalidParams(_)
    ));
    Ok(())
}

#[tokio::test]
async fn test_duplicate_active_rejected() -> Result<()> {
    let registry = setup().await?;
    let service = SkillInstanceService::new(registry)?;
    let owner = format!("u-{}", Uuid::new_v4().simple());

    service.create(buy_below_req(&owner, "005930")).await?;
    let err = service
        .create(buy_below_req(&owner, "005930"))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::DuplicateInstance { .. }));

    // 不同标的不算重复
    service.create(buy_below_req(&owner, "000660")).await?;
    Ok(())
}

#[tokio::test]
async fn test_duplicate_allowed_after_completion() -> Result<()> {
    let registry = setup().await?;
    let service = SkillInstanceService::new(registry)?;
    let owner = format!("u-{}", Uuid::new_v4().simple());

    // 唯一性只约束active实例，前一个完成后同组合可以再建
    let first = service.create(buy_below_req(&owner, "005930")).await?;
    let model = SkillInstanceModel::new().await;
    let mut row = service.get(&first.id).await?;
    row.status = "completed".to_string();
    model.update(&row).await?;

    let second = service.create(buy_below_req(&owner, "005930")).await?;
    assert_ne!(second.id, first.id);
    assert_eq!(second.status, "active");
    Ok(())
}

#[tokio::test]
async fn test_owner_quota() -> Result<()> {
    let registry = setup().await?;
    let service = SkillInstanceService::new(registry)?;
    let owner = format!("u-{}", Uuid::new_v4().simple());

    for i in 0..5 {
        service
            .create(buy_below_req(&owner, &format!("00000{}", i)))
            .await?;
    }
    let err = service
        .create(buy_below_req(&owner, "005930"))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::QuotaExceeded(_)));
    Ok(())
}

#[tokio::test]
async fn test_pause_resume_and_delete() -> Result<()> {
    let registry = setup().await?;
    let service = SkillInstanceService::new(registry)?;
    let owner = format!("u-{}", Uuid::new_v4().simple());

    let created = service.create(buy_below_req(&owner, "005930")).await?;
    let paused = service.set_paused(&owner, &created.id, true).await?;
    assert_eq!(paused.status, "paused");

    // 已暂停不能再暂停
    let err = service
        .set_paused(&owner, &created.id, true)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::InvalidStatus { .. }));

    let resumed = service.set_paused(&owner, &created.id, false).await?;
    assert_eq!(resumed.status, "active");

    // 他人的实例按不存在处理
    let err = service.delete("someone-else", &created.id).await.unwrap_err();
    assert!(matches!(err, AppError::NotFound(_)));

    service.delete(&owner, &created.id).await?;
    let err = service.get(&created.id).await.unwrap_err();
    assert!(matches!(err, AppError::NotFound(_)));
    Ok(())
}

#[tokio::test]
async fn test_terminal_instance_cannot_be_deleted() -> Result<()> {
    let registry = setup().await?;
    let service = SkillInstanceService::new(registry)?;
    let owner = format!("u-{}", Uuid::new_v4().simple());

    let created = service.create(buy_below_req(&owner, "005930")).await?;
    let model = SkillInstanceModel::new().await;
    let mut row = service.get(&created.id).await?;
    row.status = "completed".to_string();
    model.update(&row).await?;

    let err = service.delete(&owner, &created.id).await.unwrap_err();
    assert!(matches!(err, AppError::InvalidStatus { .. }));
    Ok(())
}

#[tokio::test]
async fn test_disabled_skill_blocks_new_instances() -> Result<()> {
    setup().await?;
    let def_model = SkillDefinitionModel::new().await;
    def_model.set_enabled("volume_surge", false).await?;

    // 停用后重新加载注册表再创建
    let registry = Arc::new(SkillRegistry::load().await?);
    let service = SkillInstanceService::new(registry)?;
    let owner = format!("u-{}", Uuid::new_v4().simple());
    let req = CreateInstanceReq {
        owner_id: owner,
        skill_code: "volume_surge".to_string(),
        label: None,
        inst_id: Some("005930".to_string()),
        params: json!({}),
        order_qty: 10.0,
        order_style: "market".to_string(),
        priority: 0,
    };
    let err = service.create(req).await.unwrap_err();
    assert!(matches!(err, AppError::InvalidParams(_)));
    Ok(())
}
