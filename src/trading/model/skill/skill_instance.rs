use rbatis::executor::Executor;
use rbatis::rbdc::db::ExecResult;
use rbatis::{crud, impl_select, impl_update, RBatis};
use rbs::to_value;
use serde_json::json;
use tracing::debug;

use crate::app_config::db;

/// 技能实例表。status取值: active/paused/triggered/completed/error
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct SkillInstanceEntity {
    pub id: String,
    pub owner_id: String,
    pub skill_code: String,
    pub label: Option<String>,
    pub inst_id: Option<String>,
    pub params: String,
    pub order_qty: f64,
    pub order_style: String,
    pub priority: i32,
    pub status: String,
    pub last_checked_ts: Option<i64>,
    pub triggered_ts: Option<i64>,
    pub last_error: Option<String>,
    pub created_ts: i64,
    pub updated_ts: i64,
}

crud!(SkillInstanceEntity {}, "skill_instance");
impl_select!(SkillInstanceEntity{select_active() =>
    "`where status = 'active' order by priority desc, created_ts asc`"},"skill_instance");
impl_select!(SkillInstanceEntity{select_by_owner(owner_id:&str) =>
    "`where owner_id = #{owner_id} order by created_ts desc`"},"skill_instance");
impl_update!(SkillInstanceEntity{update_with_status_guard(id:&str,from_status:&str) =>
    "`where id = #{id} and status = #{from_status}`"},"skill_instance");

/// 实例状态常量，和库里status列的取值一一对应
pub mod status {
    pub const ACTIVE: &str = "active";
    pub const PAUSED: &str = "paused";
    pub const TRIGGERED: &str = "triggered";
    pub const COMPLETED: &str = "completed";
    pub const ERROR: &str = "error";
}

pub struct SkillInstanceModel {
    db: &'static RBatis,
}

impl SkillInstanceModel {
    pub async fn new() -> SkillInstanceModel {
        Self {
            db: db::get_db_client(),
        }
    }

    pub async fn add(&self, instance: &SkillInstanceEntity) -> anyhow::Result<ExecResult> {
        let data = SkillInstanceEntity::insert(self.db, instance).await?;
        debug!("insert skill_instance result: {}", json!(data));
        Ok(data)
    }

    /// 在给定事务里插入，创建流程的配额与查重要和插入同一事务
    pub async fn add_in_tx(
        &self,
        tx: &dyn Executor,
        instance: &SkillInstanceEntity,
    ) -> anyhow::Result<ExecResult> {
        let data = SkillInstanceEntity::insert(tx, instance).await?;
        Ok(data)
    }

    pub async fn get_by_id(&self, id: &str) -> anyhow::Result<Option<SkillInstanceEntity>> {
        let mut rows = SkillInstanceEntity::select_by_column(self.db, "id", id).await?;
        Ok(rows.pop())
    }

    pub async fn list_by_owner(&self, owner_id: &str) -> anyhow::Result<Vec<SkillInstanceEntity>> {
        let rows = SkillInstanceEntity::select_by_owner(self.db, owner_id).await?;
        Ok(rows)
    }

    /// 扫描目标：按优先级降序，再按创建时间升序
    pub async fn list_active(&self) -> anyhow::Result<Vec<SkillInstanceEntity>> {
        let rows = SkillInstanceEntity::select_active(self.db).await?;
        Ok(rows)
    }

    /// 带前置状态守卫的整行更新。返回false表示状态已被并发修改，本次不生效
    pub async fn guarded_update(
        &self,
        instance: &SkillInstanceEntity,
        from_status: &str,
    ) -> anyhow::Result<bool> {
        let data = SkillInstanceEntity::update_with_status_guard(
            self.db,
            instance,
            &instance.id,
            from_status,
        )
        .await?;
        Ok(data.rows_affected == 1)
    }

    /// 不做状态守卫的整行更新，用于刷新last_checked_ts这类非状态字段
    pub async fn update(&self, instance: &SkillInstanceEntity) -> anyhow::Result<ExecResult> {
        let data = SkillInstanceEntity::update_by_column(self.db, instance, "id").await?;
        Ok(data)
    }

    pub async fn delete_by_id(&self, id: &str) -> anyhow::Result<ExecResult> {
        let data = SkillInstanceEntity::delete_by_column(self.db, "id", id).await?;
        Ok(data)
    }

    /// owner名下实例总数，配额校验用。传入事务执行器保证与插入同一事务
    pub async fn count_by_owner(&self, tx: &dyn Executor, owner_id: &str) -> anyhow::Result<u64> {
        let value = tx
            .query(
                "select count(*) as count from skill_instance where owner_id = ?",
                vec![to_value!(owner_id)],
            )
            .await?;
        Ok(rbatis::decode(value)?)
    }

    /// 同owner+技能+标的的激活实例数，防重复用
    pub async fn count_active_same_target(
        &self,
        tx: &dyn Executor,
        owner_id: &str,
        skill_code: &str,
        inst_id: Option<&str>,
    ) -> anyhow::Result<u64> {
        let value = match inst_id {
            Some(inst) => {
                tx.query(
                    "select count(*) as count from skill_instance \
                     where owner_id = ? and skill_code = ? and inst_id = ? and status = 'active'",
                    vec![to_value!(owner_id), to_value!(skill_code), to_value!(inst)],
                )
                .await?
            }
            None => {
                tx.query(
                    "select count(*) as count from skill_instance \
                     where owner_id = ? and skill_code = ? and inst_id is null and status = 'active'",
                    vec![to_value!(owner_id), to_value!(skill_code)],
                )
                .await?
            }
        };
        Ok(rbatis::decode(value)?)
    }
}
