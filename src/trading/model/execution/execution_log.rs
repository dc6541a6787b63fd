use rbatis::rbdc::db::ExecResult;
use rbatis::{crud, impl_select, RBatis};
use rbs::to_value;

use crate::app_config::db;

/// 执行流水表，只追加不修改。action取值: check/trigger/order/state_change
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct ExecutionLogEntity {
    pub id: String,
    pub instance_id: String,
    pub owner_id: String,
    pub skill_code: String,
    pub inst_id: Option<String>,
    pub action: String,
    pub detail: String,
    pub observed_price: Option<f64>,
    pub indicator_snapshot: Option<String>,
    pub order_outcome: Option<String>,
    pub created_ts: i64,
}

crud!(ExecutionLogEntity {}, "execution_log");
impl_select!(ExecutionLogEntity{select_by_instance(instance_id:&str,limit:u64) =>
    "`where instance_id = #{instance_id} order by created_ts desc limit #{limit}`"},"execution_log");

pub struct ExecutionLogModel {
    db: &'static RBatis,
}

impl ExecutionLogModel {
    pub async fn new() -> ExecutionLogModel {
        Self {
            db: db::get_db_client(),
        }
    }

    pub async fn append(&self, entry: &ExecutionLogEntity) -> anyhow::Result<ExecResult> {
        let data = ExecutionLogEntity::insert(self.db, entry).await?;
        Ok(data)
    }

    pub async fn list_by_instance(
        &self,
        instance_id: &str,
        limit: u64,
    ) -> anyhow::Result<Vec<ExecutionLogEntity>> {
        let rows = ExecutionLogEntity::select_by_instance(self.db, instance_id, limit).await?;
        Ok(rows)
    }

    /// owner当日(UTC)已提交到券商的下单次数，风控技能用
    pub async fn count_orders_since(&self, owner_id: &str, since_ts: i64) -> anyhow::Result<u64> {
        let count: u64 = self
            .db
            .query_decode(
                "select count(*) as count from execution_log \
                 where owner_id = ? and action = 'order' and created_ts >= ?",
                vec![to_value!(owner_id), to_value!(since_ts)],
            )
            .await?;
        Ok(count)
    }
}

/// 常用action常量，避免裸字符串散落各处
pub mod action {
    pub const CHECK: &str = "check";
    pub const TRIGGER: &str = "trigger";
    pub const ORDER: &str = "order";
    pub const STATE_CHANGE: &str = "state_change";
}

impl ExecutionLogEntity {
    /// 生成一条流水骨架，细节字段由调用方补齐
    pub fn base(
        instance_id: &str,
        owner_id: &str,
        skill_code: &str,
        inst_id: Option<String>,
        action_kind: &str,
        detail: String,
    ) -> Self {
        ExecutionLogEntity {
            id: uuid::Uuid::new_v4().to_string(),
            instance_id: instance_id.to_string(),
            owner_id: owner_id.to_string(),
            skill_code: skill_code.to_string(),
            inst_id,
            action: action_kind.to_string(),
            detail,
            observed_price: None,
            indicator_snapshot: None,
            order_outcome: None,
            created_ts: crate::time_util::now_millis(),
        }
    }
}
