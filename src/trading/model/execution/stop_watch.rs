use rbatis::rbdc::db::ExecResult;
use rbatis::{crud, impl_select, impl_update, RBatis};
use rbs::to_value;
use serde_json::json;
use tracing::debug;

use crate::app_config::db;

/// 止损/移动止损监控单。status取值: active/triggered/cancelled/error
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct StopWatchEntity {
    pub id: String,
    pub owner_id: String,
    pub inst_id: String,
    pub entry_price: f64,
    pub quantity: f64,
    pub stop_percent: f64,
    pub mode: String,
    pub current_stop_price: f64,
    pub highest_observed_price: f64,
    pub status: String,
    pub fail_count: i32,
    pub last_error: Option<String>,
    pub created_ts: i64,
    pub updated_ts: i64,
}

crud!(StopWatchEntity {}, "stop_watch");
impl_select!(StopWatchEntity{select_active() =>
    "`where status = 'active' order by created_ts asc`"},"stop_watch");
impl_select!(StopWatchEntity{select_by_owner(owner_id:&str) =>
    "`where owner_id = #{owner_id} order by created_ts desc`"},"stop_watch");
impl_update!(StopWatchEntity{update_with_status_guard(id:&str,from_status:&str) =>
    "`where id = #{id} and status = #{from_status}`"},"stop_watch");

/// 监控单状态常量
pub mod status {
    pub const ACTIVE: &str = "active";
    pub const TRIGGERED: &str = "triggered";
    pub const CANCELLED: &str = "cancelled";
    pub const ERROR: &str = "error";
}

/// 止损模式: fixed止损价不动，trailing跟随最高价上移
pub mod mode {
    pub const FIXED: &str = "fixed";
    pub const TRAILING: &str = "trailing";
}

pub struct StopWatchModel {
    db: &'static RBatis,
}

impl StopWatchModel {
    pub async fn new() -> StopWatchModel {
        Self {
            db: db::get_db_client(),
        }
    }

    pub async fn add(&self, watch: &StopWatchEntity) -> anyhow::Result<ExecResult> {
        let data = StopWatchEntity::insert(self.db, watch).await?;
        debug!("insert stop_watch result: {}", json!(data));
        Ok(data)
    }

    pub async fn get_by_id(&self, id: &str) -> anyhow::Result<Option<StopWatchEntity>> {
        let mut rows = StopWatchEntity::select_by_column(self.db, "id", id).await?;
        Ok(rows.pop())
    }

    pub async fn list_by_owner(&self, owner_id: &str) -> anyhow::Result<Vec<StopWatchEntity>> {
        let rows = StopWatchEntity::select_by_owner(self.db, owner_id).await?;
        Ok(rows)
    }

    pub async fn list_active(&self) -> anyhow::Result<Vec<StopWatchEntity>> {
        let rows = StopWatchEntity::select_active(self.db).await?;
        Ok(rows)
    }

    /// 带前置状态守卫的整行更新，false表示守卫未命中
    pub async fn guarded_update(
        &self,
        watch: &StopWatchEntity,
        from_status: &str,
    ) -> anyhow::Result<bool> {
        let data =
            StopWatchEntity::update_with_status_guard(self.db, watch, &watch.id, from_status)
                .await?;
        Ok(data.rows_affected == 1)
    }

    pub async fn update(&self, watch: &StopWatchEntity) -> anyhow::Result<ExecResult> {
        let data = StopWatchEntity::update_by_column(self.db, watch, "id").await?;
        Ok(data)
    }

    pub async fn count_active_by_owner(&self, owner_id: &str) -> anyhow::Result<u64> {
        let count: u64 = self
            .db
            .query_decode(
                "select count(*) as count from stop_watch \
                 where owner_id = ? and status = 'active'",
                vec![to_value!(owner_id)],
            )
            .await?;
        Ok(count)
    }
}
