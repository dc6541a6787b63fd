use rbatis::rbdc::db::ExecResult;
use rbatis::{crud, impl_select, RBatis};
use rbs::to_value;

use crate::app_config::db;
use crate::time_util;

/// 券商凭证表。appkey/secret/账号三个字段落库前已经加密，
/// 同一owner+broker下最多一条is_active=1
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct BrokerCredentialEntity {
    pub id: String,
    pub owner_id: String,
    pub broker: String,
    pub label: Option<String>,
    pub app_key_enc: String,
    pub app_secret_enc: String,
    pub account_id_enc: String,
    pub simulated: i32,
    pub is_active: i32,
    pub created_ts: i64,
    pub updated_ts: i64,
}

crud!(BrokerCredentialEntity {}, "broker_credential");
impl_select!(BrokerCredentialEntity{select_by_owner(owner_id:&str) =>
    "`where owner_id = #{owner_id} order by created_ts desc`"},"broker_credential");
impl_select!(BrokerCredentialEntity{select_active_by_owner(owner_id:&str) =>
    "`where owner_id = #{owner_id} and is_active = 1 order by updated_ts desc`"},"broker_credential");
impl_select!(BrokerCredentialEntity{select_by_owner_broker(owner_id:&str,broker:&str) =>
    "`where owner_id = #{owner_id} and broker = #{broker} order by created_ts desc`"},"broker_credential");

pub struct BrokerCredentialModel {
    db: &'static RBatis,
}

impl BrokerCredentialModel {
    pub async fn new() -> BrokerCredentialModel {
        Self {
            db: db::get_db_client(),
        }
    }

    pub async fn add(&self, credential: &BrokerCredentialEntity) -> anyhow::Result<ExecResult> {
        let data = BrokerCredentialEntity::insert(self.db, credential).await?;
        Ok(data)
    }

    pub async fn get_by_id(&self, id: &str) -> anyhow::Result<Option<BrokerCredentialEntity>> {
        let mut rows = BrokerCredentialEntity::select_by_column(self.db, "id", id).await?;
        Ok(rows.pop())
    }

    pub async fn list_by_owner(
        &self,
        owner_id: &str,
    ) -> anyhow::Result<Vec<BrokerCredentialEntity>> {
        let rows = BrokerCredentialEntity::select_by_owner(self.db, owner_id).await?;
        Ok(rows)
    }

    /// owner当前可用于下单的凭证，最近激活的排最前
    pub async fn list_active_by_owner(
        &self,
        owner_id: &str,
    ) -> anyhow::Result<Vec<BrokerCredentialEntity>> {
        let rows = BrokerCredentialEntity::select_active_by_owner(self.db, owner_id).await?;
        Ok(rows)
    }

    pub async fn count_by_owner_broker(
        &self,
        owner_id: &str,
        broker: &str,
    ) -> anyhow::Result<u64> {
        let count: u64 = self
            .db
            .query_decode(
                "select count(*) as count from broker_credential \
                 where owner_id = ? and broker = ?",
                vec![to_value!(owner_id), to_value!(broker)],
            )
            .await?;
        Ok(count)
    }

    /// 激活目标凭证并把同owner+broker的其余凭证置为未激活
    pub async fn activate_exclusive(&self, credential: &BrokerCredentialEntity) -> anyhow::Result<()> {
        let now = time_util::now_millis();
        self.db
            .exec(
                "update broker_credential set is_active = 0, updated_ts = ? \
                 where owner_id = ? and broker = ?",
                vec![
                    to_value!(now),
                    to_value!(&credential.owner_id),
                    to_value!(&credential.broker),
                ],
            )
            .await?;
        self.db
            .exec(
                "update broker_credential set is_active = 1, updated_ts = ? where id = ?",
                vec![to_value!(now), to_value!(&credential.id)],
            )
            .await?;
        Ok(())
    }

    pub async fn delete_by_id(&self, id: &str) -> anyhow::Result<ExecResult> {
        let data = BrokerCredentialEntity::delete_by_column(self.db, "id", id).await?;
        Ok(data)
    }

    pub async fn update(&self, credential: &BrokerCredentialEntity) -> anyhow::Result<ExecResult> {
        let data = BrokerCredentialEntity::update_by_column(self.db, credential, "id").await?;
        Ok(data)
    }
}
