use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::app_config::env::env_u64;
use crate::error::AppError;
use crate::time_util;
use crate::trading::broker::secret::CredentialCipher;
use crate::trading::broker::token_cache;
use crate::trading::broker::{Balance, Broker, BrokerGateway, OrderHistoryItem, PlainCreds};
use crate::trading::model::broker::broker_credential::{
    BrokerCredentialEntity, BrokerCredentialModel,
};

/// 注册凭证的入参，secret只在这一跳以明文出现
#[derive(Debug, Clone, Deserialize)]
pub struct RegisterCredentialReq {
    pub owner_id: String,
    pub broker: String,
    pub label: Option<String>,
    pub app_key: String,
    pub app_secret: String,
    pub account_id: String,
    pub simulated: bool,
}

/// 对外展示用的凭证视图，不带任何密文字段
#[derive(Debug, Clone, Serialize)]
pub struct MaskedCredential {
    pub id: String,
    pub owner_id: String,
    pub broker: String,
    pub label: Option<String>,
    pub simulated: bool,
    pub is_active: bool,
    pub created_ts: i64,
    pub updated_ts: i64,
}

impl From<&BrokerCredentialEntity> for MaskedCredential {
    fn from(entity: &BrokerCredentialEntity) -> Self {
        MaskedCredential {
            id: entity.id.clone(),
            owner_id: entity.owner_id.clone(),
            broker: entity.broker.clone(),
            label: entity.label.clone(),
            simulated: entity.simulated == 1,
            is_active: entity.is_active == 1,
            created_ts: entity.created_ts,
            updated_ts: entity.updated_ts,
        }
    }
}

/// 凭证的注册、激活、删除与下单前解析。
/// 明文secret只存在于校验调用和解密后的内存里，落库一律走加密
pub struct CredentialService {
    gateway: BrokerGateway,
    cipher: CredentialCipher,
}

impl CredentialService {
    pub fn from_env() -> Result<CredentialService, AppError> {
        Ok(CredentialService {
            gateway: BrokerGateway::from_env(),
            cipher: CredentialCipher::from_env()?,
        })
    }

    pub fn new(gateway: BrokerGateway, cipher: CredentialCipher) -> CredentialService {
        CredentialService { gateway, cipher }
    }

    /// 注册流程: 配额 -> 远程校验 -> 加密落库。
    /// 校验不过的凭证绝不落库。该broker槽位还没有激活凭证时新凭证自动激活
    pub async fn register(&self, req: RegisterCredentialReq) -> Result<MaskedCredential, AppError> {
        let broker = Broker::from_str(&req.broker)
            .ok_or_else(|| AppError::InvalidParams(format!("未知券商: {}", req.broker)))?;
        if req.app_key.trim().is_empty()
            || req.app_secret.trim().is_empty()
            || req.account_id.trim().is_empty()
        {
            return Err(AppError::InvalidParams(
                "appkey、secret与账号都不能为空".to_string(),
            ));
        }

        let model = BrokerCredentialModel::new().await;
        let quota = env_u64("MAX_CREDENTIALS_PER_BROKER", 3);
        let existing = model
            .count_by_owner_broker(&req.owner_id, broker.as_str())
            .await?;
        if existing >= quota {
            return Err(AppError::QuotaExceeded(format!(
                "券商{}下最多保存{}组凭证",
                broker, quota
            )));
        }

        let plain = PlainCreds {
            owner_id: req.owner_id.clone(),
            broker,
            app_key: req.app_key.clone(),
            app_secret: req.app_secret.clone(),
            account_id: req.account_id.clone(),
            simulated: req.simulated,
        };
        self.gateway.validate_credentials(&plain).await?;

        let actives = model.list_active_by_owner(&req.owner_id).await?;
        let slot_has_active = actives.iter().any(|c| c.broker == broker.as_str());

        let now = time_util::now_millis();
        let entity = BrokerCredentialEntity {
            id: Uuid::new_v4().to_string(),
            owner_id: req.owner_id.clone(),
            broker: broker.as_str().to_string(),
            label: req.label.clone(),
            app_key_enc: self.cipher.encrypt(&req.app_key)?,
            app_secret_enc: self.cipher.encrypt(&req.app_secret)?,
            account_id_enc: self.cipher.encrypt(&req.account_id)?,
            simulated: if req.simulated { 1 } else { 0 },
            is_active: if slot_has_active { 0 } else { 1 },
            created_ts: now,
            updated_ts: now,
        };
        model.add(&entity).await?;
        info!(
            "owner:{} 注册券商凭证 broker:{} simulated:{} active:{}",
            req.owner_id, broker, req.simulated, entity.is_active == 1
        );
        Ok(MaskedCredential::from(&entity))
    }

    /// 激活一组凭证，同槽位其余凭证隐式取消激活。
    /// 旧token立即失效，避免新secret配旧token
    pub async fn activate(&self, owner_id: &str, credential_id: &str) -> Result<(), AppError> {
        let model = BrokerCredentialModel::new().await;
        let entity = self.owned_credential(&model, owner_id, credential_id).await?;
        model.activate_exclusive(&entity).await?;
        if let Some(broker) = Broker::from_str(&entity.broker) {
            token_cache::invalidate(owner_id, broker).await;
        }
        Ok(())
    }

    pub async fn remove(&self, owner_id: &str, credential_id: &str) -> Result<(), AppError> {
        let model = BrokerCredentialModel::new().await;
        let entity = self.owned_credential(&model, owner_id, credential_id).await?;
        model.delete_by_id(&entity.id).await?;
        if let Some(broker) = Broker::from_str(&entity.broker) {
            token_cache::invalidate(owner_id, broker).await;
        }
        info!("owner:{} 删除券商凭证 id:{}", owner_id, credential_id);
        Ok(())
    }

    pub async fn list(&self, owner_id: &str) -> Result<Vec<MaskedCredential>, AppError> {
        let model = BrokerCredentialModel::new().await;
        let rows = model.list_by_owner(owner_id).await?;
        Ok(rows.iter().map(MaskedCredential::from).collect())
    }

    /// 下单用的明文凭证: 取最近激活的一组解密。没有激活凭证是配置问题
    pub async fn resolve_trading_creds(&self, owner_id: &str) -> Result<PlainCreds, AppError> {
        let model = BrokerCredentialModel::new().await;
        let actives = model.list_active_by_owner(owner_id).await?;
        let entity = actives.first().ok_or_else(|| {
            AppError::CredentialInvalid("没有激活的券商凭证，请先注册并激活".to_string())
        })?;
        self.decrypt_entity(entity)
    }

    pub async fn balance(&self, owner_id: &str) -> Result<Balance, AppError> {
        let creds = self.resolve_trading_creds(owner_id).await?;
        self.gateway.get_balance(&creds).await
    }

    pub async fn order_history(
        &self,
        owner_id: &str,
        start_ts: i64,
        end_ts: i64,
    ) -> Result<Vec<OrderHistoryItem>, AppError> {
        let creds = self.resolve_trading_creds(owner_id).await?;
        self.gateway.get_order_history(&creds, start_ts, end_ts).await
    }

    pub fn gateway(&self) -> &BrokerGateway {
        &self.gateway
    }

    async fn owned_credential(
        &self,
        model: &BrokerCredentialModel,
        owner_id: &str,
        credential_id: &str,
    ) -> Result<BrokerCredentialEntity, AppError> {
        let entity = model
            .get_by_id(credential_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("凭证不存在: {}", credential_id)))?;
        // 他人的凭证一律按不存在处理
        if entity.owner_id != owner_id {
            return Err(AppError::NotFound(format!("凭证不存在: {}", credential_id)));
        }
        Ok(entity)
    }

    fn decrypt_entity(&self, entity: &BrokerCredentialEntity) -> Result<PlainCreds, AppError> {
        let broker = Broker::from_str(&entity.broker)
            .ok_or_else(|| AppError::CredentialInvalid(format!("凭证记录损坏: {}", entity.broker)))?;
        Ok(PlainCreds {
            owner_id: entity.owner_id.clone(),
            broker,
            app_key: self.cipher.decrypt(&entity.app_key_enc)?,
            app_secret: self.cipher.decrypt(&entity.app_secret_enc)?,
            account_id: self.cipher.decrypt(&entity.account_id_enc)?,
            simulated: entity.simulated == 1,
        })
    }
}
