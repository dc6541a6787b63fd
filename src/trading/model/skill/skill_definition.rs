use rbatis::rbdc::db::ExecResult;
use rbatis::{crud, impl_select, RBatis};
use serde_json::json;
use tracing::debug;

use crate::app_config::db;
use crate::time_util;

/// 技能定义表，code是业务主键，param_schema与default_params都存JSON文本
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct SkillDefinitionEntity {
    pub code: String,
    pub category: String,
    pub name: String,
    pub description: Option<String>,
    pub param_schema: String,
    pub default_params: String,
    pub enabled: i32,
    pub created_ts: i64,
    pub updated_ts: i64,
}

crud!(SkillDefinitionEntity {}, "skill_definition");
impl_select!(SkillDefinitionEntity{select_enabled() =>
    "`where enabled = 1 order by code`"},"skill_definition");

pub struct SkillDefinitionModel {
    db: &'static RBatis,
}

impl SkillDefinitionModel {
    pub async fn new() -> SkillDefinitionModel {
        Self {
            db: db::get_db_client(),
        }
    }

    pub async fn get_by_code(&self, code: &str) -> anyhow::Result<Option<SkillDefinitionEntity>> {
        let mut rows = SkillDefinitionEntity::select_by_column(self.db, "code", code).await?;
        Ok(rows.pop())
    }

    pub async fn list_all(&self) -> anyhow::Result<Vec<SkillDefinitionEntity>> {
        let mut rows = SkillDefinitionEntity::select_all(self.db).await?;
        rows.sort_by(|a, b| a.code.cmp(&b.code));
        Ok(rows)
    }

    pub async fn list_enabled(&self) -> anyhow::Result<Vec<SkillDefinitionEntity>> {
        let rows = SkillDefinitionEntity::select_enabled(self.db).await?;
        Ok(rows)
    }

    /// 种子导入：不存在则插入，存在则刷新文案与schema，保留运营设置的enabled开关
    pub async fn upsert(&self, mut def: SkillDefinitionEntity) -> anyhow::Result<bool> {
        match self.get_by_code(&def.code).await? {
            Some(existing) => {
                def.enabled = existing.enabled;
                def.created_ts = existing.created_ts;
                def.updated_ts = time_util::now_millis();
                let data = SkillDefinitionEntity::update_by_column(self.db, &def, "code").await?;
                debug!("update skill_definition result: {}", json!(data));
                Ok(false)
            }
            None => {
                let data = SkillDefinitionEntity::insert(self.db, &def).await?;
                debug!("insert skill_definition result: {}", json!(data));
                Ok(true)
            }
        }
    }

    pub async fn set_enabled(&self, code: &str, enabled: bool) -> anyhow::Result<ExecResult> {
        let mut def = self
            .get_by_code(code)
            .await?
            .ok_or_else(|| anyhow::anyhow!("技能定义不存在: {}", code))?;
        def.enabled = if enabled { 1 } else { 0 };
        def.updated_ts = time_util::now_millis();
        let data = SkillDefinitionEntity::update_by_column(self.db, &def, "code").await?;
        Ok(data)
    }
}
