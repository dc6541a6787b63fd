use std::collections::HashMap;

use crate::trading::model::skill::skill_definition::{SkillDefinitionEntity, SkillDefinitionModel};

/// 技能定义的内存只读快照。进程启动时加载一次，
/// 评估与生命周期服务都从这里取定义，不在热路径反查数据库。
pub struct SkillRegistry {
    defs: HashMap<String, SkillDefinitionEntity>,
}

impl SkillRegistry {
    pub async fn load() -> anyhow::Result<SkillRegistry> {
        let model = SkillDefinitionModel::new().await;
        let defs = model.list_all().await?;
        Ok(Self::from_entities(defs))
    }

    pub fn from_entities(defs: Vec<SkillDefinitionEntity>) -> SkillRegistry {
        SkillRegistry {
            defs: defs.into_iter().map(|d| (d.code.clone(), d)).collect(),
        }
    }

    pub fn get(&self, code: &str) -> Option<&SkillDefinitionEntity> {
        self.defs.get(code)
    }

    pub fn list(&self) -> Vec<&SkillDefinitionEntity> {
        let mut all: Vec<&SkillDefinitionEntity> = self.defs.values().collect();
        all.sort_by(|a, b| a.code.cmp(&b.code));
        all
    }

    pub fn len(&self) -> usize {
        self.defs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.defs.is_empty()
    }
}
