use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;

use crate::error::AppError;
use crate::time_util;
use crate::trading::model::skill::skill_definition::{SkillDefinitionEntity, SkillDefinitionModel};
use crate::trading::skill::SkillCode;

/// 参数schema里的一项字段描述，dashboard据此渲染配置表单
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParamField {
    pub key: String,
    pub label: String,
    #[serde(rename = "type")]
    pub field_type: String,
    #[serde(default)]
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
}

impl ParamField {
    fn required(key: &str, label: &str, field_type: &str, unit: Option<&str>) -> ParamField {
        ParamField {
            key: key.to_string(),
            label: label.to_string(),
            field_type: field_type.to_string(),
            required: true,
            default: None,
            unit: unit.map(|u| u.to_string()),
        }
    }

    fn optional(
        key: &str,
        label: &str,
        field_type: &str,
        default: Value,
        unit: Option<&str>,
    ) -> ParamField {
        ParamField {
            key: key.to_string(),
            label: label.to_string(),
            field_type: field_type.to_string(),
            required: false,
            default: Some(default),
            unit: unit.map(|u| u.to_string()),
        }
    }
}

pub fn parse_schema(def: &SkillDefinitionEntity) -> Result<Vec<ParamField>, AppError> {
    serde_json::from_str(&def.param_schema)
        .map_err(|e| AppError::InvalidParams(format!("技能{}的schema损坏: {}", def.code, e)))
}

fn entity(
    code: SkillCode,
    name: &str,
    description: &str,
    fields: Vec<ParamField>,
) -> SkillDefinitionEntity {
    let defaults: serde_json::Map<String, Value> = fields
        .iter()
        .filter_map(|f| f.default.clone().map(|d| (f.key.clone(), d)))
        .collect();
    let now = time_util::now_millis();
    SkillDefinitionEntity {
        code: code.as_str().to_string(),
        category: code.category().as_str().to_string(),
        name: name.to_string(),
        description: Some(description.to_string()),
        param_schema: serde_json::to_string(&fields).expect("serialize param schema"),
        default_params: serde_json::to_string(&Value::Object(defaults))
            .expect("serialize default params"),
        enabled: 1,
        created_ts: now,
        updated_ts: now,
    }
}

/// 内置技能目录。运营通过enable/disable开关控制上架，目录本身由代码维护
pub fn builtin_definitions() -> Vec<SkillDefinitionEntity> {
    use serde_json::json;
    vec![
        entity(
            SkillCode::BuyBelow,
            "到价买入",
            "现价跌至目标价及以下时买入",
            vec![ParamField::required("target_price", "目标价", "price", Some("KRW"))],
        ),
        entity(
            SkillCode::SellAbove,
            "到价卖出",
            "现价涨至目标价及以上时卖出",
            vec![ParamField::required("target_price", "目标价", "price", Some("KRW"))],
        ),
        entity(
            SkillCode::GoldenCross,
            "均线金叉",
            "短期均线上穿长期均线时买入",
            vec![
                ParamField::optional("short_period", "短周期", "integer", json!(5), None),
                ParamField::optional("long_period", "长周期", "integer", json!(20), None),
            ],
        ),
        entity(
            SkillCode::DeadCross,
            "均线死叉",
            "短期均线下穿长期均线时卖出",
            vec![
                ParamField::optional("short_period", "短周期", "integer", json!(5), None),
                ParamField::optional("long_period", "长周期", "integer", json!(20), None),
            ],
        ),
        entity(
            SkillCode::RsiOversold,
            "RSI超卖",
            "RSI跌至阈值及以下时买入",
            vec![
                ParamField::optional("period", "RSI周期", "integer", json!(14), None),
                ParamField::optional("threshold", "超卖阈值", "number", json!(30.0), None),
            ],
        ),
        entity(
            SkillCode::RsiOverbought,
            "RSI超买",
            "RSI升至阈值及以上时卖出",
            vec![
                ParamField::optional("period", "RSI周期", "integer", json!(14), None),
                ParamField::optional("threshold", "超买阈值", "number", json!(70.0), None),
            ],
        ),
        entity(
            SkillCode::BollLowerTouch,
            "布林下轨回踩",
            "收盘价触及布林带下轨时买入",
            vec![
                ParamField::optional("period", "布林周期", "integer", json!(20), None),
                ParamField::optional("k", "带宽倍数", "number", json!(2.0), None),
            ],
        ),
        entity(
            SkillCode::VolumeSurge,
            "放量上攻",
            "最新成交量达到前期均量的数倍且价格未跌时买入",
            vec![
                ParamField::optional("lookback", "均量回看根数", "integer", json!(20), None),
                ParamField::optional("multiplier", "放量倍数", "number", json!(3.0), None),
            ],
        ),
        entity(
            SkillCode::MacdGoldenCross,
            "MACD金叉",
            "DIF上穿DEA时买入",
            vec![
                ParamField::optional("fast", "快线周期", "integer", json!(12), None),
                ParamField::optional("slow", "慢线周期", "integer", json!(26), None),
                ParamField::optional("signal", "信号线周期", "integer", json!(9), None),
            ],
        ),
        entity(
            SkillCode::MacdDeadCross,
            "MACD死叉",
            "DIF下穿DEA时卖出",
            vec![
                ParamField::optional("fast", "快线周期", "integer", json!(12), None),
                ParamField::optional("slow", "慢线周期", "integer", json!(26), None),
                ParamField::optional("signal", "信号线周期", "integer", json!(9), None),
            ],
        ),
        entity(
            SkillCode::StopLoss,
            "固定止损",
            "现价较买入价回撤达到设定比例时卖出",
            vec![
                ParamField::required("entry_price", "买入价", "price", Some("KRW")),
                ParamField::optional("stop_percent", "止损比例", "percent", json!(5.0), Some("%")),
            ],
        ),
        entity(
            SkillCode::TrailingStop,
            "移动止损",
            "现价从观察到的最高价回撤达到设定比例时卖出",
            vec![
                ParamField::required("entry_price", "买入价", "price", Some("KRW")),
                ParamField::optional("trail_percent", "回撤比例", "percent", json!(5.0), Some("%")),
            ],
        ),
        entity(
            SkillCode::ProfitTarget,
            "止盈目标",
            "浮盈达到设定比例时卖出",
            vec![
                ParamField::required("entry_price", "买入价", "price", Some("KRW")),
                ParamField::optional(
                    "target_percent",
                    "止盈比例",
                    "percent",
                    json!(10.0),
                    Some("%"),
                ),
            ],
        ),
        entity(
            SkillCode::RiskOrderValueLimit,
            "单笔金额上限",
            "单笔下单金额超过上限时拦截下单",
            vec![ParamField::required("max_order_value", "单笔上限", "price", Some("KRW"))],
        ),
        entity(
            SkillCode::RiskDailyOrderLimit,
            "当日下单次数上限",
            "当日(UTC)下单次数达到上限时拦截下单",
            vec![ParamField::required("max_orders_per_day", "次数上限", "integer", None)],
        ),
    ]
}

/// 把内置目录同步进库，幂等。返回新插入的条数
pub async fn seed_skill_definitions() -> anyhow::Result<usize> {
    let model = SkillDefinitionModel::new().await;
    let mut inserted = 0;
    for def in builtin_definitions() {
        if model.upsert(def).await? {
            inserted += 1;
        }
    }
    info!("技能定义目录已同步, 新增{}条", inserted);
    Ok(inserted)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_catalog_complete() {
        let defs = builtin_definitions();
        assert_eq!(defs.len(), SkillCode::all().len());
        for def in &defs {
            let code = SkillCode::from_code(&def.code).unwrap();
            assert_eq!(def.category, code.category().as_str());
            // schema和默认参数都必须是合法JSON
            let fields: Vec<ParamField> = serde_json::from_str(&def.param_schema).unwrap();
            let defaults: Value = serde_json::from_str(&def.default_params).unwrap();
            for f in fields {
                if let Some(d) = f.default {
                    assert_eq!(defaults.get(&f.key), Some(&d));
                }
            }
        }
    }

    #[test]
    fn test_schema_field_shape() {
        let defs = builtin_definitions();
        let stop = defs.iter().find(|d| d.code == "stop_loss").unwrap();
        let fields: Vec<ParamField> = serde_json::from_str(&stop.param_schema).unwrap();
        let entry = fields.iter().find(|f| f.key == "entry_price").unwrap();
        assert!(entry.required);
        assert_eq!(entry.field_type, "price");
    }
}
