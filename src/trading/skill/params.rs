use serde_json::{Map, Value};

use crate::error::AppError;
use crate::trading::model::skill::skill_definition::SkillDefinitionEntity;
use crate::trading::skill::definition::{parse_schema, ParamField};

/// 实例参数视图：默认值已合并，类型已在创建时校验过
#[derive(Debug, Clone)]
pub struct SkillParams {
    values: Map<String, Value>,
}

impl SkillParams {
    /// 从实例存储的JSON文本还原参数，按定义补齐默认值
    pub fn from_instance(
        def: &SkillDefinitionEntity,
        raw_params: &str,
    ) -> Result<SkillParams, AppError> {
        let raw: Value = serde_json::from_str(raw_params)
            .map_err(|e| AppError::InvalidParams(format!("参数JSON损坏: {}", e)))?;
        let merged = merge_defaults(def, &raw)?;
        Ok(SkillParams { values: merged })
    }

    pub fn f64(&self, key: &str) -> Option<f64> {
        self.values.get(key).and_then(|v| v.as_f64())
    }

    pub fn usize(&self, key: &str) -> Option<usize> {
        self.values
            .get(key)
            .and_then(|v| v.as_u64())
            .map(|v| v as usize)
    }
}

fn merge_defaults(
    def: &SkillDefinitionEntity,
    raw: &Value,
) -> Result<Map<String, Value>, AppError> {
    let mut merged = match raw {
        Value::Object(m) => m.clone(),
        Value::Null => Map::new(),
        _ => {
            return Err(AppError::InvalidParams(
                "params必须是JSON对象".to_string(),
            ))
        }
    };
    let defaults: Value = serde_json::from_str(&def.default_params)
        .map_err(|e| AppError::InvalidParams(format!("默认参数损坏: {}", e)))?;
    if let Value::Object(d) = defaults {
        for (k, v) in d {
            merged.entry(k).or_insert(v);
        }
    }
    Ok(merged)
}

/// 创建实例时的完整校验：未知键拒绝、必填键齐全、逐字段类型与取值范围、
/// 周期类参数的长短关系。返回合并默认值后的规范化参数对象。
pub fn validate_params(def: &SkillDefinitionEntity, raw: &Value) -> Result<Value, AppError> {
    let fields = parse_schema(def)?;
    let merged = merge_defaults(def, raw)?;

    let known: Vec<&str> = fields.iter().map(|f| f.key.as_str()).collect();
    for key in merged.keys() {
        if !known.contains(&key.as_str()) {
            return Err(AppError::InvalidParams(format!(
                "技能{}不认识参数: {}",
                def.code, key
            )));
        }
    }

    for field in &fields {
        let value = match merged.get(&field.key) {
            Some(v) => v,
            None => {
                if field.required {
                    return Err(AppError::InvalidParams(format!(
                        "缺少必填参数: {}",
                        field.key
                    )));
                }
                continue;
            }
        };
        check_field(field, value)?;
    }

    check_period_pairs(&merged)?;
    Ok(Value::Object(merged))
}

fn check_field(field: &ParamField, value: &Value) -> Result<(), AppError> {
    match field.field_type.as_str() {
        "integer" => {
            let v = value.as_u64().ok_or_else(|| {
                AppError::InvalidParams(format!("参数{}必须是正整数", field.key))
            })?;
            if v == 0 {
                return Err(AppError::InvalidParams(format!(
                    "参数{}必须大于0",
                    field.key
                )));
            }
        }
        "percent" => {
            let v = value.as_f64().ok_or_else(|| {
                AppError::InvalidParams(format!("参数{}必须是数值", field.key))
            })?;
            if !(v > 0.0 && v < 100.0) {
                return Err(AppError::InvalidParams(format!(
                    "参数{}必须在(0, 100)区间内",
                    field.key
                )));
            }
        }
        "price" | "number" => {
            let v = value.as_f64().ok_or_else(|| {
                AppError::InvalidParams(format!("参数{}必须是数值", field.key))
            })?;
            if v <= 0.0 {
                return Err(AppError::InvalidParams(format!(
                    "参数{}必须大于0",
                    field.key
                )));
            }
        }
        "text" => {
            if !value.is_string() {
                return Err(AppError::InvalidParams(format!(
                    "参数{}必须是字符串",
                    field.key
                )));
            }
        }
        other => {
            return Err(AppError::InvalidParams(format!(
                "schema含未知字段类型: {}",
                other
            )));
        }
    }
    Ok(())
}

/// 均线和MACD的快慢周期必须满足短<长，否则交叉永远算不出来
fn check_period_pairs(params: &Map<String, Value>) -> Result<(), AppError> {
    let pairs = [("short_period", "long_period"), ("fast", "slow")];
    for (short_key, long_key) in pairs {
        if let (Some(short), Some(long)) = (
            params.get(short_key).and_then(|v| v.as_u64()),
            params.get(long_key).and_then(|v| v.as_u64()),
        ) {
            if short >= long {
                return Err(AppError::InvalidParams(format!(
                    "{}必须小于{}",
                    short_key, long_key
                )));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trading::skill::definition::builtin_definitions;
    use serde_json::json;

    fn def(code: &str) -> SkillDefinitionEntity {
        builtin_definitions()
            .into_iter()
            .find(|d| d.code == code)
            .unwrap()
    }

    #[test]
    fn test_validate_fills_defaults() {
        let d = def("golden_cross");
        let v = validate_params(&d, &json!({})).unwrap();
        assert_eq!(v["short_period"], json!(5));
        assert_eq!(v["long_period"], json!(20));
    }

    #[test]
    fn test_validate_rejects_missing_required() {
        let d = def("buy_below");
        let err = validate_params(&d, &json!({})).unwrap_err();
        assert!(matches!(err, AppError::InvalidParams(_)));
    }

    #[test]
    fn test_validate_rejects_unknown_key() {
        let d = def("buy_below");
        let err = validate_params(&d, &json!({"target_price": 50000.0, "oops": 1})).unwrap_err();
        assert!(matches!(err, AppError::InvalidParams(_)));
    }

    #[test]
    fn test_validate_percent_range() {
        let d = def("stop_loss");
        assert!(validate_params(&d, &json!({"entry_price": 10000, "stop_percent": 0.0})).is_err());
        assert!(
            validate_params(&d, &json!({"entry_price": 10000, "stop_percent": 100.0})).is_err()
        );
        assert!(validate_params(&d, &json!({"entry_price": 10000, "stop_percent": 5.0})).is_ok());
    }

    #[test]
    fn test_validate_period_order() {
        let d = def("golden_cross");
        let err =
            validate_params(&d, &json!({"short_period": 20, "long_period": 5})).unwrap_err();
        assert!(matches!(err, AppError::InvalidParams(_)));
    }

    #[test]
    fn test_params_view_merges_defaults() {
        let d = def("rsi_oversold");
        let p = SkillParams::from_instance(&d, r#"{"threshold": 25.0}"#).unwrap();
        assert_eq!(p.f64("threshold"), Some(25.0));
        assert_eq!(p.usize("period"), Some(14));
    }
}
