use serde_json::{json, Value};

use crate::error::AppError;
use crate::trading::broker::Side;
use crate::trading::market::{closes, volumes, PricePoint};
use crate::trading::model::skill::skill_instance::SkillInstanceEntity;
use crate::trading::skill::params::SkillParams;
use crate::trading::skill::registry::SkillRegistry;
use crate::trading::skill::{rules, SkillCode};

/// 一次条件评估的结论。不触发时side为None，
/// rationale与indicators原样写进执行日志
#[derive(Debug, Clone, serde::Serialize)]
pub struct Evaluation {
    pub triggered: bool,
    pub side: Option<Side>,
    pub rationale: String,
    pub indicators: Value,
}

impl Evaluation {
    pub fn hold(rationale: impl Into<String>, indicators: Value) -> Evaluation {
        Evaluation {
            triggered: false,
            side: None,
            rationale: rationale.into(),
            indicators,
        }
    }

    pub fn fire(side: Side, rationale: impl Into<String>, indicators: Value) -> Evaluation {
        Evaluation {
            triggered: true,
            side: Some(side),
            rationale: rationale.into(),
            indicators,
        }
    }
}

/// 对单个实例按其技能代码评估一次触发条件。纯函数，不落库不下单。
/// 行情不足一律不触发，只有参数行损坏这类配置问题才返回Err
pub fn evaluate(
    registry: &SkillRegistry,
    instance: &SkillInstanceEntity,
    series: &[PricePoint],
) -> Result<Evaluation, AppError> {
    let def = registry
        .get(&instance.skill_code)
        .ok_or_else(|| AppError::NotFound(format!("技能定义不存在: {}", instance.skill_code)))?;
    let code = SkillCode::from_code(&instance.skill_code).ok_or_else(|| {
        AppError::CapabilityNotSupported(format!("技能{}没有对应的评估规则", instance.skill_code))
    })?;
    let params = SkillParams::from_instance(def, &instance.params)?;

    let close_series = closes(series);
    match code {
        SkillCode::BuyBelow => rules::buy_below(&params, &close_series),
        SkillCode::SellAbove => rules::sell_above(&params, &close_series),
        SkillCode::GoldenCross => rules::sma_golden_cross(&params, &close_series),
        SkillCode::DeadCross => rules::sma_dead_cross(&params, &close_series),
        SkillCode::RsiOversold => rules::rsi_oversold(&params, &close_series),
        SkillCode::RsiOverbought => rules::rsi_overbought(&params, &close_series),
        SkillCode::BollLowerTouch => rules::boll_lower_touch(&params, &close_series),
        SkillCode::VolumeSurge => {
            let volume_series = volumes(series);
            rules::volume_surge(&params, &close_series, &volume_series)
        }
        SkillCode::MacdGoldenCross => rules::macd_golden_cross(&params, &close_series),
        SkillCode::MacdDeadCross => rules::macd_dead_cross(&params, &close_series),
        SkillCode::StopLoss => rules::stop_loss(&params, &close_series),
        SkillCode::TrailingStop => rules::trailing_stop(&params, &close_series),
        SkillCode::ProfitTarget => rules::profit_target(&params, &close_series),
        SkillCode::RiskOrderValueLimit | SkillCode::RiskDailyOrderLimit => {
            Ok(Evaluation::hold("风控规则在下单时校验", json!({})))
        }
    }
}
