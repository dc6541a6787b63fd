pub mod definition;
pub mod evaluator;
pub mod params;
pub mod registry;
pub mod rules;

use std::fmt;

/// 技能所属类别，决定触发后下单方向与可选字段约束
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkillCategory {
    /// 入场类，触发买入
    Entry,
    /// 离场类，触发卖出
    Exit,
    /// 风控类，不独立触发，下单时做拦截
    Risk,
}

impl SkillCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            SkillCategory::Entry => "entry",
            SkillCategory::Exit => "exit",
            SkillCategory::Risk => "risk",
        }
    }
}

impl fmt::Display for SkillCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// 全部内置技能。新增技能要同时补充定义目录和评估分派
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SkillCode {
    BuyBelow,
    SellAbove,
    GoldenCross,
    DeadCross,
    RsiOversold,
    RsiOverbought,
    BollLowerTouch,
    VolumeSurge,
    MacdGoldenCross,
    MacdDeadCross,
    StopLoss,
    TrailingStop,
    ProfitTarget,
    RiskOrderValueLimit,
    RiskDailyOrderLimit,
}

impl SkillCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            SkillCode::BuyBelow => "buy_below",
            SkillCode::SellAbove => "sell_above",
            SkillCode::GoldenCross => "golden_cross",
            SkillCode::DeadCross => "dead_cross",
            SkillCode::RsiOversold => "rsi_oversold",
            SkillCode::RsiOverbought => "rsi_overbought",
            SkillCode::BollLowerTouch => "boll_lower_touch",
            SkillCode::VolumeSurge => "volume_surge",
            SkillCode::MacdGoldenCross => "macd_golden_cross",
            SkillCode::MacdDeadCross => "macd_dead_cross",
            SkillCode::StopLoss => "stop_loss",
            SkillCode::TrailingStop => "trailing_stop",
            SkillCode::ProfitTarget => "profit_target",
            SkillCode::RiskOrderValueLimit => "risk_order_value_limit",
            SkillCode::RiskDailyOrderLimit => "risk_daily_order_limit",
        }
    }

    pub fn from_code(code: &str) -> Option<SkillCode> {
        let v = match code {
            "buy_below" => SkillCode::BuyBelow,
            "sell_above" => SkillCode::SellAbove,
            "golden_cross" => SkillCode::GoldenCross,
            "dead_cross" => SkillCode::DeadCross,
            "rsi_oversold" => SkillCode::RsiOversold,
            "rsi_overbought" => SkillCode::RsiOverbought,
            "boll_lower_touch" => SkillCode::BollLowerTouch,
            "volume_surge" => SkillCode::VolumeSurge,
            "macd_golden_cross" => SkillCode::MacdGoldenCross,
            "macd_dead_cross" => SkillCode::MacdDeadCross,
            "stop_loss" => SkillCode::StopLoss,
            "trailing_stop" => SkillCode::TrailingStop,
            "profit_target" => SkillCode::ProfitTarget,
            "risk_order_value_limit" => SkillCode::RiskOrderValueLimit,
            "risk_daily_order_limit" => SkillCode::RiskDailyOrderLimit,
            _ => return None,
        };
        Some(v)
    }

    pub fn category(&self) -> SkillCategory {
        match self {
            SkillCode::BuyBelow
            | SkillCode::GoldenCross
            | SkillCode::RsiOversold
            | SkillCode::BollLowerTouch
            | SkillCode::VolumeSurge
            | SkillCode::MacdGoldenCross => SkillCategory::Entry,
            SkillCode::SellAbove
            | SkillCode::DeadCross
            | SkillCode::RsiOverbought
            | SkillCode::MacdDeadCross
            | SkillCode::StopLoss
            | SkillCode::TrailingStop
            | SkillCode::ProfitTarget => SkillCategory::Exit,
            SkillCode::RiskOrderValueLimit | SkillCode::RiskDailyOrderLimit => SkillCategory::Risk,
        }
    }

    pub fn all() -> &'static [SkillCode] {
        &[
            SkillCode::BuyBelow,
            SkillCode::SellAbove,
            SkillCode::GoldenCross,
            SkillCode::DeadCross,
            SkillCode::RsiOversold,
            SkillCode::RsiOverbought,
            SkillCode::BollLowerTouch,
            SkillCode::VolumeSurge,
            SkillCode::MacdGoldenCross,
            SkillCode::MacdDeadCross,
            SkillCode::StopLoss,
            SkillCode::TrailingStop,
            SkillCode::ProfitTarget,
            SkillCode::RiskOrderValueLimit,
            SkillCode::RiskDailyOrderLimit,
        ]
    }
}

impl fmt::Display for SkillCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_code_roundtrip() {
        for code in SkillCode::all() {
            assert_eq!(SkillCode::from_code(code.as_str()), Some(*code));
        }
        assert_eq!(SkillCode::from_code("no_such_skill"), None);
    }

    #[test]
    fn test_category_split() {
        let entry = SkillCode::all()
            .iter()
            .filter(|c| c.category() == SkillCategory::Entry)
            .count();
        let exit = SkillCode::all()
            .iter()
            .filter(|c| c.category() == SkillCategory::Exit)
            .count();
        let risk = SkillCode::all()
            .iter()
            .filter(|c| c.category() == SkillCategory::Risk)
            .count();
        assert_eq!((entry, exit, risk), (6, 7, 2));
    }
}
