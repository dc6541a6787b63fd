use serde_json::json;

use crate::error::AppError;
use crate::trading::broker::Side;
use crate::trading::indicator::bollinger::bollinger;
use crate::trading::indicator::cross::{macd_cross, sma_cross};
use crate::trading::indicator::rsi::rsi;
use crate::trading::skill::evaluator::Evaluation;
use crate::trading::skill::params::SkillParams;

/// 参数在创建时已校验过，这里缺字段说明库里的行被改坏了
fn require_f64(params: &SkillParams, key: &str) -> Result<f64, AppError> {
    params
        .f64(key)
        .ok_or_else(|| AppError::InvalidParams(format!("缺少参数: {}", key)))
}

fn require_usize(params: &SkillParams, key: &str) -> Result<usize, AppError> {
    params
        .usize(key)
        .ok_or_else(|| AppError::InvalidParams(format!("缺少参数: {}", key)))
}

fn latest_close(closes: &[f64]) -> Option<f64> {
    closes.first().copied()
}

fn hold_no_data() -> Evaluation {
    Evaluation::hold("没有行情数据", json!({ "points": 0 }))
}

pub(crate) fn buy_below(params: &SkillParams, closes: &[f64]) -> Result<Evaluation, AppError> {
    let target = require_f64(params, "target_price")?;
    let close = match latest_close(closes) {
        Some(c) => c,
        None => return Ok(hold_no_data()),
    };
    let indicators = json!({ "close": close, "target_price": target });
    if close <= target {
        Ok(Evaluation::fire(
            Side::Buy,
            format!("现价{:.2}触及目标买入价{:.2}", close, target),
            indicators,
        ))
    } else {
        Ok(Evaluation::hold(
            format!("现价{:.2}仍高于目标买入价{:.2}", close, target),
            indicators,
        ))
    }
}

pub(crate) fn sell_above(params: &SkillParams, closes: &[f64]) -> Result<Evaluation, AppError> {
    let target = require_f64(params, "target_price")?;
    let close = match latest_close(closes) {
        Some(c) => c,
        None => return Ok(hold_no_data()),
    };
    let indicators = json!({ "close": close, "target_price": target });
    if close >= target {
        Ok(Evaluation::fire(
            Side::Sell,
            format!("现价{:.2}触及目标卖出价{:.2}", close, target),
            indicators,
        ))
    } else {
        Ok(Evaluation::hold(
            format!("现价{:.2}未到目标卖出价{:.2}", close, target),
            indicators,
        ))
    }
}

pub(crate) fn sma_golden_cross(
    params: &SkillParams,
    closes: &[f64],
) -> Result<Evaluation, AppError> {
    let short_period = require_usize(params, "short_period")?;
    let long_period = require_usize(params, "long_period")?;
    let state = match sma_cross(closes, short_period, long_period) {
        Some(s) => s,
        None => {
            return Ok(Evaluation::hold(
                format!(
                    "K线不足，{}与{}周期均线算不出最近两根",
                    short_period, long_period
                ),
                json!({ "points": closes.len(), "need": long_period + 1 }),
            ))
        }
    };
    let indicators = json!({
        "short_period": short_period,
        "long_period": long_period,
        "short_prev": state.short_prev,
        "long_prev": state.long_prev,
        "short_now": state.short_now,
        "long_now": state.long_now,
    });
    if state.golden() {
        Ok(Evaluation::fire(
            Side::Buy,
            format!("短均线{:.2}上穿长均线{:.2}", state.short_now, state.long_now),
            indicators,
        ))
    } else {
        Ok(Evaluation::hold("均线未形成金叉", indicators))
    }
}

pub(crate) fn sma_dead_cross(
    params: &SkillParams,
    closes: &[f64],
) -> Result<Evaluation, AppError> {
    let short_period = require_usize(params, "short_period")?;
    let long_period = require_usize(params, "long_period")?;
    let state = match sma_cross(closes, short_period, long_period) {
        Some(s) => s,
        None => {
            return Ok(Evaluation::hold(
                format!(
                    "K线不足，{}与{}周期均线算不出最近两根",
                    short_period, long_period
                ),
                json!({ "points": closes.len(), "need": long_period + 1 }),
            ))
        }
    };
    let indicators = json!({
        "short_period": short_period,
        "long_period": long_period,
        "short_prev": state.short_prev,
        "long_prev": state.long_prev,
        "short_now": state.short_now,
        "long_now": state.long_now,
    });
    if state.dead() {
        Ok(Evaluation::fire(
            Side::Sell,
            format!("短均线{:.2}下穿长均线{:.2}", state.short_now, state.long_now),
            indicators,
        ))
    } else {
        Ok(Evaluation::hold("均线未形成死叉", indicators))
    }
}

pub(crate) fn rsi_oversold(params: &SkillParams, closes: &[f64]) -> Result<Evaluation, AppError> {
    let period = require_usize(params, "period")?;
    let threshold = require_f64(params, "threshold")?;
    let value = match rsi(closes, period) {
        Some(v) => v,
        None => {
            return Ok(Evaluation::hold(
                format!("K线不足，RSI({})需要{}根收盘价", period, period + 1),
                json!({ "points": closes.len(), "need": period + 1 }),
            ))
        }
    };
    let indicators = json!({ "period": period, "rsi": value, "threshold": threshold });
    if value <= threshold {
        Ok(Evaluation::fire(
            Side::Buy,
            format!("RSI({})={:.2}，达到超卖阈值{:.2}", period, value, threshold),
            indicators,
        ))
    } else {
        Ok(Evaluation::hold(
            format!("RSI({})={:.2}，高于超卖阈值{:.2}", period, value, threshold),
            indicators,
        ))
    }
}

pub(crate) fn rsi_overbought(
    params: &SkillParams,
    closes: &[f64],
) -> Result<Evaluation, AppError> {
    let period = require_usize(params, "period")?;
    let threshold = require_f64(params, "threshold")?;
    let value = match rsi(closes, period) {
        Some(v) => v,
        None => {
            return Ok(Evaluation::hold(
                format!("K线不足，RSI({})需要{}根收盘价", period, period + 1),
                json!({ "points": closes.len(), "need": period + 1 }),
            ))
        }
    };
    let indicators = json!({ "period": period, "rsi": value, "threshold": threshold });
    if value >= threshold {
        Ok(Evaluation::fire(
            Side::Sell,
            format!("RSI({})={:.2}，达到超买阈值{:.2}", period, value, threshold),
            indicators,
        ))
    } else {
        Ok(Evaluation::hold(
            format!("RSI({})={:.2}，低于超买阈值{:.2}", period, value, threshold),
            indicators,
        ))
    }
}

pub(crate) fn boll_lower_touch(
    params: &SkillParams,
    closes: &[f64],
) -> Result<Evaluation, AppError> {
    let period = require_usize(params, "period")?;
    let k = require_f64(params, "k")?;
    let close = match latest_close(closes) {
        Some(c) => c,
        None => return Ok(hold_no_data()),
    };
    let bands = match bollinger(closes, period, k) {
        Some(b) => b,
        None => {
            return Ok(Evaluation::hold(
                format!("K线不足，布林带需要{}根收盘价", period),
                json!({ "points": closes.len(), "need": period }),
            ))
        }
    };
    let indicators = json!({
        "period": period,
        "k": k,
        "upper": bands.upper,
        "middle": bands.middle,
        "lower": bands.lower,
        "close": close,
    });
    if close <= bands.lower {
        Ok(Evaluation::fire(
            Side::Buy,
            format!("现价{:.2}触及布林下轨{:.2}", close, bands.lower),
            indicators,
        ))
    } else {
        Ok(Evaluation::hold(
            format!("现价{:.2}在布林下轨{:.2}上方", close, bands.lower),
            indicators,
        ))
    }
}

pub(crate) fn volume_surge(
    params: &SkillParams,
    closes: &[f64],
    volumes: &[f64],
) -> Result<Evaluation, AppError> {
    let lookback = require_usize(params, "lookback")?;
    let multiplier = require_f64(params, "multiplier")?;
    if lookback == 0 {
        return Err(AppError::InvalidParams("lookback必须大于0".to_string()));
    }
    if volumes.len() < lookback + 1 || closes.len() < 2 {
        return Ok(Evaluation::hold(
            format!("成交量数据不足，需要{}根", lookback + 1),
            json!({ "points": volumes.len(), "need": lookback + 1 }),
        ));
    }
    let current_volume = volumes[0];
    let avg_volume: f64 = volumes[1..=lookback].iter().sum::<f64>() / lookback as f64;
    let indicators = json!({
        "lookback": lookback,
        "multiplier": multiplier,
        "volume": current_volume,
        "avg_volume": avg_volume,
        "close": closes[0],
        "prev_close": closes[1],
    });
    // 前期均量为0时倍数没有意义，不触发
    if avg_volume <= 0.0 {
        return Ok(Evaluation::hold("前期均量为0，无法判断放量", indicators));
    }
    if current_volume < multiplier * avg_volume {
        return Ok(Evaluation::hold(
            format!(
                "成交量{:.0}未达到前{}根均量{:.0}的{:.1}倍",
                current_volume, lookback, avg_volume, multiplier
            ),
            indicators,
        ));
    }
    // 放量但价格走弱的不追
    if closes[0] < closes[1] {
        return Ok(Evaluation::hold("放量但收盘价低于前一根，不触发", indicators));
    }
    Ok(Evaluation::fire(
        Side::Buy,
        format!(
            "成交量{:.0}达到前{}根均量{:.0}的{:.1}倍且价格未跌",
            current_volume, lookback, avg_volume, multiplier
        ),
        indicators,
    ))
}

pub(crate) fn macd_golden_cross(
    params: &SkillParams,
    closes: &[f64],
) -> Result<Evaluation, AppError> {
    let fast = require_usize(params, "fast")?;
    let slow = require_usize(params, "slow")?;
    let signal = require_usize(params, "signal")?;
    let state = match macd_cross(closes, fast, slow, signal) {
        Some(s) => s,
        None => {
            return Ok(Evaluation::hold(
                format!(
                    "K线不足，MACD({},{},{})需要{}根收盘价",
                    fast,
                    slow,
                    signal,
                    slow + signal
                ),
                json!({ "points": closes.len(), "need": slow + signal }),
            ))
        }
    };
    let indicators = json!({
        "fast": fast,
        "slow": slow,
        "signal": signal,
        "dif_prev": state.short_prev,
        "dea_prev": state.long_prev,
        "dif": state.short_now,
        "dea": state.long_now,
        "histogram": state.short_now - state.long_now,
    });
    if state.golden() {
        Ok(Evaluation::fire(
            Side::Buy,
            format!("DIF{:.4}上穿DEA{:.4}", state.short_now, state.long_now),
            indicators,
        ))
    } else {
        Ok(Evaluation::hold("MACD未形成金叉", indicators))
    }
}

pub(crate) fn macd_dead_cross(
    params: &SkillParams,
    closes: &[f64],
) -> Result<Evaluation, AppError> {
    let fast = require_usize(params, "fast")?;
    let slow = require_usize(params, "slow")?;
    let signal = require_usize(params, "signal")?;
    let state = match macd_cross(closes, fast, slow, signal) {
        Some(s) => s,
        None => {
            return Ok(Evaluation::hold(
                format!(
                    "K线不足，MACD({},{},{})需要{}根收盘价",
                    fast,
                    slow,
                    signal,
                    slow + signal
                ),
                json!({ "points": closes.len(), "need": slow + signal }),
            ))
        }
    };
    let indicators = json!({
        "fast": fast,
        "slow": slow,
        "signal": signal,
        "dif_prev": state.short_prev,
        "dea_prev": state.long_prev,
        "dif": state.short_now,
        "dea": state.long_now,
        "histogram": state.short_now - state.long_now,
    });
    if state.dead() {
        Ok(Evaluation::fire(
            Side::Sell,
            format!("DIF{:.4}下穿DEA{:.4}", state.short_now, state.long_now),
            indicators,
        ))
    } else {
        Ok(Evaluation::hold("MACD未形成死叉", indicators))
    }
}

pub(crate) fn stop_loss(params: &SkillParams, closes: &[f64]) -> Result<Evaluation, AppError> {
    let entry_price = require_f64(params, "entry_price")?;
    let stop_percent = require_f64(params, "stop_percent")?;
    let close = match latest_close(closes) {
        Some(c) => c,
        None => return Ok(hold_no_data()),
    };
    let stop_price = entry_price * (1.0 - stop_percent / 100.0);
    let indicators = json!({
        "close": close,
        "entry_price": entry_price,
        "stop_percent": stop_percent,
        "stop_price": stop_price,
    });
    if close <= stop_price {
        Ok(Evaluation::fire(
            Side::Sell,
            format!("现价{:.2}跌破止损线{:.2}", close, stop_price),
            indicators,
        ))
    } else {
        Ok(Evaluation::hold(
            format!("现价{:.2}在止损线{:.2}上方", close, stop_price),
            indicators,
        ))
    }
}

/// 高点取观察序列的最高收盘与买入价中的较大者
pub(crate) fn trailing_stop(params: &SkillParams, closes: &[f64]) -> Result<Evaluation, AppError> {
    let entry_price = require_f64(params, "entry_price")?;
    let trail_percent = require_f64(params, "trail_percent")?;
    let close = match latest_close(closes) {
        Some(c) => c,
        None => return Ok(hold_no_data()),
    };
    let peak = closes.iter().copied().fold(entry_price, f64::max);
    let stop_price = peak * (1.0 - trail_percent / 100.0);
    let indicators = json!({
        "close": close,
        "entry_price": entry_price,
        "trail_percent": trail_percent,
        "peak": peak,
        "stop_price": stop_price,
    });
    if close <= stop_price {
        Ok(Evaluation::fire(
            Side::Sell,
            format!("现价{:.2}自高点{:.2}回撤超过{:.1}%", close, peak, trail_percent),
            indicators,
        ))
    } else {
        Ok(Evaluation::hold(
            format!("现价{:.2}高于移动止损线{:.2}", close, stop_price),
            indicators,
        ))
    }
}

pub(crate) fn profit_target(params: &SkillParams, closes: &[f64]) -> Result<Evaluation, AppError> {
    let entry_price = require_f64(params, "entry_price")?;
    let target_percent = require_f64(params, "target_percent")?;
    let close = match latest_close(closes) {
        Some(c) => c,
        None => return Ok(hold_no_data()),
    };
    let target = entry_price * (1.0 + target_percent / 100.0);
    let indicators = json!({
        "close": close,
        "entry_price": entry_price,
        "target_percent": target_percent,
        "target": target,
    });
    if close >= target {
        Ok(Evaluation::fire(
            Side::Sell,
            format!("现价{:.2}达到止盈线{:.2}", close, target),
            indicators,
        ))
    } else {
        Ok(Evaluation::hold(
            format!("现价{:.2}未到止盈线{:.2}", close, target),
            indicators,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trading::skill::definition::builtin_definitions;
    use crate::trading::skill::SkillCode;
    use serde_json::Value;

    fn params_for(code: SkillCode, raw: Value) -> SkillParams {
        let defs = builtin_definitions();
        let def = defs.iter().find(|d| d.code == code.as_str()).unwrap();
        SkillParams::from_instance(def, &raw.to_string()).unwrap()
    }

    #[test]
    fn test_buy_below_inclusive_boundary() {
        let params = params_for(SkillCode::BuyBelow, json!({ "target_price": 50000.0 }));
        let eval = buy_below(&params, &[50000.0, 50100.0]).unwrap();
        assert!(eval.triggered);
        assert_eq!(eval.side, Some(Side::Buy));

        let eval = buy_below(&params, &[50001.0, 50100.0]).unwrap();
        assert!(!eval.triggered);
        assert!(eval.side.is_none());
    }

    #[test]
    fn test_sell_above_boundary() {
        let params = params_for(SkillCode::SellAbove, json!({ "target_price": 60000.0 }));
        assert!(sell_above(&params, &[60000.0]).unwrap().triggered);
        assert!(!sell_above(&params, &[59999.0]).unwrap().triggered);
    }

    #[test]
    fn test_stop_loss_boundary() {
        // 买入价10000，止损5% => 止损线9500
        let params = params_for(
            SkillCode::StopLoss,
            json!({ "entry_price": 10000.0, "stop_percent": 5.0 }),
        );
        assert!(stop_loss(&params, &[9500.0]).unwrap().triggered);
        assert!(!stop_loss(&params, &[9500.01]).unwrap().triggered);
    }

    #[test]
    fn test_trailing_stop_uses_series_peak() {
        // 买入价10000，序列高点11000，回撤5% => 止损线10450
        let params = params_for(
            SkillCode::TrailingStop,
            json!({ "entry_price": 10000.0, "trail_percent": 5.0 }),
        );
        let eval = trailing_stop(&params, &[10400.0, 11000.0, 10200.0]).unwrap();
        assert!(eval.triggered);
        assert_eq!(eval.indicators["peak"], json!(11000.0));

        // 序列没超过买入价时高点按买入价算
        let eval = trailing_stop(&params, &[9700.0, 9600.0]).unwrap();
        assert!(eval.triggered);
        assert_eq!(eval.indicators["peak"], json!(10000.0));
    }

    #[test]
    fn test_profit_target() {
        let params = params_for(
            SkillCode::ProfitTarget,
            json!({ "entry_price": 10000.0, "target_percent": 10.0 }),
        );
        assert!(profit_target(&params, &[11000.0]).unwrap().triggered);
        assert!(!profit_target(&params, &[10999.0]).unwrap().triggered);
    }

    #[test]
    fn test_volume_surge_guards() {
        let params = params_for(
            SkillCode::VolumeSurge,
            json!({ "lookback": 3, "multiplier": 3.0 }),
        );
        // 量够价涨 -> 触发
        let eval = volume_surge(
            &params,
            &[105.0, 100.0, 101.0, 99.0],
            &[3000.0, 1000.0, 1000.0, 1000.0],
        )
        .unwrap();
        assert!(eval.triggered);

        // 放量但价格走弱 -> 不触发
        let eval = volume_surge(
            &params,
            &[98.0, 100.0, 101.0, 99.0],
            &[3000.0, 1000.0, 1000.0, 1000.0],
        )
        .unwrap();
        assert!(!eval.triggered);

        // 前期均量为0 -> 不触发也不报错
        let eval = volume_surge(
            &params,
            &[105.0, 100.0, 101.0, 99.0],
            &[3000.0, 0.0, 0.0, 0.0],
        )
        .unwrap();
        assert!(!eval.triggered);

        // 数据不足
        let eval = volume_surge(&params, &[105.0, 100.0], &[3000.0, 1000.0]).unwrap();
        assert!(!eval.triggered);
    }

    #[test]
    fn test_rsi_rules_insufficient_is_soft() {
        let params = params_for(SkillCode::RsiOversold, json!({}));
        let eval = rsi_oversold(&params, &[100.0, 101.0]).unwrap();
        assert!(!eval.triggered);
        assert!(eval.rationale.contains("K线不足"));
    }

    #[test]
    fn test_missing_required_param_is_error() {
        // 绕过创建时校验，直接构造缺参数的场景
        let defs = builtin_definitions();
        let def = defs
            .iter()
            .find(|d| d.code == SkillCode::BuyBelow.as_str())
            .unwrap();
        let params = SkillParams::from_instance(def, "{}").unwrap();
        let err = buy_below(&params, &[100.0]).unwrap_err();
        assert!(matches!(err, AppError::InvalidParams(_)));
    }
}
