use serde::Serialize;

use crate::trading::indicator::ema::ema_walk_oldest_first;

#[derive(Debug, Clone, Copy, Serialize)]
pub struct MacdValue {
    pub macd: f64,
    pub signal: f64,
    pub histogram: f64,
}

/// MACD最新一根的值。参数约定同 `macd_pair`。
pub fn macd(prices: &[f64], fast: usize, slow: usize, signal: usize) -> Option<MacdValue> {
    macd_pair(prices, fast, slow, signal).map(|(_, current)| current)
}

/// 返回(上一根, 最新一根)的MACD值，用于金叉死叉判定。
///
/// 输入序列按时间倒序排列。整条序列做一次正序递推：
/// 快慢EMA相减得DIF，再对DIF做signal周期的EMA得DEA。
/// 序列长度不足 slow+signal 时视为数据不足，返回None。
pub fn macd_pair(
    prices: &[f64],
    fast: usize,
    slow: usize,
    signal: usize,
) -> Option<(MacdValue, MacdValue)> {
    if fast == 0 || signal == 0 || slow <= fast {
        return None;
    }
    if prices.len() < slow + signal {
        return None;
    }
    let oldest_first: Vec<f64> = prices.iter().rev().copied().collect();

    let fast_walk = ema_walk_oldest_first(&oldest_first, fast)?;
    let slow_walk = ema_walk_oldest_first(&oldest_first, slow)?;

    // 快线从第fast根起有值，与慢线对齐后得到DIF序列
    let offset = slow - fast;
    let macd_line: Vec<f64> = slow_walk
        .iter()
        .enumerate()
        .map(|(j, slow_v)| fast_walk[j + offset] - slow_v)
        .collect();

    let signal_walk = ema_walk_oldest_first(&macd_line, signal)?;
    if signal_walk.len() < 2 {
        return None;
    }

    let cur_idx = signal_walk.len() - 1;
    let make = |idx: usize| {
        let macd_v = macd_line[signal - 1 + idx];
        let signal_v = signal_walk[idx];
        MacdValue {
            macd: macd_v,
            signal: signal_v,
            histogram: macd_v - signal_v,
        }
    };
    Some((make(cur_idx - 1), make(cur_idx)))
}
