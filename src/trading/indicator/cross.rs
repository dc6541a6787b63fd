use serde::Serialize;

use crate::trading::indicator::macd::macd_pair;
use crate::trading::indicator::sma::sma;

/// 两条线在最近两根K线上的相对位置，用于交叉判定。
/// short/long 在MACD场景下分别对应DIF与DEA。
#[derive(Debug, Clone, Copy, Serialize)]
pub struct CrossState {
    pub short_prev: f64,
    pub long_prev: f64,
    pub short_now: f64,
    pub long_now: f64,
}

impl CrossState {
    /// 金叉：上一根短线不高于长线，最新一根短线严格高于长线。
    /// 上一根打平视为尚未交叉，翻越当根即触发，保证单次交叉只触发一次。
    pub fn golden(&self) -> bool {
        self.short_prev <= self.long_prev && self.short_now > self.long_now
    }

    /// 死叉：与金叉对称
    pub fn dead(&self) -> bool {
        self.short_prev >= self.long_prev && self.short_now < self.long_now
    }
}

/// 短长周期SMA在最近两根上的取值。任一值算不出来则返回None。
pub fn sma_cross(prices: &[f64], short_period: usize, long_period: usize) -> Option<CrossState> {
    if short_period >= long_period {
        return None;
    }
    let short_now = sma(prices, short_period)?;
    let long_now = sma(prices, long_period)?;
    // 去掉最新一根即得到上一根收盘时的取值
    let short_prev = sma(&prices[1..], short_period)?;
    let long_prev = sma(&prices[1..], long_period)?;
    Some(CrossState {
        short_prev,
        long_prev,
        short_now,
        long_now,
    })
}

/// DIF与DEA在最近两根上的取值
pub fn macd_cross(
    prices: &[f64],
    fast: usize,
    slow: usize,
    signal: usize,
) -> Option<CrossState> {
    let (prev, current) = macd_pair(prices, fast, slow, signal)?;
    Some(CrossState {
        short_prev: prev.macd,
        long_prev: prev.signal,
        short_now: current.macd,
        long_now: current.signal,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_golden_cross_fires_once() {
        // 短均线自下而上穿越长均线：先阴跌筑底，最后一根放量拉起
        // 正序: 10,9,8,7,6,5,4,4,9  短=2 长=4
        // prev: short=(4+4)/2=4.0 <= long=(4+4+5+6)/4=4.75
        // now:  short=(9+4)/2=6.5 >  long=(9+4+4+5)/4=5.5
        let prices = vec![9.0, 4.0, 4.0, 5.0, 6.0, 7.0, 8.0, 9.0, 10.0];
        let state = sma_cross(&prices, 2, 4).unwrap();
        assert!(state.golden());
        assert!(!state.dead());

        // 再涨一根后短线已在长线上方，不应再报金叉
        let mut next = vec![13.0];
        next.extend_from_slice(&prices);
        let state2 = sma_cross(&next, 2, 4).unwrap();
        assert!(!state2.golden());
        assert!(!state2.dead());
    }

    #[test]
    fn test_dead_cross() {
        // 正序: 4,5,6,7,8,9,10,10,5  短=2 长=4
        // prev: short=10.0 >= long=9.25; now: short=7.5 < long=8.5
        let prices = vec![5.0, 10.0, 10.0, 9.0, 8.0, 7.0, 6.0, 5.0, 4.0];
        let state = sma_cross(&prices, 2, 4).unwrap();
        assert!(state.dead());
        assert!(!state.golden());
    }

    #[test]
    fn test_equal_prev_then_rise_counts_as_cross() {
        let state = CrossState {
            short_prev: 5.0,
            long_prev: 5.0,
            short_now: 5.2,
            long_now: 5.0,
        };
        assert!(state.golden());
    }

    #[test]
    fn test_cross_insufficient_history() {
        // 长周期需要prev值，长度必须至少 long+1
        let prices = vec![1.0, 2.0, 3.0, 4.0];
        assert!(sma_cross(&prices, 2, 4).is_none());
        assert!(sma_cross(&prices, 4, 2).is_none());
    }

    #[test]
    fn test_macd_cross_on_v_shape() {
        // 长下跌后急涨，DIF会上穿DEA，扫描路径上至少出现一次金叉
        let mut oldest_first: Vec<f64> = (0..60).map(|i| 200.0 - i as f64).collect();
        for i in 0..30 {
            oldest_first.push(141.0 + (i as f64) * 3.0);
        }
        let mut seen_golden = false;
        for end in 40..=oldest_first.len() {
            let newest_first: Vec<f64> = oldest_first[..end].iter().rev().copied().collect();
            if let Some(state) = macd_cross(&newest_first, 12, 26, 9) {
                if state.golden() {
                    seen_golden = true;
                }
            }
        }
        assert!(seen_golden);
    }
}
