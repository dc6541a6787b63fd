/// Exponential Moving Average, TradingView-style seeding.
///
/// 输入序列按时间倒序排列。以最旧的 `period` 根收盘价的SMA做种子，
/// 再按时间正序用平滑系数 k = 2/(period+1) 逐根递推到最新一根。
/// 数据不足时返回None。
pub fn ema(prices: &[f64], period: usize) -> Option<f64> {
    if period == 0 || prices.len() < period {
        return None;
    }
    let k = 2.0 / (period as f64 + 1.0);
    let seed_start = prices.len() - period;
    let seed: f64 = prices[seed_start..].iter().sum::<f64>() / period as f64;

    // 剩余部分从旧到新递推
    let mut value = seed;
    for price in prices[..seed_start].iter().rev() {
        value = price * k + value * (1.0 - k);
    }
    Some(value)
}

/// 按时间正序(最旧在前)输出EMA序列，下标0对应第 `period` 根K线。
/// MACD需要整条序列来推导信号线。
pub(crate) fn ema_walk_oldest_first(values: &[f64], period: usize) -> Option<Vec<f64>> {
    if period == 0 || values.len() < period {
        return None;
    }
    let k = 2.0 / (period as f64 + 1.0);
    let seed: f64 = values[..period].iter().sum::<f64>() / period as f64;
    let mut out = Vec::with_capacity(values.len() - period + 1);
    out.push(seed);
    let mut value = seed;
    for price in &values[period..] {
        value = price * k + value * (1.0 - k);
        out.push(value);
    }
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ema_constant_series() {
        let prices = vec![7.5; 30];
        let v = ema(&prices, 12).unwrap();
        assert!((v - 7.5).abs() < 1e-9);
    }

    #[test]
    fn test_ema_insufficient() {
        assert_eq!(ema(&[1.0, 2.0], 3), None);
        assert_eq!(ema(&[], 1), None);
    }

    #[test]
    fn test_ema_seed_then_recurse() {
        // 倒序: 最新4.0, 最旧[3.0,2.0,1.0]做种子
        let prices = vec![4.0, 3.0, 2.0, 1.0];
        // seed = (3+2+1)/3 = 2.0, k = 0.5
        // 下一根(最新) = 4*0.5 + 2*0.5 = 3.0
        assert_eq!(ema(&prices, 3), Some(3.0));
    }

    #[test]
    fn test_ema_walk_matches_point_value() {
        let prices: Vec<f64> = (1..=40).map(|x| x as f64).collect();
        let newest_first: Vec<f64> = prices.iter().rev().copied().collect();
        let walk = ema_walk_oldest_first(&prices, 10).unwrap();
        let point = ema(&newest_first, 10).unwrap();
        assert!((walk.last().unwrap() - point).abs() < 1e-9);
    }
}
