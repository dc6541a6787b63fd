/// Relative Strength Index over simple averages (Cutler's RSI).
///
/// 输入序列按时间倒序排列。取最新的 period+1 根收盘价，按时间正序
/// 求 period 个差分，涨跌分别求简单平均后代入 RSI 公式。
/// 全程下跌时avg_gain为0，RSI=0；全程上涨时avg_loss为0，RSI=100。
pub fn rsi(prices: &[f64], period: usize) -> Option<f64> {
    if period == 0 || prices.len() < period + 1 {
        return None;
    }
    let mut gain = 0.0;
    let mut loss = 0.0;
    // window[i]比window[i+1]更新，差分按时间正序是 window[i] - window[i+1]
    for w in prices[..period + 1].windows(2) {
        let delta = w[0] - w[1];
        if delta >= 0.0 {
            gain += delta;
        } else {
            loss -= delta;
        }
    }
    let avg_gain = gain / period as f64;
    let avg_loss = loss / period as f64;
    if avg_loss == 0.0 {
        return Some(100.0);
    }
    let rs = avg_gain / avg_loss;
    Some(100.0 - 100.0 / (1.0 + rs))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rsi_all_up_is_100() {
        // 倒序序列，价格一路上涨
        let prices: Vec<f64> = (1..=20).rev().map(|x| x as f64).collect();
        assert_eq!(rsi(&prices, 14), Some(100.0));
    }

    #[test]
    fn test_rsi_all_down_is_0() {
        let prices: Vec<f64> = (1..=20).map(|x| x as f64).collect();
        assert_eq!(rsi(&prices, 14), Some(0.0));
    }

    #[test]
    fn test_rsi_insufficient() {
        let prices = vec![1.0; 14];
        assert_eq!(rsi(&prices, 14), None);
    }

    #[test]
    fn test_rsi_known_value() {
        // 正序走势 1,2,3,2,3 -> 差分 +1,+1,-1,+1
        // avg_gain = 3/4, avg_loss = 1/4, rs = 3, RSI = 75
        let prices = vec![3.0, 2.0, 3.0, 2.0, 1.0];
        let v = rsi(&prices, 4).unwrap();
        assert!((v - 75.0).abs() < 1e-9);
    }
}
