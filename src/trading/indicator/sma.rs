/// Simple Moving Average over the newest `period` closes.
///
/// 输入序列按时间倒序排列，prices[0]是最新收盘价。
/// 数据不足一个完整周期时返回None，调用方自行决定如何降级。
pub fn sma(prices: &[f64], period: usize) -> Option<f64> {
    if period == 0 || prices.len() < period {
        return None;
    }
    let sum: f64 = prices[..period].iter().sum();
    Some(sum / period as f64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sma_basic() {
        // 最新在前: 3, 2, 1
        let prices = vec![3.0, 2.0, 1.0];
        assert_eq!(sma(&prices, 3), Some(2.0));
        assert_eq!(sma(&prices, 2), Some(2.5));
    }

    #[test]
    fn test_sma_insufficient() {
        let prices = vec![1.0, 2.0];
        assert_eq!(sma(&prices, 3), None);
        assert_eq!(sma(&prices, 0), None);
        assert_eq!(sma(&[], 1), None);
    }
}
