use serde::Serialize;

#[derive(Debug, Clone, Copy, Serialize)]
pub struct BollingerValue {
    pub upper: f64,
    pub middle: f64,
    pub lower: f64,
}

/// Bollinger Bands over the newest `period` closes.
///
/// 中轨为SMA，上下轨为中轨±k倍总体标准差(除以period而不是period-1)。
pub fn bollinger(prices: &[f64], period: usize, k: f64) -> Option<BollingerValue> {
    if period == 0 || prices.len() < period {
        return None;
    }
    let window = &prices[..period];
    let mean = window.iter().sum::<f64>() / period as f64;
    let variance = window.iter().map(|p| (p - mean) * (p - mean)).sum::<f64>() / period as f64;
    let sd = variance.sqrt();
    Some(BollingerValue {
        upper: mean + k * sd,
        middle: mean,
        lower: mean - k * sd,
    })
}
