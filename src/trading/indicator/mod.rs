pub mod bollinger;
pub mod cross;
pub mod ema;
pub mod macd;
pub mod rsi;
pub mod sma;
