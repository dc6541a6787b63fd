use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::AppError;

pub mod http_provider;

/// 单根K线的收盘快照，序列一律按时间倒序传递，下标0是最新一根
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PricePoint {
    pub ts: i64,
    pub close: f64,
    pub volume: f64,
}

/// 行情读取抽象。实现方负责把上游数据整理成倒序干净序列，
/// 技能评估只依赖这个trait，测试时用内存桩替换。
#[async_trait]
pub trait PriceHistoryProvider: Send + Sync {
    /// 拉取单个标的最近max_points根日K，倒序返回
    async fn fetch_history(&self, inst_id: &str, max_points: usize)
        -> Result<Vec<PricePoint>, AppError>;

    /// 批量拉取最新价，一次上游调用。缺失标的不在结果里出现
    async fn fetch_latest(&self, inst_ids: &[String]) -> Result<HashMap<String, f64>, AppError>;
}

pub fn closes(series: &[PricePoint]) -> Vec<f64> {
    series.iter().map(|p| p.close).collect()
}

pub fn volumes(series: &[PricePoint]) -> Vec<f64> {
    series.iter().map(|p| p.volume).collect()
}
