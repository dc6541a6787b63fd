use std::collections::HashSet;
use std::time::Duration;

use serde::Serialize;
use tracing::info;

use crate::app_config::env::env_u64;
use crate::error::AppError;
use crate::trading::market::PriceHistoryProvider;
use crate::trading::model::execution::stop_watch::StopWatchModel;
use crate::trading::services::stop_watch_service::StopWatchService;

#[derive(Debug, Clone, Serialize)]
pub struct StopSweepItem {
    pub watch_id: String,
    pub inst_id: String,
    pub triggered: bool,
    pub note: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct StopSweepReport {
    pub checked: usize,
    pub triggered: usize,
    pub results: Vec<StopSweepItem>,
}

/// 扫描全部active监控单。最新价一轮只批量拉一次，
/// 发过卖单的条目之间睡SWEEP_ITEM_DELAY_MS
pub async fn check_all_watches(
    provider: &dyn PriceHistoryProvider,
) -> Result<StopSweepReport, AppError> {
    let service = StopWatchService::from_env()?;
    let model = StopWatchModel::new().await;
    let watches = model.list_active().await?;
    if watches.is_empty() {
        return Ok(StopSweepReport {
            checked: 0,
            triggered: 0,
            results: Vec::new(),
        });
    }

    let mut inst_ids: Vec<String> = Vec::new();
    let mut seen = HashSet::new();
    for watch in &watches {
        if seen.insert(watch.inst_id.clone()) {
            inst_ids.push(watch.inst_id.clone());
        }
    }
    // 批量行情整体失败就没有可用价格，这一轮直接放弃
    let latest = provider.fetch_latest(&inst_ids).await?;

    let delay = Duration::from_millis(env_u64("SWEEP_ITEM_DELAY_MS", 300));
    let mut results = Vec::with_capacity(watches.len());
    let mut triggered = 0usize;
    for watch in &watches {
        let price = match latest.get(&watch.inst_id) {
            Some(p) => *p,
            None => {
                results.push(StopSweepItem {
                    watch_id: watch.id.clone(),
                    inst_id: watch.inst_id.clone(),
                    triggered: false,
                    note: "无最新价，跳过".to_string(),
                });
                continue;
            }
        };
        match service.process_watch(watch, price).await {
            Ok(outcome) => {
                if outcome.triggered {
                    triggered += 1;
                    tokio::time::sleep(delay).await;
                }
                results.push(StopSweepItem {
                    watch_id: watch.id.clone(),
                    inst_id: watch.inst_id.clone(),
                    triggered: outcome.triggered,
                    note: outcome.detail,
                });
            }
            Err(e) => {
                results.push(StopSweepItem {
                    watch_id: watch.id.clone(),
                    inst_id: watch.inst_id.clone(),
                    triggered: false,
                    note: e.to_string(),
                });
            }
        }
    }
    info!("止损扫描完成 checked:{} triggered:{}", watches.len(), triggered);
    Ok(StopSweepReport {
        checked: watches.len(),
        triggered,
        results,
    })
}
