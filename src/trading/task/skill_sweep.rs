use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::info;

use crate::app_config::env::env_u64;
use crate::error::AppError;
use crate::trading::market::{PriceHistoryProvider, PricePoint};
use crate::trading::model::skill::skill_instance::SkillInstanceModel;
use crate::trading::services::skill_instance_service::SkillInstanceService;
use crate::trading::skill::registry::SkillRegistry;

#[derive(Debug, Clone, Serialize)]
pub struct SweepItem {
    pub instance_id: String,
    pub skill_code: String,
    pub inst_id: Option<String>,
    pub triggered: bool,
    pub note: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct SweepReport {
    pub total: usize,
    pub triggered_count: usize,
    pub results: Vec<SweepItem>,
}

#[derive(Default)]
struct CacheState {
    fetched_any: bool,
    series: HashMap<String, Result<Vec<PricePoint>, AppError>>,
}

/// 同一标的常挂着多个实例，扫描时按标的缓存历史K线，
/// 相邻两次真实拉取之间睡SWEEP_ITEM_DELAY_MS，失败结果同样缓存
pub struct CachingProvider<'a> {
    inner: &'a dyn PriceHistoryProvider,
    delay: Duration,
    state: Mutex<CacheState>,
}

impl<'a> CachingProvider<'a> {
    pub fn new(inner: &'a dyn PriceHistoryProvider) -> CachingProvider<'a> {
        CachingProvider {
            inner,
            delay: Duration::from_millis(env_u64("SWEEP_ITEM_DELAY_MS", 300)),
            state: Mutex::new(CacheState::default()),
        }
    }
}

#[async_trait]
impl<'a> PriceHistoryProvider for CachingProvider<'a> {
    async fn fetch_history(
        &self,
        inst_id: &str,
        max_points: usize,
    ) -> Result<Vec<PricePoint>, AppError> {
        // 锁覆盖限速和拉取，同一标的只打一次上游
        let mut state = self.state.lock().await;
        if let Some(cached) = state.series.get(inst_id) {
            return cached.clone();
        }
        if state.fetched_any {
            tokio::time::sleep(self.delay).await;
        }
        let fetched = self.inner.fetch_history(inst_id, max_points).await;
        state.fetched_any = true;
        state.series.insert(inst_id.to_string(), fetched.clone());
        fetched
    }

    async fn fetch_latest(&self, inst_ids: &[String]) -> Result<HashMap<String, f64>, AppError> {
        self.inner.fetch_latest(inst_ids).await
    }
}

/// 扫描全部active实例并逐个评估，优先级高的先查。
/// 单个实例失败只记入结果，不中断整轮
pub async fn check_all_instances(
    provider: &dyn PriceHistoryProvider,
    registry: Arc<SkillRegistry>,
) -> Result<SweepReport, AppError> {
    let service = SkillInstanceService::new(registry)?;
    let model = SkillInstanceModel::new().await;
    let instances = model.list_active().await?;
    let caching = CachingProvider::new(provider);

    let mut results = Vec::with_capacity(instances.len());
    let mut triggered_count = 0usize;
    for instance in &instances {
        let item = match service.check(&caching, &instance.id).await {
            Ok(outcome) => {
                if outcome.triggered {
                    triggered_count += 1;
                }
                SweepItem {
                    instance_id: instance.id.clone(),
                    skill_code: instance.skill_code.clone(),
                    inst_id: instance.inst_id.clone(),
                    triggered: outcome.triggered,
                    note: outcome.detail,
                }
            }
            Err(AppError::InvalidStatus { .. }) => SweepItem {
                instance_id: instance.id.clone(),
                skill_code: instance.skill_code.clone(),
                inst_id: instance.inst_id.clone(),
                triggered: false,
                note: "已被并发处理，跳过".to_string(),
            },
            Err(e) => SweepItem {
                instance_id: instance.id.clone(),
                skill_code: instance.skill_code.clone(),
                inst_id: instance.inst_id.clone(),
                triggered: false,
                note: e.to_string(),
            },
        };
        results.push(item);
    }
    info!(
        "技能扫描完成 total:{} triggered:{}",
        instances.len(),
        triggered_count
    );
    Ok(SweepReport {
        total: instances.len(),
        triggered_count,
        results,
    })
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    struct CountingProvider {
        calls: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl PriceHistoryProvider for CountingProvider {
        async fn fetch_history(
            &self,
            _inst_id: &str,
            _max_points: usize,
        ) -> Result<Vec<PricePoint>, AppError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(AppError::Market("模拟故障".to_string()));
            }
            Ok(vec![PricePoint {
                ts: 1,
                close: 10.0,
                volume: 1.0,
            }])
        }

        async fn fetch_latest(
            &self,
            _inst_ids: &[String],
        ) -> Result<HashMap<String, f64>, AppError> {
            Ok(HashMap::new())
        }
    }

    fn no_delay(inner: &dyn PriceHistoryProvider) -> CachingProvider<'_> {
        CachingProvider {
            inner,
            delay: Duration::from_millis(0),
            state: Mutex::new(CacheState::default()),
        }
    }

    #[tokio::test]
    async fn test_caching_provider_fetches_once_per_inst() {
        let inner = CountingProvider {
            calls: AtomicUsize::new(0),
            fail: false,
        };
        let caching = no_delay(&inner);
        caching.fetch_history("005930", 100).await.unwrap();
        caching.fetch_history("005930", 100).await.unwrap();
        caching.fetch_history("000660", 100).await.unwrap();
        caching.fetch_history("005930", 100).await.unwrap();
        assert_eq!(inner.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_caching_provider_caches_failures() {
        let inner = CountingProvider {
            calls: AtomicUsize::new(0),
            fail: true,
        };
        let caching = no_delay(&inner);
        assert!(caching.fetch_history("005930", 100).await.is_err());
        assert!(caching.fetch_history("005930", 100).await.is_err());
        assert_eq!(inner.calls.load(Ordering::SeqCst), 1);
    }
}
