//! Фоновое обновление модели
//!
//! Держит активную модель моложе `max_age`, чтобы прогнозам не приходилось
//! ждать обучения. На каждом тике модель переобучается, если ее нет или она
//! устарела; ошибки логируются, прежняя модель продолжает работать.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{error, info};

use crate::config::ForecastConfig;
use crate::error::Result;
use crate::models::forecasting::{FittedModel, ForecastEngine, ModelHandle};

#[derive(Debug, Clone)]
pub struct RefreshPolicy {
    pub interval: Duration,
    pub max_age: chrono::Duration,
}

impl From<&ForecastConfig> for RefreshPolicy {
    fn from(config: &ForecastConfig) -> Self {
        Self {
            interval: config.refresh_interval(),
            max_age: config.max_model_age(),
        }
    }
}

impl RefreshPolicy {
    pub fn is_stale(&self, model: Option<&FittedModel>, now: DateTime<Utc>) -> bool {
        model.map_or(true, |m| m.age(now) >= self.max_age)
    }
}

#[derive(Debug, Clone)]
pub enum RefreshOutcome {
    Fresh(ModelHandle),
    Retrained(ModelHandle),
}

/// Одно решение об обновлении на момент `now`
pub async fn refresh_once(
    engine: &ForecastEngine,
    policy: &RefreshPolicy,
    now: DateTime<Utc>,
) -> Result<RefreshOutcome> {
    let current = match engine.model() {
        Some(model) => Some(model),
        None => engine.load_saved().await?,
    };

    match current {
        Some(model) if !policy.is_stale(Some(&model), now) => Ok(RefreshOutcome::Fresh(model)),
        _ => engine.train().await.map(RefreshOutcome::Retrained),
    }
}

/// Запустить цикл обновления. Первый тик срабатывает сразу.
pub fn start_refresh_task(engine: Arc<ForecastEngine>, policy: RefreshPolicy) -> JoinHandle<()> {
    info!(
        "Starting model refresh: every {:?}, max model age {}h",
        policy.interval,
        policy.max_age.num_hours()
    );

    tokio::spawn(async move {
        let mut ticker = interval(policy.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;

            match refresh_once(&engine, &policy, Utc::now()).await {
                Ok(RefreshOutcome::Fresh(model)) => {
                    info!("Model is fresh (trained at {})", model.trained_at);
                }
                Ok(RefreshOutcome::Retrained(model)) => {
                    info!(
                        "Model refreshed on {} examples. MAE: {:.2}",
                        model.n_examples, model.training_mae
                    );
                }
                Err(e) => {
                    error!("Model refresh failed: {}", e);
                }
            }
        }
    })
}
