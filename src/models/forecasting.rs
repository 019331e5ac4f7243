//! Прогноз чистого дохода на следующий месяц

use std::sync::{Arc, RwLock};
use std::time::Duration;

use chrono::{DateTime, NaiveDate, Utc};
use linfa::traits::{Fit, Predict};
use ndarray::Array1;
use serde::{Deserialize, Serialize};
use tokio::sync::OwnedMutexGuard;
use tracing::{debug, info, warn};

use crate::config::{ForecastConfig, MonthAlignment};
use crate::error::{ForecastError, Result};
use crate::models::forest::{ForestParams, RandomForestRegressor};
use crate::preprocessing::FeatureEngineer;
use crate::storage::{FinanceRepository, ModelStore};
use crate::types::{
    FeatureMonths, FeatureVector, Forecast, MonthlyTotal, Outlook, RecordKind, YearMonth,
};

/// Обученный регрессор и сведения о том, на чем он обучен
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FittedModel {
    pub trained_at: DateTime<Utc>,
    pub n_examples: usize,
    pub feature_names: Vec<String>,
    /// MAE на обучающей выборке
    pub training_mae: f64,
    pub forest: RandomForestRegressor,
}

impl FittedModel {
    pub fn predict(&self, features: &FeatureVector) -> f64 {
        let row = FeatureEngineer::feature_row(features);
        self.forest.predict_one(row.row(0))
    }

    pub fn age(&self, now: DateTime<Utc>) -> chrono::Duration {
        now - self.trained_at
    }

    /// Отклоняет артефакты, которые при прогнозе упадут или соврут
    pub fn validate(&self) -> std::result::Result<(), String> {
        let expected: Vec<String> = FeatureVector::NAMES.iter().map(|s| s.to_string()).collect();
        if self.feature_names != expected {
            return Err(format!(
                "feature names {:?} do not match {:?}",
                self.feature_names, expected
            ));
        }
        if self.forest.n_features() != expected.len() {
            return Err(format!(
                "model expects {} features, not {}",
                self.forest.n_features(),
                expected.len()
            ));
        }
        self.forest.validate()
    }
}

/// Общая неизменяемая ссылка на активную модель
pub type ModelHandle = Arc<FittedModel>;

/// Обучить модель на истории всех пользователей
pub fn fit_from_repository(repo: &dyn FinanceRepository, params: &ForestParams) -> Result<FittedModel> {
    let income = repo.monthly_totals(RecordKind::Income, None)?;
    let expense = repo.monthly_totals(RecordKind::Expense, None)?;
    let savings = repo.monthly_totals(RecordKind::Savings, None)?;

    let examples = FeatureEngineer::training_examples(&income, &expense, &savings);
    if examples.is_empty() {
        return Err(ForecastError::DataInsufficient(format!(
            "{} income, {} expense and {} savings months give no user a second month",
            income.len(),
            expense.len(),
            savings.len()
        )));
    }

    let dataset = FeatureEngineer::to_dataset(&examples)?;
    let forest = params.fit(&dataset)?;

    let fitted: Array1<f64> = forest.predict(&dataset.records);
    let mae = (fitted - &dataset.targets)
        .mapv(|x| x.abs())
        .mean()
        .unwrap_or(0.0);
    info!(
        "Forecast model trained on {} examples ({} trees, depth {}). MAE: {:.2}",
        examples.len(),
        forest.n_trees(),
        forest.max_depth(),
        mae
    );

    Ok(FittedModel {
        trained_at: Utc::now(),
        n_examples: examples.len(),
        feature_names: dataset.feature_names(),
        training_mae: mae,
        forest,
    })
}

/// Доход, расход и накопления пользователя на дату `as_of`.
///
/// Тип без записей дает 0.0; сбой хранилища - ошибка.
pub fn resolve_features(
    repo: &dyn FinanceRepository,
    user_id: &str,
    as_of: NaiveDate,
    alignment: MonthAlignment,
) -> Result<(FeatureVector, FeatureMonths)> {
    let until = YearMonth::from_date(as_of);
    let latest = |kind: RecordKind| repo.latest_monthly_total(kind, user_id, until);
    let income = latest(RecordKind::Income)?;
    let expense = latest(RecordKind::Expense)?;
    let savings = latest(RecordKind::Savings)?;

    let (income, expense, savings) = match alignment {
        MonthAlignment::Independent => (income, expense, savings),
        MonthAlignment::Aligned => {
            let reference = [&income, &expense, &savings]
                .into_iter()
                .flatten()
                .map(|t| t.month)
                .max();
            match reference {
                Some(month) => {
                    let at = |kind: RecordKind| repo.monthly_total(kind, user_id, month);
                    (
                        at(RecordKind::Income)?,
                        at(RecordKind::Expense)?,
                        at(RecordKind::Savings)?,
                    )
                }
                None => (None, None, None),
            }
        }
    };

    let split = |total: Option<MonthlyTotal>| match total {
        Some(t) => (t.amount, Some(t.month)),
        None => (0.0, None),
    };
    let (income, income_month) = split(income);
    let (expense, expense_month) = split(expense);
    let (savings, savings_month) = split(savings);

    Ok((
        FeatureVector {
            income,
            expense,
            savings,
        },
        FeatureMonths {
            income: income_month,
            expense: expense_month,
            savings: savings_month,
        },
    ))
}

pub fn round2(value: f64) -> f64 {
    let rounded = (value * 100.0).round() / 100.0;
    // без -0.0 в ответах
    if rounded == 0.0 {
        0.0
    } else {
        rounded
    }
}

/// Целые суммы с одним знаком (`150.0`), остальные как есть (`75.5`)
pub fn format_amount(value: f64) -> String {
    if value.fract() == 0.0 {
        format!("{:.1}", value)
    } else {
        format!("{}", value)
    }
}

pub fn classify(prediction: f64) -> (Outlook, String) {
    if prediction > 0.0 {
        (
            Outlook::Gain,
            format!("Next month: You will likely gain £{}", format_amount(prediction)),
        )
    } else if prediction < 0.0 {
        (
            Outlook::Loss,
            format!("Next month: You may lose £{}", format_amount(prediction.abs())),
        )
    } else {
        (
            Outlook::Neutral,
            "Next month: Your net earnings will be neutral".to_string(),
        )
    }
}

/// Прогноз по уже найденным признакам
pub fn forecast_from_features(
    model: &FittedModel,
    user_id: &str,
    features: FeatureVector,
    months: FeatureMonths,
) -> Forecast {
    let prediction = round2(model.predict(&features));
    let (outlook, message) = classify(prediction);

    Forecast {
        user_id: user_id.to_string(),
        message,
        prediction,
        outlook,
        income: features.income,
        expense: features.expense,
        savings: features.savings,
        months,
    }
}

#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub model_name: String,
    pub forest: ForestParams,
    pub train_timeout: Duration,
    pub train_on_miss: bool,
    pub alignment: MonthAlignment,
}

impl From<&ForecastConfig> for EngineSettings {
    fn from(config: &ForecastConfig) -> Self {
        Self {
            model_name: config.model_name.clone(),
            forest: config.forest.clone(),
            train_timeout: config.train_timeout(),
            train_on_miss: config.train_on_miss,
            alignment: config.alignment,
        }
    }
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self::from(&ForecastConfig::default())
    }
}

pub struct ForecastEngine {
    repo: Arc<dyn FinanceRepository>,
    store: Arc<dyn ModelStore>,
    settings: EngineSettings,
    current: RwLock<Option<ModelHandle>>,
    // держит блокирующий fit до его завершения, даже после таймаута
    training: Arc<tokio::sync::Mutex<()>>,
}

impl ForecastEngine {
    pub fn new(
        repo: Arc<dyn FinanceRepository>,
        store: Arc<dyn ModelStore>,
        settings: EngineSettings,
    ) -> Self {
        Self {
            repo,
            store,
            settings,
            current: RwLock::new(None),
            training: Arc::new(tokio::sync::Mutex::new(())),
        }
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    /// Активная модель, если есть
    pub fn model(&self) -> Option<ModelHandle> {
        self.current
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    fn install(&self, model: FittedModel) -> ModelHandle {
        let handle = Arc::new(model);
        *self
            .current
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(handle.clone());
        handle
    }

    async fn lock_training(&self) -> OwnedMutexGuard<()> {
        self.training.clone().lock_owned().await
    }

    /// Загрузить сохраненную модель, если в памяти еще нет активной.
    /// `Ok(None)`, когда ничего не сохранено.
    ///
    /// Ждет идущее обучение, поэтому не может затереть более новую модель.
    pub async fn load_saved(&self) -> Result<Option<ModelHandle>> {
        let _guard = self.lock_training().await;
        if let Some(model) = self.model() {
            return Ok(Some(model));
        }
        self.load_saved_locked().await
    }

    async fn load_saved_locked(&self) -> Result<Option<ModelHandle>> {
        let name = self.settings.model_name.clone();
        let store = self.store.clone();
        let loaded = tokio::task::spawn_blocking(move || store.load(&name))
            .await
            .map_err(|e| ForecastError::ModelLoad {
                name: self.settings.model_name.clone(),
                reason: e.to_string(),
            })??;

        Ok(loaded.map(|model| {
            info!(
                "Loaded model '{}' trained at {} on {} examples",
                self.settings.model_name, model.trained_at, model.n_examples
            );
            self.install(model)
        }))
    }

    /// Переобучить на всей истории, сохранить и подменить активную модель
    pub async fn train(&self) -> Result<ModelHandle> {
        let guard = self.lock_training().await;
        self.train_locked(guard).await
    }

    async fn train_locked(&self, guard: OwnedMutexGuard<()>) -> Result<ModelHandle> {
        let repo = self.repo.clone();
        let params = self.settings.forest.clone();
        let timeout = self.settings.train_timeout;

        info!("Training forecast model '{}'", self.settings.model_name);
        // guard живет в задаче: следующее обучение ждет конца этого fit
        let job = tokio::task::spawn_blocking(move || {
            let result = fit_from_repository(repo.as_ref(), &params);
            (result, guard)
        });

        let (model, _guard) = match tokio::time::timeout(timeout, job).await {
            Err(_) => {
                warn!("Training exceeded {:?}, keeping the current model", timeout);
                return Err(ForecastError::TrainingTimeout(timeout));
            }
            Ok(Err(join_error)) => return Err(ForecastError::Training(join_error.to_string())),
            Ok(Ok((result, guard))) => (result?, guard),
        };

        let store = self.store.clone();
        let name = self.settings.model_name.clone();
        let to_save = model.clone();
        tokio::task::spawn_blocking(move || store.save(&name, &to_save))
            .await
            .map_err(|e| ForecastError::ModelSave {
                name: self.settings.model_name.clone(),
                reason: e.to_string(),
            })??;

        Ok(self.install(model))
    }

    /// Активная модель, иначе сохраненная, иначе новое обучение.
    ///
    /// Параллельные вызовы без модели делят один запуск обучения.
    pub async fn ensure_model(&self) -> Result<ModelHandle> {
        if let Some(model) = self.model() {
            return Ok(model);
        }

        let guard = self.lock_training().await;
        // пока ждали, модель мог поставить другой вызов
        if let Some(model) = self.model() {
            return Ok(model);
        }
        if let Some(model) = self.load_saved_locked().await? {
            return Ok(model);
        }
        if !self.settings.train_on_miss {
            return Err(ForecastError::ModelUnavailable);
        }

        warn!(
            "No saved model '{}', training before first prediction",
            self.settings.model_name
        );
        self.train_locked(guard).await
    }

    /// Прогноз чистого дохода `user_id` на следующий месяц по данным до `as_of`
    pub async fn predict(&self, user_id: &str, as_of: NaiveDate) -> Result<Forecast> {
        let (features, months) =
            resolve_features(self.repo.as_ref(), user_id, as_of, self.settings.alignment)?;
        debug!(
            "Features for {} as of {}: income={} expense={} savings={}",
            user_id, as_of, features.income, features.expense, features.savings
        );

        let model = self.ensure_model().await?;
        Ok(forecast_from_features(&model, user_id, features, months))
    }

    pub async fn predict_now(&self, user_id: &str) -> Result<Forecast> {
        self.predict(user_id, Utc::now().date_naive()).await
    }
}
