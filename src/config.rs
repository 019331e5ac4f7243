//! Конфигурация
//!
//! Читается из необязательного TOML файла, затем переопределяется
//! переменными окружения `FORECAST_*`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ForecastError, Result};
use crate::models::forest::ForestParams;

/// Сто лет, верхняя граница для `max_model_age_hours`
pub const MAX_MODEL_AGE_HOURS: u64 = 24 * 365 * 100;

/// Из какого месяца берется каждый признак прогноза
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MonthAlignment {
    /// Доход, расход и накопления берутся каждый из своего последнего месяца
    Independent,
    /// Все три из последнего месяца, где есть хоть одна запись
    #[default]
    Aligned,
}

impl std::str::FromStr for MonthAlignment {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "independent" => Ok(MonthAlignment::Independent),
            "aligned" => Ok(MonthAlignment::Aligned),
            other => Err(format!("unknown month alignment '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ForecastConfig {
    pub database_path: PathBuf,
    pub model_dir: PathBuf,
    pub model_name: String,
    pub forest: ForestParams,
    pub train_timeout_secs: u64,
    /// Обучать синхронно, если при прогнозе модели нет
    pub train_on_miss: bool,
    pub alignment: MonthAlignment,
    pub refresh_interval_secs: u64,
    pub max_model_age_hours: u64,
}

impl Default for ForecastConfig {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from("finance.db"),
            model_dir: PathBuf::from("models"),
            model_name: "next_month_net_predictor".to_string(),
            forest: ForestParams::default(),
            train_timeout_secs: 120,
            train_on_miss: true,
            alignment: MonthAlignment::default(),
            refresh_interval_secs: 3600,
            max_model_age_hours: 24,
        }
    }
}

impl ForecastConfig {
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        toml::from_str(raw).map_err(|e| ForecastError::Config(e.to_string()))
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| ForecastError::Config(format!("{}: {}", path.display(), e)))?;
        Self::from_toml_str(&raw)
    }

    /// Файл (если задан) плюс окружение процесса
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let base = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        base.with_env(|key| std::env::var(key).ok())
    }

    /// Применить переопределения `FORECAST_*` из `lookup`
    pub fn with_env<F>(mut self, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("FORECAST_DB_PATH") {
            self.database_path = PathBuf::from(v);
        }
        if let Some(v) = lookup("FORECAST_MODEL_DIR") {
            self.model_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("FORECAST_MODEL_NAME") {
            self.model_name = v;
        }
        if let Some(v) = lookup("FORECAST_SEED") {
            self.forest.seed = parse_var("FORECAST_SEED", &v)?;
        }
        if let Some(v) = lookup("FORECAST_TRAIN_TIMEOUT_SECS") {
            self.train_timeout_secs = parse_var("FORECAST_TRAIN_TIMEOUT_SECS", &v)?;
        }
        if let Some(v) = lookup("FORECAST_ALIGNMENT") {
            self.alignment = v.parse().map_err(ForecastError::Config)?;
        }
        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> Result<()> {
        if self.model_name.is_empty()
            || self
                .model_name
                .chars()
                .any(|c| !(c.is_ascii_alphanumeric() || c == '_' || c == '-'))
        {
            return Err(ForecastError::Config(format!(
                "model_name '{}' may only contain letters, digits, '_' and '-'",
                self.model_name
            )));
        }
        if self.refresh_interval_secs == 0 {
            return Err(ForecastError::Config(
                "refresh_interval_secs must be positive".to_string(),
            ));
        }
        if self.max_model_age_hours > MAX_MODEL_AGE_HOURS {
            return Err(ForecastError::Config(format!(
                "max_model_age_hours must be at most {}",
                MAX_MODEL_AGE_HOURS
            )));
        }
        if self.train_timeout_secs == 0 {
            return Err(ForecastError::Config(
                "train_timeout_secs must be positive".to_string(),
            ));
        }
        Ok(())
    }

    pub fn train_timeout(&self) -> Duration {
        Duration::from_secs(self.train_timeout_secs)
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_secs)
    }

    pub fn max_model_age(&self) -> chrono::Duration {
        chrono::Duration::hours(self.max_model_age_hours.min(MAX_MODEL_AGE_HOURS) as i64)
    }
}

fn parse_var<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| ForecastError::Config(format!("{} has invalid value '{}'", key, value)))
}
