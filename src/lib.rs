//! finance-forecast - прогноз чистого дохода на следующий месяц

pub mod config;
pub mod error;
pub mod models;
pub mod preprocessing;
pub mod refresh;
pub mod seed;
pub mod storage;
pub mod types;

pub use config::{ForecastConfig, MonthAlignment};
pub use error::{ForecastError, Result, StorageError};
pub use models::*;
pub use preprocessing::*;
pub use types::*;

// Реэкспорт для удобства
pub use storage::{FileModelStore, FinanceRepository, InMemoryRepository, ModelStore, SqliteRepository};
