//! Типы ошибок

use std::time::Duration;

use thiserror::Error;

/// Ошибки хранилища записей
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Database pool error: {0}")]
    Pool(#[from] r2d2::Error),

    #[error("Invalid data: {0}")]
    InvalidData(String),

    #[error("Storage unavailable: {0}")]
    Unavailable(String),
}

#[derive(Error, Debug)]
pub enum ForecastError {
    /// Нет размеченных строк для обучения
    #[error("Insufficient training data: {0}")]
    DataInsufficient(String),

    #[error("Financial data unavailable: {0}")]
    DataUnavailable(#[from] StorageError),

    #[error("Failed to load model '{name}': {reason}")]
    ModelLoad { name: String, reason: String },

    #[error("Failed to save model '{name}': {reason}")]
    ModelSave { name: String, reason: String },

    #[error("No trained model available")]
    ModelUnavailable,

    #[error("Training did not finish within {0:?}")]
    TrainingTimeout(Duration),

    #[error("Training error: {0}")]
    Training(String),

    #[error("Dataset error: {0}")]
    Dataset(#[from] linfa::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, ForecastError>;
