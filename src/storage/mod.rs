/// Хранилище записей и артефактов моделей

pub mod artifact;
pub mod memory;
pub mod sqlite;

pub use artifact::{FileModelStore, MemoryModelStore, ModelStore};
pub use memory::InMemoryRepository;
pub use sqlite::SqliteRepository;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::error::StorageError;
use crate::preprocessing::FeatureEngineer;
use crate::types::{MonthlyAggregate, MonthlyTotal, RecordKind, YearMonth};

/// Формат времени в таблицах записей
pub const DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Строка зарплаты, расхода или цели накоплений для вставки
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewRecord {
    pub kind: RecordKind,
    pub user_id: String,
    pub amount: f64,
    pub date: NaiveDateTime,
    pub description: Option<String>,
    pub category: Option<String>,
    pub status: Option<String>, // saving goals only
}

impl NewRecord {
    pub fn new(kind: RecordKind, user_id: impl Into<String>, amount: f64, date: NaiveDateTime) -> Self {
        Self {
            kind,
            user_id: user_id.into(),
            amount,
            date,
            description: None,
            category: None,
            status: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    pub fn with_status(mut self, status: impl Into<String>) -> Self {
        self.status = Some(status.into());
        self
    }
}

/// Чтение таблиц salaries / expenses / saving_goals
pub trait FinanceRepository: Send + Sync {
    /// Суммы по (user, month), упорядоченные по (user, month).
    /// `None` - по всем пользователям.
    fn monthly_totals(
        &self,
        kind: RecordKind,
        user_id: Option<&str>,
    ) -> Result<Vec<MonthlyTotal>, StorageError>;

    /// Последний месяц пользователя не позже `until`, где есть записи
    /// типа `kind`, с суммой
    fn latest_monthly_total(
        &self,
        kind: RecordKind,
        user_id: &str,
        until: YearMonth,
    ) -> Result<Option<MonthlyTotal>, StorageError>;

    fn insert(&self, record: &NewRecord) -> Result<i64, StorageError>;

    /// Сумма ровно за `month`, `None`, если записей в нем нет
    fn monthly_total(
        &self,
        kind: RecordKind,
        user_id: &str,
        month: YearMonth,
    ) -> Result<Option<MonthlyTotal>, StorageError> {
        Ok(self
            .monthly_totals(kind, Some(user_id))?
            .into_iter()
            .find(|t| t.month == month))
    }

    /// Помесячные доход/расход/накопления после outer join
    fn monthly_history(&self, user_id: Option<&str>) -> Result<Vec<MonthlyAggregate>, StorageError> {
        let income = self.monthly_totals(RecordKind::Income, user_id)?;
        let expense = self.monthly_totals(RecordKind::Expense, user_id)?;
        let savings = self.monthly_totals(RecordKind::Savings, user_id)?;
        Ok(FeatureEngineer::merge_monthly(&income, &expense, &savings))
    }

    fn insert_all(&self, records: &[NewRecord]) -> Result<usize, StorageError> {
        for record in records {
            self.insert(record)?;
        }
        Ok(records.len())
    }
}

pub(crate) fn validate_record(record: &NewRecord) -> Result<(), StorageError> {
    if record.user_id.trim().is_empty() {
        return Err(StorageError::InvalidData("user_id must not be empty".to_string()));
    }
    if !record.amount.is_finite() || record.amount < 0.0 {
        return Err(StorageError::InvalidData(format!(
            "amount must be a non-negative number, got {}",
            record.amount
        )));
    }
    Ok(())
}
