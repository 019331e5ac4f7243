use std::collections::BTreeMap;
use std::sync::RwLock;

use super::{validate_record, FinanceRepository, NewRecord};
use crate::error::StorageError;
use crate::types::{MonthlyTotal, RecordKind, YearMonth};

/// Хранилище записей в памяти процесса
#[derive(Default)]
pub struct InMemoryRepository {
    records: RwLock<Vec<NewRecord>>,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_records(records: Vec<NewRecord>) -> Result<Self, StorageError> {
        let repo = Self::new();
        repo.insert_all(&records)?;
        Ok(repo)
    }

    pub fn len(&self) -> usize {
        self.records.read().map(|r| r.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn grouped(
        &self,
        kind: RecordKind,
        user_id: Option<&str>,
    ) -> Result<BTreeMap<(String, YearMonth), f64>, StorageError> {
        let records = self
            .records
            .read()
            .map_err(|_| StorageError::Unavailable("record lock poisoned".to_string()))?;

        let mut grouped = BTreeMap::new();
        for record in records
            .iter()
            .filter(|r| r.kind == kind)
            .filter(|r| user_id.map_or(true, |u| r.user_id == u))
        {
            *grouped
                .entry((record.user_id.clone(), YearMonth::from_date(record.date.date())))
                .or_insert(0.0) += record.amount;
        }
        Ok(grouped)
    }
}

impl FinanceRepository for InMemoryRepository {
    fn monthly_totals(
        &self,
        kind: RecordKind,
        user_id: Option<&str>,
    ) -> Result<Vec<MonthlyTotal>, StorageError> {
        Ok(self
            .grouped(kind, user_id)?
            .into_iter()
            .map(|((user_id, month), amount)| MonthlyTotal {
                user_id,
                month,
                amount,
            })
            .collect())
    }

    fn latest_monthly_total(
        &self,
        kind: RecordKind,
        user_id: &str,
        until: YearMonth,
    ) -> Result<Option<MonthlyTotal>, StorageError> {
        Ok(self
            .grouped(kind, Some(user_id))?
            .into_iter()
            .filter(|((_, month), _)| *month <= until)
            .last()
            .map(|((user_id, month), amount)| MonthlyTotal {
                user_id,
                month,
                amount,
            }))
    }

    fn insert(&self, record: &NewRecord) -> Result<i64, StorageError> {
        validate_record(record)?;
        let mut records = self
            .records
            .write()
            .map_err(|_| StorageError::Unavailable("record lock poisoned".to_string()))?;
        records.push(record.clone());
        Ok(records.len() as i64)
    }
}
