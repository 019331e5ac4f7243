//! Хранилище записей в SQLite с пулом соединений

use std::path::Path;

use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, OptionalExtension};
use tracing::{debug, info};

use super::{validate_record, FinanceRepository, NewRecord, DATETIME_FORMAT};
use crate::error::StorageError;
use crate::types::{MonthlyTotal, RecordKind, YearMonth};

pub type DbPool = Pool<SqliteConnectionManager>;
pub type DbConn = PooledConnection<SqliteConnectionManager>;

#[derive(Clone)]
pub struct SqliteRepository {
    pool: DbPool,
}

impl SqliteRepository {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let manager = SqliteConnectionManager::file(path.as_ref());
        let pool = Pool::builder().max_size(8).build(manager)?;
        let repo = Self { pool };
        repo.run_migrations()?;
        info!("Opened finance database at {}", path.as_ref().display());
        Ok(repo)
    }

    /// Отдельная база в памяти (для тестов)
    ///
    /// Размер пула 1: каждое соединение `:memory:` - отдельная база.
    pub fn in_memory() -> Result<Self, StorageError> {
        let manager = SqliteConnectionManager::memory();
        let pool = Pool::builder().max_size(1).build(manager)?;
        let repo = Self { pool };
        repo.run_migrations()?;
        Ok(repo)
    }

    pub fn conn(&self) -> Result<DbConn, StorageError> {
        Ok(self.pool.get()?)
    }

    fn run_migrations(&self) -> Result<(), StorageError> {
        let conn = self.conn()?;

        conn.execute_batch(
            r#"
            PRAGMA journal_mode = WAL;

            CREATE TABLE IF NOT EXISTS salaries (
                id INTEGER PRIMARY KEY,
                user_id TEXT NOT NULL,
                amount REAL NOT NULL,
                date TEXT NOT NULL,
                description TEXT,
                created_at DATETIME DEFAULT CURRENT_TIMESTAMP
            );

            CREATE INDEX IF NOT EXISTS idx_salaries_user_date ON salaries(user_id, date);

            CREATE TABLE IF NOT EXISTS expenses (
                id INTEGER PRIMARY KEY,
                user_id TEXT NOT NULL,
                amount REAL NOT NULL,
                date TEXT NOT NULL,
                description TEXT,
                category TEXT,
                created_at DATETIME DEFAULT CURRENT_TIMESTAMP
            );

            CREATE INDEX IF NOT EXISTS idx_expenses_user_date ON expenses(user_id, date);

            CREATE TABLE IF NOT EXISTS saving_goals (
                id INTEGER PRIMARY KEY,
                user_id TEXT NOT NULL,
                amount REAL NOT NULL,
                date TEXT NOT NULL,
                description TEXT,
                category TEXT,
                status TEXT DEFAULT 'ongoing',
                created_at DATETIME DEFAULT CURRENT_TIMESTAMP
            );

            CREATE INDEX IF NOT EXISTS idx_saving_goals_user_date ON saving_goals(user_id, date);
            "#,
        )?;

        debug!("Finance schema migrations applied");
        Ok(())
    }

    /// Число строк в таблице для `kind`
    pub fn count(&self, kind: RecordKind) -> Result<i64, StorageError> {
        let conn = self.conn()?;
        let sql = format!("SELECT COUNT(*) FROM {}", kind.table());
        Ok(conn.query_row(&sql, [], |row| row.get(0))?)
    }
}

fn parse_month(raw: &str) -> Result<YearMonth, StorageError> {
    raw.parse()
        .map_err(|e: String| StorageError::InvalidData(format!("bad month '{}': {}", raw, e)))
}

impl FinanceRepository for SqliteRepository {
    fn monthly_totals(
        &self,
        kind: RecordKind,
        user_id: Option<&str>,
    ) -> Result<Vec<MonthlyTotal>, StorageError> {
        let conn = self.conn()?;
        let filter = if user_id.is_some() { "WHERE user_id = ?1" } else { "" };
        let sql = format!(
            r#"
            SELECT user_id, strftime('%Y-%m', date) AS month, SUM(amount)
            FROM {}
            {}
            GROUP BY user_id, month
            ORDER BY user_id, month
            "#,
            kind.table(),
            filter
        );

        let mut stmt = conn.prepare(&sql)?;
        let map_row = |row: &rusqlite::Row<'_>| -> rusqlite::Result<(String, String, f64)> {
            Ok((row.get(0)?, row.get(1)?, row.get(2)?))
        };
        let rows: Vec<(String, String, f64)> = match user_id {
            Some(user) => stmt.query_map(params![user], map_row)?.collect::<rusqlite::Result<_>>()?,
            None => stmt.query_map([], map_row)?.collect::<rusqlite::Result<_>>()?,
        };

        rows.into_iter()
            .map(|(user_id, month, amount)| -> Result<MonthlyTotal, StorageError> {
                Ok(MonthlyTotal {
                    user_id,
                    month: parse_month(&month)?,
                    amount,
                })
            })
            .collect()
    }

    fn latest_monthly_total(
        &self,
        kind: RecordKind,
        user_id: &str,
        until: YearMonth,
    ) -> Result<Option<MonthlyTotal>, StorageError> {
        let conn = self.conn()?;
        let sql = format!(
            r#"
            SELECT strftime('%Y-%m', date) AS month, SUM(amount)
            FROM {}
            WHERE user_id = ?1 AND strftime('%Y-%m', date) <= ?2
            GROUP BY month
            ORDER BY month DESC
            LIMIT 1
            "#,
            kind.table()
        );

        let row: Option<(String, f64)> = conn
            .query_row(&sql, params![user_id, until.to_string()], |row| {
                Ok((row.get(0)?, row.get(1)?))
            })
            .optional()?;

        match row {
            Some((month, amount)) => Ok(Some(MonthlyTotal {
                user_id: user_id.to_string(),
                month: parse_month(&month)?,
                amount,
            })),
            None => Ok(None),
        }
    }

    fn monthly_total(
        &self,
        kind: RecordKind,
        user_id: &str,
        month: YearMonth,
    ) -> Result<Option<MonthlyTotal>, StorageError> {
        let conn = self.conn()?;
        let sql = format!(
            "SELECT SUM(amount) FROM {} WHERE user_id = ?1 AND strftime('%Y-%m', date) = ?2",
            kind.table()
        );
        // SUM по пустому набору дает NULL
        let amount: Option<f64> =
            conn.query_row(&sql, params![user_id, month.to_string()], |row| row.get(0))?;

        Ok(amount.map(|amount| MonthlyTotal {
            user_id: user_id.to_string(),
            month,
            amount,
        }))
    }

    fn insert(&self, record: &NewRecord) -> Result<i64, StorageError> {
        validate_record(record)?;
        let conn = self.conn()?;
        insert_record(&conn, record)?;
        Ok(conn.last_insert_rowid())
    }

    fn insert_all(&self, records: &[NewRecord]) -> Result<usize, StorageError> {
        for record in records {
            validate_record(record)?;
        }

        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        for record in records {
            insert_record(&tx, record)?;
        }
        tx.commit()?;

        info!("Inserted {} records", records.len());
        Ok(records.len())
    }
}

fn insert_record(conn: &rusqlite::Connection, record: &NewRecord) -> Result<(), StorageError> {
    let date = record.date.format(DATETIME_FORMAT).to_string();

    match record.kind {
        RecordKind::Income => conn.execute(
            "INSERT INTO salaries (user_id, amount, date, description) VALUES (?1, ?2, ?3, ?4)",
            params![record.user_id, record.amount, date, record.description],
        )?,
        RecordKind::Expense => conn.execute(
            "INSERT INTO expenses (user_id, amount, date, description, category) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![record.user_id, record.amount, date, record.description, record.category],
        )?,
        RecordKind::Savings => conn.execute(
            "INSERT INTO saving_goals (user_id, amount, date, description, category, status) \
             VALUES (?1, ?2, ?3, ?4, ?5, COALESCE(?6, 'ongoing'))",
            params![
                record.user_id,
                record.amount,
                date,
                record.description,
                record.category,
                record.status
            ],
        )?,
    };

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn at(y: i32, m: u32, d: u32) -> chrono::NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d)
            .unwrap()
            .and_hms_opt(12, 0, 0)
            .unwrap()
    }

    fn ym(s: &str) -> YearMonth {
        s.parse().unwrap()
    }

    #[test]
    fn schema_has_three_tables() {
        let repo = SqliteRepository::in_memory().unwrap();
        for kind in RecordKind::ALL {
            assert_eq!(repo.count(kind).unwrap(), 0);
        }
    }

    #[test]
    fn monthly_totals_group_by_user_and_month() {
        let repo = SqliteRepository::in_memory().unwrap();
        repo.insert_all(&[
            NewRecord::new(RecordKind::Expense, "alice", 20.0, at(2025, 2, 1)),
            NewRecord::new(RecordKind::Expense, "alice", 25.5, at(2025, 2, 28)),
            NewRecord::new(RecordKind::Expense, "alice", 10.0, at(2025, 3, 1)),
            NewRecord::new(RecordKind::Expense, "bob", 99.0, at(2025, 2, 14)),
        ])
        .unwrap();

        let all = repo.monthly_totals(RecordKind::Expense, None).unwrap();
        assert_eq!(all.len(), 3);
        assert_eq!(all[0].user_id, "alice");
        assert_eq!(all[0].month, ym("2025-02"));
        assert_eq!(all[0].amount, 45.5);
        assert_eq!(all[2].user_id, "bob");

        let bob = repo.monthly_totals(RecordKind::Expense, Some("bob")).unwrap();
        assert_eq!(bob.len(), 1);
        assert_eq!(bob[0].amount, 99.0);

        assert!(repo.monthly_totals(RecordKind::Income, None).unwrap().is_empty());
    }

    #[test]
    fn latest_monthly_total_respects_cutoff() {
        let repo = SqliteRepository::in_memory().unwrap();
        repo.insert_all(&[
            NewRecord::new(RecordKind::Income, "alice", 2000.0, at(2025, 1, 10)),
            NewRecord::new(RecordKind::Income, "alice", 2250.0, at(2025, 3, 10)),
            NewRecord::new(RecordKind::Income, "alice", 250.0, at(2025, 3, 20)),
        ])
        .unwrap();

        let latest = repo
            .latest_monthly_total(RecordKind::Income, "alice", ym("2025-12"))
            .unwrap()
            .unwrap();
        assert_eq!(latest.month, ym("2025-03"));
        assert_eq!(latest.amount, 2500.0);

        let earlier = repo
            .latest_monthly_total(RecordKind::Income, "alice", ym("2025-02"))
            .unwrap()
            .unwrap();
        assert_eq!(earlier.month, ym("2025-01"));

        assert!(repo
            .latest_monthly_total(RecordKind::Income, "alice", ym("2024-12"))
            .unwrap()
            .is_none());
        assert!(repo
            .latest_monthly_total(RecordKind::Savings, "alice", ym("2025-12"))
            .unwrap()
            .is_none());
    }

    #[test]
    fn monthly_total_for_exact_month() {
        let repo = SqliteRepository::in_memory().unwrap();
        repo.insert_all(&[
            NewRecord::new(RecordKind::Expense, "alice", 20.0, at(2025, 2, 1)),
            NewRecord::new(RecordKind::Expense, "alice", 5.5, at(2025, 2, 9)),
            NewRecord::new(RecordKind::Expense, "bob", 7.0, at(2025, 2, 9)),
        ])
        .unwrap();

        let feb = repo
            .monthly_total(RecordKind::Expense, "alice", ym("2025-02"))
            .unwrap()
            .unwrap();
        assert_eq!(feb.amount, 25.5);
        assert!(repo
            .monthly_total(RecordKind::Expense, "alice", ym("2025-03"))
            .unwrap()
            .is_none());

        let in_memory = crate::storage::InMemoryRepository::with_records(vec![NewRecord::new(
            RecordKind::Expense,
            "alice",
            25.5,
            at(2025, 2, 3),
        )])
        .unwrap();
        assert_eq!(
            in_memory
                .monthly_total(RecordKind::Expense, "alice", ym("2025-02"))
                .unwrap(),
            Some(feb)
        );
    }

    #[test]
    fn saving_goal_status_defaults_to_ongoing() {
        let repo = SqliteRepository::in_memory().unwrap();
        repo.insert(&NewRecord::new(RecordKind::Savings, "alice", 500.0, at(2025, 2, 1)))
            .unwrap();
        repo.insert(
            &NewRecord::new(RecordKind::Savings, "alice", 650.75, at(2025, 2, 2))
                .with_category("Vacation")
                .with_status("completed"),
        )
        .unwrap();

        let conn = repo.conn().unwrap();
        let statuses: Vec<String> = conn
            .prepare("SELECT status FROM saving_goals ORDER BY id")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .collect::<rusqlite::Result<_>>()
            .unwrap();
        assert_eq!(statuses, vec!["ongoing", "completed"]);
    }

    #[test]
    fn rejects_negative_amounts() {
        let repo = SqliteRepository::in_memory().unwrap();
        let err = repo
            .insert(&NewRecord::new(RecordKind::Expense, "alice", -5.0, at(2025, 2, 1)))
            .unwrap_err();
        assert!(matches!(err, StorageError::InvalidData(_)));
        assert_eq!(repo.count(RecordKind::Expense).unwrap(), 0);
    }

    #[test]
    fn monthly_history_outer_joins() {
        let repo = SqliteRepository::in_memory().unwrap();
        repo.insert_all(&[
            NewRecord::new(RecordKind::Income, "alice", 2000.0, at(2025, 2, 10)),
            NewRecord::new(RecordKind::Expense, "alice", 300.0, at(2025, 3, 5)),
            NewRecord::new(RecordKind::Savings, "alice", 150.0, at(2025, 3, 6)),
        ])
        .unwrap();

        let history = repo.monthly_history(Some("alice")).unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].total_income, 2000.0);
        assert_eq!(history[0].total_expense, 0.0);
        assert_eq!(history[1].total_income, 0.0);
        assert_eq!(history[1].total_savings, 150.0);
    }
}
