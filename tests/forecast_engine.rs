//! Сквозные тесты движка прогнозирования

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{NaiveDate, NaiveDateTime};

use finance_forecast::models::forecasting::{fit_from_repository, EngineSettings, ForecastEngine};
use finance_forecast::storage::{MemoryModelStore, NewRecord};
use finance_forecast::{
    FileModelStore, FinanceRepository, ForecastError, InMemoryRepository, ModelStore,
    MonthlyTotal, Outlook, RecordKind, SqliteRepository, StorageError, YearMonth,
};

fn at(y: i32, m: u32, d: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(y, m, d)
        .unwrap()
        .and_hms_opt(12, 0, 0)
        .unwrap()
}

fn day(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

fn history() -> Vec<NewRecord> {
    let mut records = Vec::new();
    for (month, income, expense, savings) in [
        (1, 2000.0, 350.0, 500.0),
        (2, 2250.0, 2600.0, 651.5),
        (3, 2500.0, 410.0, 0.0),
        (4, 2000.0, 120.0, 802.25),
    ] {
        records.push(NewRecord::new(RecordKind::Income, "alice", income, at(2025, month, 10)));
        records.push(NewRecord::new(RecordKind::Expense, "alice", expense, at(2025, month, 15)));
        if savings > 0.0 {
            records.push(NewRecord::new(RecordKind::Savings, "alice", savings, at(2025, month, 20)));
        }
    }
    records.push(NewRecord::new(RecordKind::Income, "bob", 3100.0, at(2025, 2, 1)));
    records.push(NewRecord::new(RecordKind::Expense, "bob", 900.0, at(2025, 3, 1)));
    records
}

fn small_settings() -> EngineSettings {
    let mut settings = EngineSettings::default();
    settings.forest.n_trees = 20;
    settings
}

/// Считает полные сканы для обучения и замедляет их
struct CountingRepository {
    inner: InMemoryRepository,
    scans: AtomicUsize,
    active: AtomicUsize,
    peak: AtomicUsize,
    scan_delay: Duration,
}

impl CountingRepository {
    fn new(records: Vec<NewRecord>, scan_delay: Duration) -> Self {
        Self {
            inner: InMemoryRepository::with_records(records).unwrap(),
            scans: AtomicUsize::new(0),
            active: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
            scan_delay,
        }
    }

    fn scans(&self) -> usize {
        self.scans.load(Ordering::SeqCst)
    }

    /// Максимум одновременных сканов
    fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

impl FinanceRepository for CountingRepository {
    fn monthly_totals(
        &self,
        kind: RecordKind,
        user_id: Option<&str>,
    ) -> Result<Vec<MonthlyTotal>, StorageError> {
        if kind == RecordKind::Income && user_id.is_none() {
            self.scans.fetch_add(1, Ordering::SeqCst);
            let running = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(running, Ordering::SeqCst);
            std::thread::sleep(self.scan_delay);
            self.active.fetch_sub(1, Ordering::SeqCst);
        }
        self.inner.monthly_totals(kind, user_id)
    }

    fn latest_monthly_total(
        &self,
        kind: RecordKind,
        user_id: &str,
        until: YearMonth,
    ) -> Result<Option<MonthlyTotal>, StorageError> {
        self.inner.latest_monthly_total(kind, user_id, until)
    }

    fn insert(&self, record: &NewRecord) -> Result<i64, StorageError> {
        self.inner.insert(record)
    }
}

struct UnavailableRepository;

impl FinanceRepository for UnavailableRepository {
    fn monthly_totals(&self, _: RecordKind, _: Option<&str>) -> Result<Vec<MonthlyTotal>, StorageError> {
        Err(StorageError::Unavailable("connection refused".to_string()))
    }

    fn latest_monthly_total(
        &self,
        _: RecordKind,
        _: &str,
        _: YearMonth,
    ) -> Result<Option<MonthlyTotal>, StorageError> {
        Err(StorageError::Unavailable("connection refused".to_string()))
    }

    fn insert(&self, _: &NewRecord) -> Result<i64, StorageError> {
        Err(StorageError::Unavailable("connection refused".to_string()))
    }
}

fn memory_engine(records: Vec<NewRecord>) -> ForecastEngine {
    ForecastEngine::new(
        Arc::new(InMemoryRepository::with_records(records).unwrap()),
        Arc::new(MemoryModelStore::new()),
        small_settings(),
    )
}

#[tokio::test]
async fn trained_model_predicts_finite_for_first_month() {
    let engine = memory_engine(history());
    let model = engine.train().await.unwrap();
    // у alice три размеченных месяца, у bob один
    assert_eq!(model.n_examples, 4);

    let forecast = engine.predict("alice", day(2025, 1, 31)).await.unwrap();
    assert_eq!(forecast.income, 2000.0);
    assert_eq!(forecast.expense, 350.0);
    assert_eq!(forecast.savings, 500.0);
    assert!(forecast.prediction.is_finite());
}

#[tokio::test]
async fn single_month_of_history_is_insufficient() {
    let store = Arc::new(MemoryModelStore::new());
    let engine = ForecastEngine::new(
        Arc::new(
            InMemoryRepository::with_records(vec![
                NewRecord::new(RecordKind::Income, "alice", 2000.0, at(2025, 3, 1)),
                NewRecord::new(RecordKind::Expense, "alice", 80.0, at(2025, 3, 9)),
            ])
            .unwrap(),
        ),
        store.clone(),
        small_settings(),
    );

    assert!(matches!(
        engine.train().await,
        Err(ForecastError::DataInsufficient(_))
    ));
    assert!(engine.model().is_none());
    assert!(!store.contains("next_month_net_predictor"));
}

#[tokio::test]
async fn empty_database_is_insufficient() {
    let engine = memory_engine(Vec::new());
    assert!(matches!(
        engine.predict("alice", day(2025, 3, 1)).await,
        Err(ForecastError::DataInsufficient(_))
    ));
}

#[tokio::test]
async fn unknown_user_gets_zero_features_and_a_prediction() {
    let engine = memory_engine(history());
    let forecast = engine.predict("nobody", day(2025, 6, 1)).await.unwrap();
    assert_eq!(
        (forecast.income, forecast.expense, forecast.savings),
        (0.0, 0.0, 0.0)
    );
    assert!(forecast.prediction.is_finite());
    assert!(forecast.months.income.is_none());
}

#[tokio::test]
async fn predictions_are_rounded_to_cents() {
    let engine = memory_engine(history());
    for (user, as_of) in [
        ("alice", day(2025, 1, 31)),
        ("alice", day(2025, 2, 28)),
        ("alice", day(2025, 4, 30)),
        ("bob", day(2025, 3, 31)),
    ] {
        let forecast = engine.predict(user, as_of).await.unwrap();
        let cents = forecast.prediction * 100.0;
        assert!((cents - cents.round()).abs() < 1e-6, "{}", forecast.prediction);

        match forecast.outlook {
            Outlook::Gain => assert!(forecast.message.contains("gain")),
            Outlook::Loss => assert!(forecast.message.contains("lose")),
            Outlook::Neutral => assert!(forecast.message.contains("neutral")),
        }
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_predictions_share_one_training_run() {
    let repo = Arc::new(CountingRepository::new(history(), Duration::from_millis(100)));
    let engine = Arc::new(ForecastEngine::new(
        repo.clone(),
        Arc::new(MemoryModelStore::new()),
        small_settings(),
    ));

    let a = {
        let engine = engine.clone();
        tokio::spawn(async move { engine.predict("alice", day(2025, 4, 30)).await })
    };
    let b = {
        let engine = engine.clone();
        tokio::spawn(async move { engine.predict("bob", day(2025, 4, 30)).await })
    };

    let (a, b) = (a.await.unwrap().unwrap(), b.await.unwrap().unwrap());
    assert!(a.prediction.is_finite() && b.prediction.is_finite());
    assert_eq!(repo.scans(), 1);
}

#[tokio::test]
async fn retraining_same_data_is_deterministic() {
    let engine = memory_engine(history());
    let first = engine.train().await.unwrap();
    let second = engine.train().await.unwrap();

    let features = finance_forecast::FeatureVector {
        income: 2250.0,
        expense: 2600.0,
        savings: 651.5,
    };
    assert!((first.predict(&features) - second.predict(&features)).abs() < 1e-9);
}

#[tokio::test]
async fn storage_failure_is_data_unavailable() {
    let engine = ForecastEngine::new(
        Arc::new(UnavailableRepository),
        Arc::new(MemoryModelStore::new()),
        small_settings(),
    );
    let err = engine.predict("alice", day(2025, 4, 30)).await.unwrap_err();
    assert!(matches!(err, ForecastError::DataUnavailable(_)));
}

#[tokio::test]
async fn corrupt_artifact_is_a_load_error() {
    let store = Arc::new(MemoryModelStore::new());
    store.put_raw("next_month_net_predictor", "{\"trained_at\": 3}");
    let engine = ForecastEngine::new(
        Arc::new(InMemoryRepository::with_records(history()).unwrap()),
        store,
        small_settings(),
    );
    assert!(matches!(
        engine.predict("alice", day(2025, 4, 30)).await,
        Err(ForecastError::ModelLoad { .. })
    ));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn slow_training_times_out_without_overlapping_runs() {
    let repo = Arc::new(CountingRepository::new(history(), Duration::from_millis(300)));
    let mut settings = small_settings();
    settings.train_timeout = Duration::from_millis(50);
    let engine = ForecastEngine::new(repo.clone(), Arc::new(MemoryModelStore::new()), settings);

    for _ in 0..3 {
        assert!(matches!(
            engine.train().await,
            Err(ForecastError::TrainingTimeout(_))
        ));
    }
    assert!(engine.model().is_none());

    // брошенный fit держит lock до своего завершения
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(repo.scans(), 3);
    assert_eq!(repo.peak(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn load_saved_waits_for_running_training() {
    let store = Arc::new(MemoryModelStore::new());
    let older = fit_from_repository(
        &InMemoryRepository::with_records(vec![
            NewRecord::new(RecordKind::Income, "zed", 10.0, at(2024, 1, 1)),
            NewRecord::new(RecordKind::Income, "zed", 20.0, at(2024, 2, 1)),
        ])
        .unwrap(),
        &small_settings().forest,
    )
    .unwrap();
    store.save("next_month_net_predictor", &older).unwrap();

    let repo = Arc::new(CountingRepository::new(history(), Duration::from_millis(200)));
    let engine = Arc::new(ForecastEngine::new(repo, store, small_settings()));

    let training = {
        let engine = engine.clone();
        tokio::spawn(async move { engine.train().await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;

    let loaded = engine.load_saved().await.unwrap().unwrap();
    let trained = training.await.unwrap().unwrap();
    assert!(Arc::ptr_eq(&loaded, &trained));
    assert!(Arc::ptr_eq(&engine.model().unwrap(), &trained));
    assert_ne!(*trained, older);
}

#[tokio::test]
async fn saved_model_is_reused_across_engines() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("finance.db");
    let models = dir.path().join("models");

    let sqlite = Arc::new(SqliteRepository::open(&db_path).unwrap());
    sqlite.insert_all(&history()).unwrap();

    let trainer = ForecastEngine::new(
        sqlite.clone(),
        Arc::new(FileModelStore::new(&models)),
        small_settings(),
    );
    let trained = trainer.train().await.unwrap();

    let store = FileModelStore::new(&models);
    assert!(store.path_for("next_month_net_predictor").exists());
    assert_eq!(store.load("next_month_net_predictor").unwrap().unwrap(), *trained);

    // новый движок должен загрузить модель, а не обучать
    let counting = Arc::new(CountingRepository::new(history(), Duration::ZERO));
    let server = ForecastEngine::new(counting.clone(), Arc::new(store), small_settings());
    let forecast = server.predict("alice", day(2025, 4, 30)).await.unwrap();
    assert_eq!(counting.scans(), 0);

    let expected = trainer.predict("alice", day(2025, 4, 30)).await.unwrap();
    assert_eq!(forecast.prediction, expected.prediction);
    assert_eq!(forecast.message, expected.message);
}
