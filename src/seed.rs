//! Синтетические финансовые записи для демо и локального обучения
//!
//! Суммы и даты идут по простому шаблону: расходы
//! `20 + (i % 10) * 5.5`, зарплаты `2000 + (i % 5) * 250`, цели накоплений
//! `500 + (i % 7) * 150.75`, одна запись в день на пользователя. Необязательный
//! шум (jitter) искажает суммы через RNG с фиксированным seed.

use chrono::{Duration, NaiveDate, NaiveDateTime};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::storage::NewRecord;
use crate::types::RecordKind;

const EXPENSE_CATEGORIES: [&str; 4] = ["Entertainment", "Groceries", "Transport", "Dining"];
const EXPENSE_DESCRIPTIONS: [&str; 4] = ["Movie", "Shopping", "Bus Fare", "Dinner"];
const SAVING_CATEGORIES: [&str; 4] = ["Electronics", "Vacation", "Education", "Emergency Fund"];
const SAVING_STATUSES: [&str; 3] = ["save", "ongoing", "completed"];

#[derive(Debug, Clone)]
pub struct SeedPlan {
    pub users: Vec<String>,
    /// Записей каждого типа на пользователя
    pub records_per_kind: usize,
    /// Относительный шум суммы, 0.0 - без шума
    pub jitter: f64,
    pub seed: u64,
}

impl Default for SeedPlan {
    fn default() -> Self {
        Self {
            users: vec!["alice".to_string(), "bob".to_string(), "carol".to_string()],
            records_per_kind: 120,
            jitter: 0.0,
            seed: 42,
        }
    }
}

/// Разбор `--jitter`: конечное число от 0 до 1
pub fn parse_jitter(raw: &str) -> Result<f64, String> {
    let jitter: f64 = raw
        .trim()
        .parse()
        .map_err(|_| format!("'{}' is not a number", raw))?;
    if !jitter.is_finite() || !(0.0..=1.0).contains(&jitter) {
        return Err(format!("jitter must be between 0 and 1, got {}", raw));
    }
    Ok(jitter)
}

fn base_datetime(day: u32, h: u32, m: u32, s: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2025, 2, day)
        .and_then(|d| d.and_hms_opt(h, m, s))
        .unwrap_or(NaiveDateTime::MIN)
}

fn round_cents(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

pub fn generate(plan: &SeedPlan) -> Vec<NewRecord> {
    let mut rng = StdRng::seed_from_u64(plan.seed);
    let expense_base = base_datetime(1, 16, 37, 46);
    let salary_base = base_datetime(10, 0, 43, 8);
    let saving_base = base_datetime(1, 16, 37, 46);

    // вне (0, 1] шум отключен
    let jitter = if plan.jitter.is_finite() && plan.jitter > 0.0 {
        plan.jitter.min(1.0)
    } else {
        0.0
    };
    let mut noisy = |amount: f64| -> f64 {
        if jitter > 0.0 {
            let factor = 1.0 + rng.gen_range(-jitter..=jitter);
            round_cents((amount * factor).max(0.0))
        } else {
            amount
        }
    };

    let mut records = Vec::with_capacity(plan.users.len() * plan.records_per_kind * 3);
    for user in &plan.users {
        for i in 0..plan.records_per_kind {
            let offset = Duration::days(i as i64);

            records.push(
                NewRecord::new(
                    RecordKind::Expense,
                    user.as_str(),
                    noisy(round_cents(20.0 + (i % 10) as f64 * 5.5)),
                    expense_base + offset,
                )
                .with_description(EXPENSE_DESCRIPTIONS[i % EXPENSE_DESCRIPTIONS.len()])
                .with_category(EXPENSE_CATEGORIES[i % EXPENSE_CATEGORIES.len()]),
            );

            records.push(NewRecord::new(
                RecordKind::Income,
                user.as_str(),
                noisy(2000.0 + (i % 5) as f64 * 250.0),
                salary_base + offset,
            ));

            records.push(
                NewRecord::new(
                    RecordKind::Savings,
                    user.as_str(),
                    noisy(round_cents(500.0 + (i % 7) as f64 * 150.75)),
                    saving_base + offset,
                )
                .with_description(format!("Goal {}", i + 1))
                .with_category(SAVING_CATEGORIES[i % SAVING_CATEGORIES.len()])
                .with_status(SAVING_STATUSES[i % SAVING_STATUSES.len()]),
            );
        }
    }
    records
}
