/// Типы данных для модуля прогнозирования

use std::fmt;
use std::str::FromStr;

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Календарный месяц (год и месяц)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct YearMonth {
    pub year: i32,
    pub month: u32, // 1-12
}

impl YearMonth {
    pub fn new(year: i32, month: u32) -> Option<Self> {
        (1..=12).contains(&month).then_some(Self { year, month })
    }

    pub fn from_date(date: NaiveDate) -> Self {
        Self {
            year: date.year(),
            month: date.month(),
        }
    }

    /// Первый день месяца
    pub fn first_day(&self) -> NaiveDate {
        NaiveDate::from_ymd_opt(self.year, self.month, 1).unwrap_or(NaiveDate::MIN)
    }

    pub fn next(&self) -> Self {
        if self.month == 12 {
            Self { year: self.year + 1, month: 1 }
        } else {
            Self { year: self.year, month: self.month + 1 }
        }
    }
}

impl fmt::Display for YearMonth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

impl FromStr for YearMonth {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (year, month) = s
            .split_once('-')
            .ok_or_else(|| format!("invalid month '{}', expected YYYY-MM", s))?;
        let year: i32 = year
            .parse()
            .map_err(|_| format!("invalid year in '{}'", s))?;
        let month: u32 = month
            .parse()
            .map_err(|_| format!("invalid month in '{}'", s))?;
        YearMonth::new(year, month).ok_or_else(|| format!("month out of range in '{}'", s))
    }
}

impl Serialize for YearMonth {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for YearMonth {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Таблица записей, из которой берется сумма
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    Income,  // salaries
    Expense, // expenses
    Savings, // saving_goals
}

impl RecordKind {
    pub const ALL: [RecordKind; 3] = [RecordKind::Income, RecordKind::Expense, RecordKind::Savings];

    pub fn table(&self) -> &'static str {
        match self {
            RecordKind::Income => "salaries",
            RecordKind::Expense => "expenses",
            RecordKind::Savings => "saving_goals",
        }
    }
}

/// Строка GROUP BY: сумма пользователя по одному типу записей за месяц
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonthlyTotal {
    pub user_id: String,
    pub month: YearMonth,
    pub amount: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonthlyAggregate {
    pub user_id: String,
    pub month: YearMonth,
    pub total_income: f64,
    pub total_expense: f64,
    pub total_savings: f64,
}

impl MonthlyAggregate {
    /// Доход минус расходы, без учета накоплений
    pub fn net_earnings(&self) -> f64 {
        self.total_income - self.total_expense
    }

    pub fn features(&self) -> FeatureVector {
        FeatureVector {
            income: self.total_income,
            expense: self.total_expense,
            savings: self.total_savings,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingExample {
    pub total_income: f64,
    pub total_expense: f64,
    pub total_savings: f64,
    pub next_month_net: f64,
}

/// Вход модели: `[total_income, total_expense, total_savings]`
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct FeatureVector {
    pub income: f64,
    pub expense: f64,
    pub savings: f64,
}

impl FeatureVector {
    pub const NAMES: [&'static str; 3] = ["total_income", "total_expense", "total_savings"];

    pub fn to_array(&self) -> [f64; 3] {
        [self.income, self.expense, self.savings]
    }
}

/// Месяцы, из которых взяты три признака
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FeatureMonths {
    pub income: Option<YearMonth>,
    pub expense: Option<YearMonth>,
    pub savings: Option<YearMonth>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outlook {
    Gain,
    Loss,
    Neutral,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Forecast {
    pub user_id: String,
    pub message: String,
    pub prediction: f64,
    pub outlook: Outlook,
    pub income: f64,
    pub expense: f64,
    pub savings: f64,
    pub months: FeatureMonths,
}
