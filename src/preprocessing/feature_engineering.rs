//! Извлечение признаков для модели чистого дохода следующего месяца

use std::collections::BTreeMap;

use linfa::Dataset;
use ndarray::{Array1, Array2};

use crate::error::{ForecastError, Result};
use crate::types::{FeatureVector, MonthlyAggregate, MonthlyTotal, TrainingExample, YearMonth};

pub struct FeatureEngineer;

impl FeatureEngineer {
    /// Outer join трех месячных рядов по (user, month).
    ///
    /// Если пары user/month нет в ряду, для него берется ноль. Результат
    /// отсортирован по (user, month) по возрастанию.
    pub fn merge_monthly(
        income: &[MonthlyTotal],
        expense: &[MonthlyTotal],
        savings: &[MonthlyTotal],
    ) -> Vec<MonthlyAggregate> {
        let mut merged: BTreeMap<(String, YearMonth), MonthlyAggregate> = BTreeMap::new();

        // Повторяющиеся ключи внутри ряда суммируются, как в GROUP BY
        for row in income {
            aggregate_entry(&mut merged, row).total_income += row.amount;
        }
        for row in expense {
            aggregate_entry(&mut merged, row).total_expense += row.amount;
        }
        for row in savings {
            aggregate_entry(&mut merged, row).total_savings += row.amount;
        }

        merged.into_values().collect()
    }

    /// Метка месяца - чистый доход следующего наблюдаемого месяца пользователя.
    ///
    /// `aggregates` должны быть отсортированы по (user, month). Последний месяц
    /// каждого пользователя без преемника и отбрасывается.
    pub fn label_next_month(aggregates: &[MonthlyAggregate]) -> Vec<TrainingExample> {
        aggregates
            .windows(2)
            .filter(|pair| pair[0].user_id == pair[1].user_id)
            .map(|pair| TrainingExample {
                total_income: pair[0].total_income,
                total_expense: pair[0].total_expense,
                total_savings: pair[0].total_savings,
                next_month_net: pair[1].net_earnings(),
            })
            .collect()
    }

    /// Обучающая выборка из трех исходных месячных рядов
    pub fn training_examples(
        income: &[MonthlyTotal],
        expense: &[MonthlyTotal],
        savings: &[MonthlyTotal],
    ) -> Vec<TrainingExample> {
        let merged = Self::merge_monthly(income, expense, savings);
        Self::label_next_month(&merged)
    }

    pub fn to_dataset(examples: &[TrainingExample]) -> Result<Dataset<f64, f64, ndarray::Ix1>> {
        if examples.is_empty() {
            return Err(ForecastError::DataInsufficient(
                "no month has a following month to label it".to_string(),
            ));
        }

        let mut records = Array2::zeros((examples.len(), FeatureVector::NAMES.len()));
        let mut targets = Array1::zeros(examples.len());

        for (i, example) in examples.iter().enumerate() {
            records[[i, 0]] = example.total_income;
            records[[i, 1]] = example.total_expense;
            records[[i, 2]] = example.total_savings;
            targets[i] = example.next_month_net;
        }

        Ok(Dataset::new(records, targets).with_feature_names(FeatureVector::NAMES.to_vec()))
    }

    /// Матрица из одной строки для прогноза
    pub fn feature_row(features: &FeatureVector) -> Array2<f64> {
        let mut row = Array2::zeros((1, FeatureVector::NAMES.len()));
        for (j, value) in features.to_array().into_iter().enumerate() {
            row[[0, j]] = value;
        }
        row
    }
}

fn aggregate_entry<'a>(
    merged: &'a mut BTreeMap<(String, YearMonth), MonthlyAggregate>,
    row: &MonthlyTotal,
) -> &'a mut MonthlyAggregate {
    merged
        .entry((row.user_id.clone(), row.month))
        .or_insert_with(|| MonthlyAggregate {
            user_id: row.user_id.clone(),
            month: row.month,
            total_income: 0.0,
            total_expense: 0.0,
            total_savings: 0.0,
        })
}
