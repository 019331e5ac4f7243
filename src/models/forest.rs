//! Random forest для регрессии
//!
//! Бэггинг CART-деревьев с полным перебором порогов по серединам. Каждое
//! дерево берет bootstrap-выборку из RNG с seed `seed + индекс дерева`, поэтому
//! два обучения на одних данных с одними параметрами дают один и тот же лес.

use linfa::DatasetBase;
use linfa::traits::{Fit, PredictInplace};
use ndarray::{Array1, Array2, ArrayView1};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::error::ForecastError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ForestParams {
    pub n_trees: usize,
    /// `None` - растим дерево, пока листья не станут чистыми
    pub max_depth: Option<usize>,
    pub min_samples_split: usize,
    pub min_samples_leaf: usize,
    pub bootstrap: bool,
    pub seed: u64,
}

impl Default for ForestParams {
    fn default() -> Self {
        Self {
            n_trees: 100,
            max_depth: None,
            min_samples_split: 2,
            min_samples_leaf: 1,
            bootstrap: true,
            seed: 42,
        }
    }
}

impl ForestParams {
    fn check(&self) -> Result<(), ForecastError> {
        if self.n_trees == 0 {
            return Err(ForecastError::Config("n_trees must be at least 1".to_string()));
        }
        if self.min_samples_split < 2 {
            return Err(ForecastError::Config(
                "min_samples_split must be at least 2".to_string(),
            ));
        }
        if self.min_samples_leaf == 0 {
            return Err(ForecastError::Config(
                "min_samples_leaf must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
enum TreeNode {
    Leaf {
        value: f64,
    },
    /// Образцы с `x[feature] <= threshold` идут влево
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
}

/// Дерево регрессии в плоской арене узлов, корень с индексом 0
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegressionTree {
    nodes: Vec<TreeNode>,
}

struct SplitCandidate {
    feature: usize,
    threshold: f64,
    sse: f64,
}

impl RegressionTree {
    fn fit(
        records: &Array2<f64>,
        targets: &Array1<f64>,
        sample: Vec<usize>,
        params: &ForestParams,
    ) -> Self {
        let mut nodes = Vec::new();
        // (слот узла, дошедшие до него образцы, глубина)
        let mut pending = vec![(0usize, sample, 0usize)];
        nodes.push(TreeNode::Leaf { value: 0.0 });

        while let Some((slot, indices, depth)) = pending.pop() {
            let value = mean_of(targets, &indices);

            let can_split = indices.len() >= params.min_samples_split
                && params.max_depth.map_or(true, |max| depth < max)
                && sse_of(targets, &indices) > 1e-12;

            let split = if can_split {
                best_split(records, targets, &indices, params.min_samples_leaf)
            } else {
                None
            };

            match split {
                Some(split) => {
                    let (left_indices, right_indices): (Vec<usize>, Vec<usize>) = indices
                        .iter()
                        .partition(|&&i| records[[i, split.feature]] <= split.threshold);

                    let left = nodes.len();
                    nodes.push(TreeNode::Leaf { value: 0.0 });
                    let right = nodes.len();
                    nodes.push(TreeNode::Leaf { value: 0.0 });

                    nodes[slot] = TreeNode::Split {
                        feature: split.feature,
                        threshold: split.threshold,
                        left,
                        right,
                    };
                    pending.push((right, right_indices, depth + 1));
                    pending.push((left, left_indices, depth + 1));
                }
                None => nodes[slot] = TreeNode::Leaf { value },
            }
        }

        Self { nodes }
    }

    fn predict_row(&self, row: ArrayView1<f64>) -> f64 {
        let mut idx = 0;
        loop {
            match &self.nodes[idx] {
                TreeNode::Leaf { value } => return *value,
                TreeNode::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    idx = if row[*feature] <= *threshold { *left } else { *right };
                }
            }
        }
    }

    fn depth(&self) -> usize {
        let mut max_depth = 0;
        let mut stack = vec![(0usize, 0usize)];
        while let Some((idx, depth)) = stack.pop() {
            max_depth = max_depth.max(depth);
            if let TreeNode::Split { left, right, .. } = &self.nodes[idx] {
                stack.push((*left, depth + 1));
                stack.push((*right, depth + 1));
            }
        }
        max_depth
    }

    /// Проверяет, что арена - корректное дерево над `n_features` входами
    fn validate(&self, n_features: usize) -> Result<(), String> {
        if self.nodes.is_empty() {
            return Err("tree has no nodes".to_string());
        }
        for (idx, node) in self.nodes.iter().enumerate() {
            match node {
                TreeNode::Leaf { value } if !value.is_finite() => {
                    return Err(format!("node {} has a non-finite value", idx));
                }
                TreeNode::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    if *feature >= n_features {
                        return Err(format!("node {} splits on unknown feature {}", idx, feature));
                    }
                    if !threshold.is_finite() {
                        return Err(format!("node {} has a non-finite threshold", idx));
                    }
                    // дети всегда добавляются после родителя
                    let in_range = |child: usize| child > idx && child < self.nodes.len();
                    if !in_range(*left) || !in_range(*right) {
                        return Err(format!("node {} has invalid children", idx));
                    }
                }
                TreeNode::Leaf { .. } => {}
            }
        }
        Ok(())
    }
}

fn mean_of(targets: &Array1<f64>, indices: &[usize]) -> f64 {
    if indices.is_empty() {
        return 0.0;
    }
    indices.iter().map(|&i| targets[i]).sum::<f64>() / indices.len() as f64
}

fn sse_of(targets: &Array1<f64>, indices: &[usize]) -> f64 {
    let mean = mean_of(targets, indices);
    indices.iter().map(|&i| (targets[i] - mean).powi(2)).sum()
}

/// Разбиение с минимальной суммой квадратов ошибок по всем признакам и порогам
fn best_split(
    records: &Array2<f64>,
    targets: &Array1<f64>,
    indices: &[usize],
    min_samples_leaf: usize,
) -> Option<SplitCandidate> {
    let n = indices.len();
    let mut best: Option<SplitCandidate> = None;

    for feature in 0..records.ncols() {
        let mut order = indices.to_vec();
        order.sort_by(|&a, &b| records[[a, feature]].total_cmp(&records[[b, feature]]));

        let total_sum: f64 = order.iter().map(|&i| targets[i]).sum();
        let total_sq: f64 = order.iter().map(|&i| targets[i] * targets[i]).sum();

        let mut left_sum = 0.0;
        let mut left_sq = 0.0;

        for k in 1..n {
            let prev = order[k - 1];
            left_sum += targets[prev];
            left_sq += targets[prev] * targets[prev];

            let lo = records[[prev, feature]];
            let hi = records[[order[k], feature]];
            if lo >= hi || k < min_samples_leaf || n - k < min_samples_leaf {
                continue;
            }

            let left_n = k as f64;
            let right_n = (n - k) as f64;
            let right_sum = total_sum - left_sum;
            let right_sq = total_sq - left_sq;
            let sse = (left_sq - left_sum * left_sum / left_n)
                + (right_sq - right_sum * right_sum / right_n);

            if best.as_ref().map_or(true, |b| sse < b.sse) {
                let mut threshold = lo + (hi - lo) / 2.0;
                if threshold >= hi {
                    threshold = lo;
                }
                best = Some(SplitCandidate {
                    feature,
                    threshold,
                    sse,
                });
            }
        }
    }

    best
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RandomForestRegressor {
    params: ForestParams,
    n_features: usize,
    trees: Vec<RegressionTree>,
}

impl RandomForestRegressor {
    pub fn params(&self) -> &ForestParams {
        &self.params
    }

    pub fn n_features(&self) -> usize {
        self.n_features
    }

    pub fn n_trees(&self) -> usize {
        self.trees.len()
    }

    pub fn max_depth(&self) -> usize {
        self.trees.iter().map(|t| t.depth()).max().unwrap_or(0)
    }

    /// Среднее предсказаний деревьев для одного образца
    pub fn predict_one(&self, row: ArrayView1<f64>) -> f64 {
        if self.trees.is_empty() {
            return 0.0;
        }
        self.trees.iter().map(|t| t.predict_row(row)).sum::<f64>() / self.trees.len() as f64
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.trees.is_empty() {
            return Err("forest has no trees".to_string());
        }
        for (i, tree) in self.trees.iter().enumerate() {
            tree.validate(self.n_features)
                .map_err(|e| format!("tree {}: {}", i, e))?;
        }
        Ok(())
    }
}

impl Fit<Array2<f64>, Array1<f64>, ForecastError> for ForestParams {
    type Object = RandomForestRegressor;

    fn fit(
        &self,
        dataset: &DatasetBase<Array2<f64>, Array1<f64>>,
    ) -> Result<Self::Object, ForecastError> {
        self.check()?;

        let records = &dataset.records;
        let targets = &dataset.targets;
        let n_samples = records.nrows();

        if n_samples == 0 {
            return Err(ForecastError::DataInsufficient("empty dataset".to_string()));
        }
        if targets.len() != n_samples {
            return Err(ForecastError::Training(format!(
                "{} records but {} targets",
                n_samples,
                targets.len()
            )));
        }
        if records.iter().chain(targets.iter()).any(|v| !v.is_finite()) {
            return Err(ForecastError::Training(
                "dataset contains non-finite values".to_string(),
            ));
        }

        let trees = (0..self.n_trees)
            .map(|t| {
                let sample: Vec<usize> = if self.bootstrap {
                    let mut rng = StdRng::seed_from_u64(self.seed.wrapping_add(t as u64));
                    (0..n_samples).map(|_| rng.gen_range(0..n_samples)).collect()
                } else {
                    (0..n_samples).collect()
                };
                RegressionTree::fit(records, targets, sample, self)
            })
            .collect();

        Ok(RandomForestRegressor {
            params: self.clone(),
            n_features: records.ncols(),
            trees,
        })
    }
}

impl PredictInplace<Array2<f64>, Array1<f64>> for RandomForestRegressor {
    fn predict_inplace<'a>(&'a self, x: &'a Array2<f64>, y: &mut Array1<f64>) {
        assert_eq!(
            x.nrows(),
            y.len(),
            "The number of data points must match the number of output targets."
        );
        for (i, row) in x.rows().into_iter().enumerate() {
            y[i] = self.predict_one(row);
        }
    }

    fn default_target(&self, x: &Array2<f64>) -> Array1<f64> {
        Array1::zeros(x.nrows())
    }
}
