/// Предобработка данных

pub mod feature_engineering;

pub use feature_engineering::FeatureEngineer;
