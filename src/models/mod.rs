/// ML модели

pub mod forecasting;
pub mod forest;

pub use forecasting::{EngineSettings, FittedModel, ForecastEngine, ModelHandle};
pub use forest::{ForestParams, RandomForestRegressor};
