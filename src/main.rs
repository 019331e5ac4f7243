/// CLI для модели прогнозирования

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use finance_forecast::models::forecasting::{EngineSettings, ForecastEngine};
use finance_forecast::refresh::{start_refresh_task, RefreshPolicy};
use finance_forecast::seed::{self, SeedPlan};
use finance_forecast::{FileModelStore, FinanceRepository, ForecastConfig, SqliteRepository};

/// Next-month net earnings forecasts
#[derive(Parser)]
#[command(name = "finance-forecast")]
#[command(about = "Train and query the next-month net earnings model", long_about = None)]
#[command(version)]
struct Cli {
    /// TOML config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Database path (overrides config)
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the database schema
    Init,

    /// Insert synthetic salaries, expenses and saving goals
    Seed {
        /// Comma-separated user ids
        #[arg(long, value_delimiter = ',', default_value = "alice,bob,carol")]
        users: Vec<String>,

        /// Records of each kind per user (one per day)
        #[arg(short, long, default_value = "120")]
        records: usize,

        /// Relative amount noise, e.g. 0.1
        #[arg(long, default_value = "0.0", value_parser = seed::parse_jitter)]
        jitter: f64,
    },

    /// Show monthly income, expense and savings totals
    History {
        /// Restrict to one user
        #[arg(short, long)]
        user: Option<String>,
    },

    /// Train the model on all users and save it
    Train,

    /// Forecast next month's net earnings for a user
    Predict {
        #[arg(short, long)]
        user: String,

        /// Use data up to this date (YYYY-MM-DD), default today
        #[arg(long)]
        as_of: Option<NaiveDate>,

        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
    },

    /// Keep the saved model fresh until interrupted
    Refresh,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Инициализация логирования: RUST_LOG > --verbose > info
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false).compact())
        .init();

    let mut config = ForecastConfig::load(cli.config.as_deref())?;
    if let Some(db) = cli.db {
        config.database_path = db;
    }

    let repo = Arc::new(
        SqliteRepository::open(&config.database_path)
            .with_context(|| format!("opening {}", config.database_path.display()))?,
    );

    match cli.command {
        Commands::Init => {
            println!("Database ready at {}", config.database_path.display());
        }
        Commands::Seed {
            users,
            records,
            jitter,
        } => {
            let plan = SeedPlan {
                users,
                records_per_kind: records,
                jitter,
                seed: config.forest.seed,
            };
            let inserted = repo.insert_all(&seed::generate(&plan))?;
            println!("Inserted {} records for {} users", inserted, plan.users.len());
        }
        Commands::History { user } => {
            let history = repo.monthly_history(user.as_deref())?;
            if history.is_empty() {
                println!("No records");
                return Ok(());
            }
            println!(
                "{:<16} {:<8} {:>12} {:>12} {:>12} {:>12}",
                "USER", "MONTH", "INCOME", "EXPENSE", "SAVINGS", "NET"
            );
            for row in history {
                println!(
                    "{:<16} {:<8} {:>12.2} {:>12.2} {:>12.2} {:>12.2}",
                    row.user_id,
                    row.month,
                    row.total_income,
                    row.total_expense,
                    row.total_savings,
                    row.net_earnings()
                );
            }
        }
        Commands::Train => {
            let engine = build_engine(repo, &config);
            let model = engine.train().await?;
            println!(
                "Trained '{}' on {} examples (MAE {:.2})",
                config.model_name, model.n_examples, model.training_mae
            );
        }
        Commands::Predict { user, as_of, json } => {
            let engine = build_engine(repo, &config);
            let forecast = match as_of {
                Some(date) => engine.predict(&user, date).await?,
                None => engine.predict_now(&user).await?,
            };
            if json {
                println!("{}", serde_json::to_string_pretty(&forecast)?);
            } else {
                println!("{}", forecast.message);
                println!(
                    "  income {:.2}, expense {:.2}, savings {:.2}",
                    forecast.income, forecast.expense, forecast.savings
                );
            }
        }
        Commands::Refresh => {
            let engine = Arc::new(build_engine(repo, &config));
            let task = start_refresh_task(engine, RefreshPolicy::from(&config));
            tokio::signal::ctrl_c().await?;
            task.abort();
            tracing::info!("Refresh stopped");
        }
    }

    Ok(())
}

fn build_engine(repo: Arc<SqliteRepository>, config: &ForecastConfig) -> ForecastEngine {
    ForecastEngine::new(
        repo,
        Arc::new(FileModelStore::new(&config.model_dir)),
        EngineSettings::from(config),
    )
}
