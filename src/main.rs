//! Footy tipping CLI
//!
//! Imports match data, backtests margin models over past seasons and tips
//! the upcoming round.

use clap::{Parser, Subcommand};
use tipping::{Config, Result};

#[derive(Parser)]
#[command(name = "tipping")]
#[command(about = "AFL margin prediction and backtesting", long_about = None)]
struct Cli {
    /// Config file path
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Data management commands
    Data {
        #[command(subcommand)]
        action: DataCommands,
    },
    /// Predict every season in [start, end) with every configured model
    Backtest {
        /// First season to predict
        #[arg(long)]
        start: i32,
        /// Season after the last one to predict
        #[arg(long)]
        end: i32,
        /// Only predict this round of each season
        #[arg(long)]
        round: Option<u32>,
        /// Use the models as they are instead of refitting each season
        #[arg(long)]
        no_train: bool,
        /// Output format
        #[arg(long, default_value = "table")]
        format: OutputFormat,
    },
    /// Tip the upcoming round and store the tips
    Tip {
        /// Date to tip from (defaults to today)
        #[arg(long)]
        date: Option<chrono::NaiveDate>,
    },
    /// Recompute correctness of stored tips and show round totals
    Score,
    /// Initialize a new project with default config
    Init,
}

#[derive(Subcommand)]
enum DataCommands {
    /// Import matches from a JSON file
    Import {
        /// JSON array of match records
        file: Option<String>,
    },
    /// Show database status
    Status,
}

#[derive(Clone, Debug)]
enum OutputFormat {
    Table,
    Json,
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "table" => Ok(OutputFormat::Table),
            "json" => Ok(OutputFormat::Json),
            _ => Err(format!("Unknown format: {}. Use table or json.", s)),
        }
    }
}

fn main() {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level))
        .format_timestamp(None)
        .init();

    // Load or create config
    let config = if std::path::Path::new(&cli.config).exists() {
        match Config::load(&cli.config) {
            Ok(c) => c,
            Err(e) => {
                eprintln!("Error loading config: {}", e);
                std::process::exit(1);
            }
        }
    } else {
        Config::default()
    };

    let result = match cli.command {
        Commands::Data { action } => match action {
            DataCommands::Import { file } => commands::data_import(&config, file),
            DataCommands::Status => commands::data_status(&config),
        },
        Commands::Backtest {
            start,
            end,
            round,
            no_train,
            format,
        } => commands::backtest(&config, start, end, round, !no_train, format),
        Commands::Tip { date } => commands::tip(&config, date),
        Commands::Score => commands::score(&config),
        Commands::Init => commands::init(&cli.config),
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

mod commands {
    use super::*;
    use chrono::{Local, NaiveDate};
    use tipping::data::{Database, JsonFileImporter};
    use tipping::features::{build_feature_table, default_pipeline, FeatureTable};
    use tipping::predict::{self, BacktestOrchestrator, BacktestReport};
    use tipping::training::metrics::{evaluate_predictions, round_totals, stored_accuracy};
    use tipping::training::ModelRegistry;
    use tipping::{PredictionRecord, TipError};

    pub fn init(config_path: &str) -> Result<()> {
        let config = Config::default();
        config.save(config_path)?;
        println!("Created default config at {}", config_path);

        std::fs::create_dir_all("data")?;
        println!("Created data/ directory");

        println!("\nNext steps:");
        println!("  1. Edit {} to customize settings", config_path);
        println!("  2. Run 'tipping data import {}' to load matches", config.data.matches_path);
        println!("  3. Run 'tipping backtest --start 2015 --end 2017' to evaluate the models");
        println!("  4. Run 'tipping tip' to tip the upcoming round");

        Ok(())
    }

    pub fn data_import(config: &Config, file: Option<String>) -> Result<()> {
        let path = file.unwrap_or_else(|| config.data.matches_path.clone());
        let db = Database::open(&config.data.database_path)?;

        println!("Importing matches from {}...", path);
        let records = JsonFileImporter::new(&path).read_all()?;
        if records.is_empty() {
            println!("No matches found in {}", path);
            return Ok(());
        }

        let count = db.import_records(&records)?;
        println!("Stored {} matches in database", count);

        Ok(())
    }

    pub fn data_status(config: &Config) -> Result<()> {
        let db = Database::open(&config.data.database_path)?;
        let stats = db.get_stats()?;

        println!("Database Status");
        println!("───────────────────────────────");
        println!("  Path:        {}", config.data.database_path);
        println!("  Matches:     {}", stats.match_count);
        println!("  Predictions: {}", stats.prediction_count);
        if let (Some(earliest), Some(latest)) = (stats.earliest_match, stats.latest_match) {
            println!("  Range:       {} to {}", earliest, latest);
        }

        Ok(())
    }

    pub fn backtest(
        config: &Config,
        start: i32,
        end: i32,
        round: Option<u32>,
        train: bool,
        format: OutputFormat,
    ) -> Result<()> {
        let db = Database::open(&config.data.database_path)?;
        let stats = db.get_stats()?;
        let (Some(earliest), Some(latest)) = (stats.earliest_match, stats.latest_match) else {
            return Err(TipError::EmptyDataset {
                years: format!("{}-{}", start, end - 1),
                detail: "database has no matches, run 'tipping data import' first".to_string(),
            });
        };

        let records = db.get_records_in_range(earliest, latest)?;
        let pipeline = default_pipeline(&config.features)?;
        let table = build_feature_table(&records, &pipeline)?;
        let mut registry = ModelRegistry::from_config(&config.models)?;

        let report = BacktestOrchestrator::new(&table).make_predictions(start..end, round, &mut registry, train)?;

        let summary = summary_lines(&report, &table);
        match format {
            OutputFormat::Table => {
                println!("\nBacktest {}..{}", start, end);
                println!("═══════════════════════════════════════════════════════");
                for prediction in &report.predictions {
                    println!("  {}", prediction);
                }
                for line in &summary {
                    println!("{}", line);
                }
            }
            OutputFormat::Json => {
                // stdout carries only the JSON document
                println!("{}", predictions_json(&report.predictions)?);
                for line in &summary {
                    eprintln!("{}", line);
                }
            }
        }

        if let Some(failure) = report.fatal_failures().next() {
            return Err(TipError::Model {
                model: failure.ml_model.clone(),
                message: failure.error.to_string(),
            });
        }

        Ok(())
    }

    pub fn predictions_json(predictions: &[PredictionRecord]) -> Result<String> {
        serde_json::to_string_pretty(predictions)
            .map_err(|e| TipError::Parse(format!("Failed to serialize predictions: {}", e)))
    }

    /// Model performance and skipped pairs, one printed line each
    pub fn summary_lines(report: &BacktestReport, table: &FeatureTable) -> Vec<String> {
        let mut lines = vec![
            "\nModel Performance".to_string(),
            "───────────────────────────────".to_string(),
        ];
        for (model, metrics) in evaluate_predictions(&report.predictions, table) {
            lines.push(format!("  {:<16} {}", model, metrics));
        }

        if !report.failures.is_empty() {
            lines.push("\nSkipped".to_string());
            lines.push("───────────────────────────────".to_string());
            for failure in &report.failures {
                lines.push(format!("  {}", failure));
            }
        }
        lines
    }

    pub fn tip(config: &Config, date: Option<NaiveDate>) -> Result<()> {
        let today = date.unwrap_or_else(|| Local::now().date_naive());
        let db = Database::open(&config.data.database_path)?;
        let pipeline = default_pipeline(&config.features)?;
        let mut registry = ModelRegistry::from_config(&config.models)?;

        let Some(report) = predict::tip(&db, &pipeline, &mut registry, &config.backtest, today)? else {
            println!("No upcoming matches to tip after {}", today);
            return Ok(());
        };

        println!("\nTips for {}", report.round);
        println!("═══════════════════════════════════════════════════════");
        let mut stored = 0;
        for tip in &report.tips {
            println!("  {}", tip);
            if db.update_or_create_prediction(tip)? {
                stored += 1;
            }
        }
        println!("\nStored {} of {} tips", stored, report.tips.len());

        for failure in &report.failures {
            println!("  Skipped {}", failure);
        }

        Ok(())
    }

    pub fn score(config: &Config) -> Result<()> {
        let db = Database::open(&config.data.database_path)?;
        let updated = db.backfill_correctness()?;
        println!("Rescored {} predictions", updated);

        let stored = db.get_prediction_results()?;
        let totals = round_totals(&stored);
        let models: Vec<String> = stored_accuracy(&stored).into_keys().collect();

        println!("\nCorrect tips by round");
        println!("───────────────────────────────");
        print!("  {:<12}", "Round");
        for model in &models {
            print!(" {:>14}", model);
        }
        println!();
        for round in &totals {
            print!("  {:<12}", format!("{} R{}", round.year, round.round_number));
            for model in &models {
                print!(" {:>14}", round.correct.get(model).copied().unwrap_or(0));
            }
            println!();
        }

        println!("\nSeason totals");
        println!("───────────────────────────────");
        for (model, metrics) in stored_accuracy(&stored) {
            println!("  {:<16} {}", model, metrics);
        }

        Ok(())
    }
}
