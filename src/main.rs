use std::path::PathBuf;

use anyhow::Context;
use chrono::Utc;
use clap::{Args, Parser, Subcommand};
use tracing::warn;
use tracing_subscriber::EnvFilter;

use separation_forecast::report::{self, DEFAULT_NATIONALITY_MATCH, DEFAULT_TAIL};
use separation_forecast::{ColumnMapping, EngineCache, EngineConfig, TableSource};

#[derive(Parser)]
#[command(name = "separation-forecast")]
#[command(about = "Monthly employee separation summary and forecast", long_about = None)]
struct Cli {
    #[command(flatten)]
    source: SourceArgs,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct SourceArgs {
    /// Historical separations table: CSV with a header row, or an xlsx/xls/ods workbook
    #[arg(long, env = "SEPARATION_DATA")]
    data: PathBuf,
    #[arg(long, env = "SEPARATION_DATE_COLUMN", default_value = "event_date")]
    date_column: String,
    #[arg(long, env = "SEPARATION_DEPARTMENT_COLUMN", default_value = "department")]
    department_column: String,
    #[arg(long, env = "SEPARATION_NATIONALITY_COLUMN", default_value = "nationality")]
    nationality_column: String,
    #[arg(long, default_value_t = ',')]
    delimiter: char,
    /// Encoding for CSV cells that are not valid UTF-8
    #[arg(long, env = "SEPARATION_ENCODING", default_value = "windows-1256")]
    encoding: String,
    /// JSON engine configuration; flags below override it
    #[arg(long, env = "SEPARATION_CONFIG")]
    config: Option<PathBuf>,
    /// L2 regularization strength for the count regression
    #[arg(long)]
    alpha: Option<f64>,
}

#[derive(Subcommand)]
enum Commands {
    /// Describe historical separation patterns
    Summary {
        #[arg(long, default_value = DEFAULT_NATIONALITY_MATCH)]
        nationality: String,
        #[arg(long, default_value_t = DEFAULT_TAIL)]
        tail: usize,
        #[arg(long)]
        json: bool,
    },
    /// Forecast separations for the months after the last record
    Forecast {
        #[arg(long)]
        horizon: Option<usize>,
        #[arg(long)]
        json: bool,
    },
    /// Generate a markdown report
    Report {
        #[arg(long, default_value = DEFAULT_NATIONALITY_MATCH)]
        nationality: String,
        #[arg(long, default_value = "report.md")]
        out: PathBuf,
    },
}

fn main() -> anyhow::Result<()> {
    init_logging();
    let cli = Cli::parse();

    let (columns, config) = resolve_source(&cli.source)?;
    let cache = EngineCache::new(TableSource::from_path(&cli.source.data, columns), config);
    let engine = cache.get().with_context(|| {
        format!(
            "cannot initialize forecasting engine from {}",
            cli.source.data.display()
        )
    })?;

    match cli.command {
        Commands::Summary {
            nationality,
            tail,
            json,
        } => {
            let summary = engine.summary(&nationality, tail);
            if json {
                println!("{}", serde_json::to_string_pretty(&summary)?);
                return Ok(());
            }

            println!(
                "{} separations loaded ({} rows skipped).",
                summary.total_records,
                engine.load_report().skipped()
            );
            println!(
                "Highest-separation department: {}",
                summary.top_department.as_deref().unwrap_or("n/a")
            );
            println!(
                "Nationality matching '{}': {:.1}%",
                summary.nationality_match, summary.matching_share_pct
            );
            println!("Most recent records:");
            for record in summary.recent.iter() {
                println!(
                    "- {} {} ({})",
                    record.event_date,
                    record.department.as_deref().unwrap_or("-"),
                    record.nationality.as_deref().unwrap_or("-")
                );
            }
        }
        Commands::Forecast { horizon, json } => {
            let points = match horizon {
                Some(horizon) => engine.forecast_with_horizon(horizon),
                None => engine.forecast(),
            };
            let points = match points {
                Ok(points) => points,
                Err(err) if !err.is_fatal() => {
                    warn!(error = %err, "forecast rejected");
                    println!("Forecast unavailable: {err}");
                    return Ok(());
                }
                Err(err) => return Err(err).context("forecast failed"),
            };
            if json {
                println!("{}", serde_json::to_string_pretty(&points)?);
                return Ok(());
            }

            println!("Forecast after {}:", engine.last_date());
            for point in points.iter() {
                println!("- {}: {}", point.period, point.predicted_count);
            }
        }
        Commands::Report { nationality, out } => {
            let summary = engine.summary(&nationality, DEFAULT_TAIL);
            let forecast = match engine.forecast() {
                Ok(points) => Some(points),
                Err(err) if !err.is_fatal() => {
                    warn!(error = %err, "rendering report without forecast");
                    None
                }
                Err(err) => return Err(err).context("forecast failed"),
            };
            let report =
                report::build_report(&summary, forecast.as_deref(), Utc::now().date_naive());
            std::fs::write(&out, report)
                .with_context(|| format!("failed to write {}", out.display()))?;
            println!("Report written to {}.", out.display());
        }
    }

    Ok(())
}

fn resolve_source(args: &SourceArgs) -> anyhow::Result<(ColumnMapping, EngineConfig)> {
    let delimiter = u8::try_from(args.delimiter)
        .context("delimiter must be a single ASCII character")?;
    let columns = ColumnMapping {
        date: args.date_column.clone(),
        department: args.department_column.clone(),
        nationality: args.nationality_column.clone(),
        delimiter,
        fallback_encoding: args.encoding.clone(),
    };

    let mut config = match &args.config {
        Some(path) => EngineConfig::from_json_file(path)?,
        None => EngineConfig::default(),
    };
    if let Some(alpha) = args.alpha {
        config.regression.alpha = alpha;
    }
    config.validate()?;

    Ok((columns, config))
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("separation_forecast=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}
