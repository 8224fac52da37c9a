use anyhow::{anyhow, bail, Context, Result};
use chrono::{DateTime, Utc};
use clap::builder::styling::{AnsiColor, Color, Style, Styles};
use clap::{Parser, Subcommand};
use serde::Serialize;
use serde_json::Value as JsonValue;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use migration_job_runner::config::{
    AppConfig, CliConfig, FileConfig, LoggingLevel, DEFAULT_HISTORY_LIMIT,
    DEFAULT_MAX_RESULTS_PER_JOB,
};
use migration_job_runner::job_store::{MigrationStrategy, NewJob, Schedule, SqliteJobStore};
use migration_job_runner::metrics;
use migration_job_runner::migration_jobs::{MigrationScheduler, RequiredFieldsMigrator};

fn cli_styles() -> Styles {
    let ansi = |color: AnsiColor| Some(Color::Ansi(color));
    let heading = Style::new().bold().underline().fg_color(ansi(AnsiColor::Yellow));
    let failure = Style::new().bold().fg_color(ansi(AnsiColor::Red));

    Styles::styled()
        .header(heading)
        .usage(heading)
        .literal(Style::new().bold().fg_color(ansi(AnsiColor::Green)))
        .placeholder(Style::new().italic().fg_color(ansi(AnsiColor::BrightBlack)))
        .valid(Style::new().fg_color(ansi(AnsiColor::Green)))
        .invalid(failure)
        .error(failure)
}

fn parse_path(s: &str) -> Result<PathBuf> {
    let original_path = PathBuf::from(s);
    if original_path.is_absolute() {
        return Ok(original_path);
    }
    let cwd = std::env::current_dir()?;
    Ok(cwd.join(original_path))
}

fn parse_schedule(s: &str) -> Result<Schedule, String> {
    Schedule::parse(s)
        .ok_or_else(|| format!("unknown schedule '{}', expected daily, weekly, monthly or once", s))
}

fn parse_strategy(s: &str) -> Result<MigrationStrategy, String> {
    MigrationStrategy::parse(s).ok_or_else(|| {
        format!(
            "unknown strategy '{}', expected overwrite, merge or skip_existing",
            s
        )
    })
}

fn parse_time(s: &str) -> Result<DateTime<Utc>, String> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| format!("invalid RFC 3339 timestamp '{}': {}", s, e))
}

#[derive(Parser, Debug)]
#[command(styles = cli_styles(), about = "Manage scheduled migration jobs")]
struct CliArgs {
    /// Path to the SQLite job store database.
    #[clap(long, value_parser = parse_path)]
    pub db_path: Option<PathBuf>,

    /// Path to a TOML config file. Its values override command-line flags.
    #[clap(long, value_parser = parse_path)]
    pub config: Option<PathBuf>,

    /// Log verbosity when LOG_LEVEL is not set.
    #[clap(long, default_value = "info")]
    pub logging_level: LoggingLevel,

    /// Fields every work item must carry, comma separated (default: id,title).
    #[clap(long, value_delimiter = ',')]
    pub required_fields: Vec<String>,

    /// Number of history entries shown when --limit is not given.
    #[clap(long, default_value_t = DEFAULT_HISTORY_LIMIT)]
    pub default_history_limit: usize,

    /// Results kept per job by `cleanup` when --max-results is not given.
    #[clap(long, default_value_t = DEFAULT_MAX_RESULTS_PER_JOB)]
    pub max_results_per_job: usize,

    /// Print the Prometheus metrics exposition after the command.
    #[clap(long)]
    pub print_metrics: bool,

    #[command(subcommand)]
    command: Command,
}

impl CliArgs {
    fn to_cli_config(&self) -> CliConfig {
        CliConfig {
            db_path: self.db_path.clone(),
            logging_level: self.logging_level,
            required_fields: self.required_fields.clone(),
            default_history_limit: self.default_history_limit,
            max_results_per_job: self.max_results_per_job,
        }
    }
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Creates a job for a farm.
    Create {
        #[clap(long)]
        farm_id: String,

        #[clap(long)]
        name: String,

        #[clap(long, default_value = "")]
        description: String,

        /// One of daily, weekly, monthly, once.
        #[clap(long, value_parser = parse_schedule)]
        schedule: Schedule,

        /// First allowed run time (RFC 3339), defaults to now.
        #[clap(long, value_parser = parse_time)]
        at: Option<DateTime<Utc>>,

        /// One of overwrite, merge, skip_existing.
        #[clap(long, value_parser = parse_strategy, default_value = "merge")]
        strategy: MigrationStrategy,
    },

    /// Shows all jobs of a farm.
    List { farm_id: String },

    /// Shows a single job.
    Show { job_id: String },

    /// Replaces the schedule of a job.
    UpdateSchedule {
        job_id: String,

        #[clap(long, value_parser = parse_schedule)]
        schedule: Schedule,

        #[clap(long, value_parser = parse_time)]
        at: DateTime<Utc>,
    },

    /// Deletes a job and its stored results.
    Delete { job_id: String },

    /// Runs a job over the items of a JSON array file.
    Execute {
        job_id: String,

        #[clap(long, value_parser = parse_path)]
        items: PathBuf,
    },

    /// Shows jobs that are due.
    Pending {
        /// Evaluate at this instant (RFC 3339) instead of now.
        #[clap(long, value_parser = parse_time)]
        at: Option<DateTime<Utc>>,
    },

    /// Shows the execution history of a farm, newest first.
    History {
        farm_id: String,

        #[clap(long)]
        limit: Option<usize>,
    },

    /// Shows aggregate statistics of a job.
    Stats { job_id: String },

    /// Trims the stored results of a job to the most recent ones.
    Cleanup {
        job_id: String,

        #[clap(long)]
        max_results: Option<usize>,
    },

    /// Marks jobs left running by an interrupted process as failed.
    /// Only run while no other process executes jobs on the same database.
    Recover,
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn read_items(path: &Path) -> Result<Vec<JsonValue>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read items file: {:?}", path))?;
    serde_json::from_str(&content)
        .with_context(|| format!("Items file is not a JSON array: {:?}", path))
}

fn run_command(scheduler: &MigrationScheduler, config: &AppConfig, command: Command) -> Result<()> {
    match command {
        Command::Create {
            farm_id,
            name,
            description,
            schedule,
            at,
            strategy,
        } => {
            let job = scheduler.create_job(NewJob {
                farm_id,
                name,
                description,
                schedule,
                scheduled_time: at.unwrap_or_else(Utc::now),
                strategy,
            })?;
            print_json(&job)
        }
        Command::List { farm_id } => print_json(&scheduler.list_jobs(&farm_id)?),
        Command::Show { job_id } => {
            let job = scheduler
                .get_job(&job_id)?
                .ok_or_else(|| anyhow!("Job not found: {}", job_id))?;
            print_json(&job)
        }
        Command::UpdateSchedule {
            job_id,
            schedule,
            at,
        } => {
            let job = scheduler
                .update_schedule(&job_id, schedule, at)?
                .ok_or_else(|| anyhow!("Job not found: {}", job_id))?;
            print_json(&job)
        }
        Command::Delete { job_id } => {
            if !scheduler.delete_job(&job_id)? {
                bail!("Job not found: {}", job_id);
            }
            print_json(&serde_json::json!({ "deleted": job_id }))
        }
        Command::Execute { job_id, items } => {
            let items = read_items(&items)?;
            print_json(&scheduler.execute(&job_id, &items)?)
        }
        Command::Pending { at } => {
            let pending = match at {
                Some(at) => scheduler.get_pending_jobs_at(at)?,
                None => scheduler.get_pending_jobs()?,
            };
            print_json(&pending)
        }
        Command::History { farm_id, limit } => {
            let limit = limit.unwrap_or(config.default_history_limit);
            print_json(&scheduler.get_job_history(&farm_id, Some(limit))?)
        }
        Command::Stats { job_id } => match scheduler.get_statistics(&job_id)? {
            Some(stats) => print_json(&stats),
            None => print_json(&JsonValue::Null),
        },
        Command::Cleanup {
            job_id,
            max_results,
        } => {
            let max_results = max_results.unwrap_or(config.max_results_per_job);
            let removed = scheduler.cleanup_results(&job_id, max_results)?;
            print_json(&serde_json::json!({ "job_id": job_id, "removed": removed }))
        }
        Command::Recover => {
            let recovered = scheduler.recover_interrupted_jobs()?;
            print_json(&serde_json::json!({ "recovered": recovered }))
        }
    }
}

fn main() -> Result<()> {
    let cli_args = CliArgs::parse();

    let file_config = match &cli_args.config {
        Some(path) => Some(FileConfig::load(path)?),
        None => None,
    };
    let config = AppConfig::resolve(&cli_args.to_cli_config(), file_config)?;

    // Logs go to stderr so stdout stays machine readable
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(
            EnvFilter::builder()
                .with_default_directive(config.logging_level.level_filter().into())
                .with_env_var("LOG_LEVEL")
                .from_env_lossy(),
        )
        .try_init()
        .context("Failed to initialize logging")?;

    metrics::init_metrics();

    info!("Opening job store database at {:?}...", config.db_path);
    let store = Arc::new(SqliteJobStore::new(&config.db_path)?);
    let migrator = Arc::new(RequiredFieldsMigrator::new(config.required_fields.clone()));
    let scheduler = MigrationScheduler::new(store, migrator);

    run_command(&scheduler, &config, cli_args.command)?;

    if cli_args.print_metrics {
        print!("{}", metrics::gather_metrics());
    }
    Ok(())
}
