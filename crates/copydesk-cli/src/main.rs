//! Copydesk operator CLI.

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod commands;

use commands::ApiClient;

#[derive(Parser)]
#[command(name = "copydesk")]
#[command(about = "Copydesk content pipeline CLI", long_about = None)]
struct Cli {
    /// API server URL
    #[arg(long, env = "COPYDESK_API_URL", default_value = "http://localhost:3000")]
    api_url: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Control the scheduler tick loop
    Scheduler {
        #[command(subcommand)]
        command: SchedulerCommands,
    },
    /// Manage schedules
    Schedules {
        #[command(subcommand)]
        command: ScheduleCommands,
    },
    /// Start automation for a client now
    Run {
        /// Client ID
        client: String,
        /// Maximum number of items to enqueue
        #[arg(long)]
        limit: Option<u32>,
        /// Refuse to run unless one of the client's schedules is due
        #[arg(long)]
        only_if_due: bool,
    },
    /// Show per-batch progress for a client
    Batches {
        /// Client ID
        client: String,
    },
    /// Move a failed work item back to pending
    Reset {
        /// Work item ID
        work_item: String,
    },
    /// Inspect and control queues
    Queues {
        #[command(subcommand)]
        command: QueueCommands,
    },
    /// Act on individual jobs
    Jobs {
        #[command(subcommand)]
        command: JobCommands,
    },
    /// Show recent activity
    Activity {
        /// Filter by client
        #[arg(long)]
        client: Option<String>,
        /// Maximum number of entries to show
        #[arg(long, default_value = "20")]
        limit: u32,
    },
    /// Validate a system configuration file
    ValidateConfig {
        /// Path to the configuration file
        #[arg(default_value = "copydesk.kdl")]
        path: String,
    },
}

#[derive(Subcommand)]
enum SchedulerCommands {
    /// Start the tick loop
    Start,
    /// Stop the tick loop
    Stop,
    /// Show scheduler status and the last tick
    Status,
}

#[derive(Subcommand)]
enum ScheduleCommands {
    /// List a client's schedules
    List {
        /// Client ID
        client: String,
    },
    /// Create a schedule
    Create {
        /// Client ID
        client: String,
        #[arg(long)]
        name: String,
        /// daily, weekly or monthly
        #[arg(long, default_value = "daily")]
        frequency: String,
        /// Start time, HH:MM
        #[arg(long)]
        at: String,
        #[arg(long, default_value = "1")]
        interval: u32,
        /// Weekdays for weekly schedules, 0 = Sunday
        #[arg(long, value_delimiter = ',')]
        days: Vec<u8>,
        /// Day of month for monthly schedules
        #[arg(long)]
        day_of_month: Option<u8>,
        #[arg(long)]
        jobs_per_run: u32,
    },
    /// Pause a schedule
    Pause { id: String },
    /// Resume a paused schedule
    Resume { id: String },
    /// Delete a schedule
    Delete { id: String },
}

#[derive(Subcommand)]
enum QueueCommands {
    /// Show depth and health of every queue
    List,
    /// Show one queue
    Show { queue: String },
    /// Stop handing out jobs
    Pause { queue: String },
    /// Resume handing out jobs
    Resume { queue: String },
    /// Remove waiting and delayed jobs
    Drain { queue: String },
    /// List failed jobs
    Failed {
        queue: String,
        #[arg(long, default_value = "20")]
        limit: u32,
    },
}

#[derive(Subcommand)]
enum JobCommands {
    /// Requeue a failed job
    Retry { id: String },
    /// Remove a job that is not running
    Remove { id: String },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    if let Commands::ValidateConfig { path } = &cli.command {
        return commands::validate_config(path);
    }
    let api = ApiClient::new(&cli.api_url)?;

    match cli.command {
        Commands::Scheduler { command } => match command {
            SchedulerCommands::Start => commands::scheduler::start(&api).await?,
            SchedulerCommands::Stop => commands::scheduler::stop(&api).await?,
            SchedulerCommands::Status => commands::scheduler::status(&api).await?,
        },
        Commands::Schedules { command } => match command {
            ScheduleCommands::List { client } => {
                commands::schedules::list(&api, &client).await?;
            }
            ScheduleCommands::Create {
                client,
                name,
                frequency,
                at,
                interval,
                days,
                day_of_month,
                jobs_per_run,
            } => {
                let rule = commands::schedules::NewRule {
                    frequency,
                    start_time: at,
                    interval,
                    days_of_week: days,
                    day_of_month,
                };
                commands::schedules::create(&api, &client, &name, rule, jobs_per_run).await?;
            }
            ScheduleCommands::Pause { id } => commands::schedules::pause(&api, &id).await?,
            ScheduleCommands::Resume { id } => commands::schedules::resume(&api, &id).await?,
            ScheduleCommands::Delete { id } => commands::schedules::delete(&api, &id).await?,
        },
        Commands::Run {
            client,
            limit,
            only_if_due,
        } => {
            commands::run::start(&api, &client, limit, only_if_due).await?;
        }
        Commands::Batches { client } => commands::run::batches(&api, &client).await?,
        Commands::Reset { work_item } => commands::run::reset(&api, &work_item).await?,
        Commands::Queues { command } => match command {
            QueueCommands::List => commands::queues::list(&api).await?,
            QueueCommands::Show { queue } => commands::queues::show(&api, &queue).await?,
            QueueCommands::Pause { queue } => commands::queues::pause(&api, &queue).await?,
            QueueCommands::Resume { queue } => commands::queues::resume(&api, &queue).await?,
            QueueCommands::Drain { queue } => commands::queues::drain(&api, &queue).await?,
            QueueCommands::Failed { queue, limit } => {
                commands::queues::failed(&api, &queue, limit).await?;
            }
        },
        Commands::Jobs { command } => match command {
            JobCommands::Retry { id } => commands::queues::retry_job(&api, &id).await?,
            JobCommands::Remove { id } => commands::queues::remove_job(&api, &id).await?,
        },
        Commands::Activity { client, limit } => {
            commands::activity(&api, client.as_deref(), limit).await?;
        }
        Commands::ValidateConfig { .. } => {}
    }

    Ok(())
}
