use anyhow::Result;
use clap::{Parser, Subcommand};

mod commands;

use commands::{
    check_workers, exec_job, failed_list, job_status, job_submit, queue_list, run_worker,
    stats_show,
};

#[derive(Parser)]
#[command(name = "resque")]
#[command(version)]
#[command(about = "Redis-backed background job workers", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    Worker {
        #[command(subcommand)]
        command: WorkerCommand,
    },
    /// List registered workers and what they are working on.
    #[command(alias = "health")]
    Check {
        #[arg(long)]
        config: Option<String>,
    },
    Queue {
        #[command(subcommand)]
        command: QueueCommand,
    },
    Job {
        #[command(subcommand)]
        command: JobCommand,
    },
    /// Global and per-worker processed/failed counters.
    Stats {
        #[arg(long)]
        config: Option<String>,
    },
    /// Entries on the failed list, newest last.
    Failed {
        #[arg(long)]
        config: Option<String>,
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
}

#[derive(Subcommand)]
enum WorkerCommand {
    Run {
        #[arg(long)]
        config: Option<String>,
        /// Queue to reserve from, highest priority first. Repeatable;
        /// '*' expands to every known queue.
        #[arg(long, action = clap::ArgAction::Append)]
        queue: Vec<String>,
        /// Seconds between polls; 0 runs a single pass.
        #[arg(long)]
        interval: Option<f64>,
        /// Use a blocking multi-queue pop instead of polling.
        #[arg(long, default_value_t = false)]
        blocking: bool,
        /// Number of worker processes to launch.
        #[arg(long, default_value_t = 1)]
        count: usize,
    },
    /// Internal: execute one job from stdin. Spawned per job by `worker run`.
    #[command(hide = true)]
    Exec {
        #[arg(long)]
        config: Option<String>,
    },
}

#[derive(Subcommand)]
enum QueueCommand {
    List {
        #[arg(long)]
        config: Option<String>,
        #[arg(long, default_value_t = false)]
        show_empty: bool,
    },
}

#[derive(Subcommand)]
enum JobCommand {
    Submit {
        class: String,
        #[arg(long)]
        config: Option<String>,
        /// Arguments as a JSON array, e.g. --args '["hi", 2]'.
        #[arg(long)]
        args: Option<String>,
        #[arg(long, default_value = "default")]
        queue: String,
    },
    Status {
        job_id: String,
        #[arg(long)]
        config: Option<String>,
    },
}

async fn dispatch_command(command: Commands) -> Result<()> {
    match command {
        Commands::Worker { command } => match command {
            WorkerCommand::Run {
                config,
                queue,
                interval,
                blocking,
                count,
            } => {
                run_worker(config, queue, interval, blocking, count).await?;
            }
            WorkerCommand::Exec { config } => {
                exec_job(config).await?;
            }
        },
        Commands::Check { config } => {
            check_workers(config).await?;
        }
        Commands::Queue { command } => match command {
            QueueCommand::List { config, show_empty } => {
                queue_list(config, show_empty).await?;
            }
        },
        Commands::Job { command } => match command {
            JobCommand::Submit {
                class,
                config,
                args,
                queue,
            } => {
                job_submit(config, class, args, queue).await?;
            }
            JobCommand::Status { job_id, config } => {
                job_status(config, job_id).await?;
            }
        },
        Commands::Stats { config } => {
            stats_show(config).await?;
        }
        Commands::Failed { config, limit } => {
            failed_list(config, limit).await?;
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    resque::telemetry::init_tracing();
    let cli = Cli::parse();
    dispatch_command(cli.command).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::test_support::RedisTestContext;

    #[tokio::test]
    async fn dispatch_command_covers_read_branches() -> Result<()> {
        let ctx = RedisTestContext::new().await?;
        let config = ctx.write_config().await?;
        let config_path = Some(config.path().to_string_lossy().to_string());

        dispatch_command(Commands::Job {
            command: JobCommand::Submit {
                class: "Echo".to_string(),
                config: config_path.clone(),
                args: Some("[1]".to_string()),
                queue: "dispatch-q".to_string(),
            },
        })
        .await?;

        dispatch_command(Commands::Queue {
            command: QueueCommand::List {
                config: config_path.clone(),
                show_empty: true,
            },
        })
        .await?;

        dispatch_command(Commands::Check {
            config: config_path.clone(),
        })
        .await?;

        dispatch_command(Commands::Stats {
            config: config_path.clone(),
        })
        .await?;

        dispatch_command(Commands::Failed {
            config: config_path.clone(),
            limit: 5,
        })
        .await?;

        dispatch_command(Commands::Worker {
            command: WorkerCommand::Run {
                config: config_path,
                queue: vec!["dispatch-q".to_string()],
                interval: Some(0.0),
                blocking: false,
                count: 1,
            },
        })
        .await?;
        Ok(())
    }
}
