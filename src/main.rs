use async_workers::{
    BoxError, Config, DirSource, IterSource, Outcome, ResultSet, TaskContext, TaskFn, WorkerPoolInner,
};
use clap::{Args, Parser, Subcommand};
use regex::Regex;
use std::{fmt::Debug, path::PathBuf, sync::Arc, time::Duration};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(version, about = "Run a batch of tasks on a bounded worker pool")]
struct Cli {
    #[command(flatten)]
    pool: PoolArgs,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args, Debug)]
struct PoolArgs {
    /// Degree of parallelism
    #[arg(long, default_value_t = num_cpus::get())]
    dop: usize,

    /// Stop the batch after this many successes
    #[arg(long)]
    quota: Option<usize>,

    /// Per-task timeout in milliseconds
    #[arg(long, default_value_t = 30_000)]
    task_timeout_ms: u64,

    /// Deadline for the whole batch in milliseconds
    #[arg(long)]
    global_timeout_ms: Option<u64>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Simulated tasks that sleep and sometimes fail
    Simulate {
        #[arg(long, default_value_t = 20)]
        tasks: usize,

        /// Base task duration; task i sleeps base * (1 + i % 5)
        #[arg(long, default_value_t = 100)]
        task_ms: u64,

        /// Every n-th task fails (0 disables failures)
        #[arg(long, default_value_t = 0)]
        fail_every: usize,
    },
    /// Count lines matching a word in files under a directory
    Grep {
        root: PathBuf,

        /// Regex applied to file names
        name_pattern: String,

        /// Regex searched in file contents
        #[arg(short = 'e', long)]
        word: String,
    },
}

impl PoolArgs {
    fn config(&self) -> Config {
        let mut config = Config::default()
            .with_dop(self.dop)
            .with_task_timeout(Duration::from_millis(self.task_timeout_ms));
        if let Some(quota) = self.quota {
            config = config.with_quota(quota);
        }
        if let Some(ms) = self.global_timeout_ms {
            config = config.with_global_timeout(Duration::from_millis(ms));
        }
        config
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(true)
        .init();

    let cli = Cli::parse();
    let pool = WorkerPoolInner::with_config(cli.pool.config())?;

    match cli.command {
        Command::Simulate { tasks, task_ms, fail_every } => {
            let source = IterSource::new((0..tasks).map(move |i| {
                let pause = Duration::from_millis(task_ms * (1 + (i % 5) as u64));
                let fails = fail_every > 0 && (i + 1) % fail_every == 0;
                TaskFn::boxed(format!("sleep #{i} {pause:?}"), move |_ctx: TaskContext| async move {
                    tokio::time::sleep(pause).await;
                    if fails {
                        return Err::<Duration, BoxError>(format!("task {i} failed on purpose").into());
                    }
                    Ok(pause)
                })
            }));
            let result = pool.run(source).await?;
            report(&result);
        }
        Command::Grep { root, name_pattern, word } => {
            let word = Arc::new(Regex::new(&word)?);
            let source = DirSource::new(&root, &name_pattern, move |path: PathBuf| {
                let word = Arc::clone(&word);
                TaskFn::boxed(path.display().to_string(), move |ctx: TaskContext| async move {
                    let text = tokio::fs::read_to_string(&path).await?;
                    let matches = text.lines().filter(|line| word.is_match(line)).count();
                    info!(worker = ctx.worker_id(), path = %path.display(), matches, "file scanned");
                    Ok::<usize, BoxError>(matches)
                })
            })?;
            let result = pool.run(source).await?;
            report(&result);
        }
    }

    Ok(())
}

fn report<T: Debug>(result: &ResultSet<T>) {
    println!("Winners:");
    for outcome in &result.winners {
        print_outcome(outcome);
    }
    println!("\nLosers:");
    for outcome in &result.losers {
        print_outcome(outcome);
    }
    println!();
    for worker in &result.workers {
        println!(
            "Worker #{} completed {} tasks in {:?}",
            worker.id, worker.tasks_completed, worker.total_busy
        );
    }
    info!("{}", result.summary());
}

fn print_outcome<T: Debug>(outcome: &Outcome<T>) {
    let worker = outcome
        .worker_id
        .map_or_else(|| "-".to_string(), |id| format!("#{id}"));
    match &outcome.result {
        Ok(value) => println!("{:>12?}\t{:<4}\t{:<40}\t{:?}", outcome.elapsed, worker, outcome.description, value),
        Err(e) => println!("{:>12?}\t{:<4}\t{:<40}\t{}", outcome.elapsed, worker, outcome.description, e),
    }
}
