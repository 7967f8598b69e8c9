use std::{path::PathBuf, time::Duration};

use clap::{Parser, Subcommand};
use futures::StreamExt;
use media_bus::SourceLocator;

use crate::{
    config::{AppConfig, PublishSettings},
    job::JobState,
    manager::JobManager,
};

mod config;
mod job;
mod manager;

#[derive(Parser, Debug)]
#[command(author, version, about = "Normalize videos into a content-addressed store", long_about = None)]
struct Args {
    /// Root of the storage, processing and index locations
    #[arg(long, env = "REFRAME_DATA_DIR", default_value = "reframe-data", global = true)]
    data_dir: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Process a video and print each state change as a JSON line
    Run {
        source: PathBuf,

        /// Keep the source's audio track
        #[arg(long)]
        audio: bool,

        /// Delay of each simulated publish step in milliseconds
        #[arg(long, default_value_t = 20)]
        publish_step_ms: u64,

        /// Write the latest progress thumbnail to this JPEG file
        #[arg(long)]
        thumbnail: Option<PathBuf>,

        /// Print only the final state
        #[arg(long, short)]
        quiet: bool,
    },
    /// Delete every stored output and empty the origin index
    Clear,
    /// Print the origin index as JSON lines
    List,
}

fn init_logging() {
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .filter_module("media_bus", log::LevelFilter::Debug)
        .filter_module("media_store", log::LevelFilter::Debug)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logging();
    let args = Args::parse();
    let config = AppConfig::new(args.data_dir);

    match args.command {
        Command::Run {
            source,
            audio,
            publish_step_ms,
            thumbnail,
            quiet,
        } => {
            let config = config.with_publish(PublishSettings {
                step_delay: Duration::from_millis(publish_step_ms),
                ..PublishSettings::default()
            });
            let state = run(&config, source, audio, thumbnail, quiet).await?;
            if let JobState::Error { .. } = state {
                std::process::exit(1);
            }
        }
        Command::Clear => {
            let manager = JobManager::open(&config).await?;
            manager.clear_storage().await?;
        }
        Command::List => {
            let manager = JobManager::open(&config).await?;
            for entry in manager.store().entries().await? {
                let line = serde_json::json!({
                    "origin_hash": entry.origin.hash,
                    "with_audio": entry.origin.with_audio,
                    "content_hash": entry.content_hash,
                });
                println!("{}", line);
            }
        }
    }
    Ok(())
}

async fn run(
    config: &AppConfig,
    source: PathBuf,
    with_audio: bool,
    thumbnail_out: Option<PathBuf>,
    quiet: bool,
) -> anyhow::Result<JobState> {
    let manager = JobManager::open(config).await?;
    let descriptor = manager
        .init_job(SourceLocator::file(source), with_audio)
        .await;
    let job = manager
        .job(&descriptor)
        .await
        .ok_or_else(|| anyhow::anyhow!("job {} not registered", descriptor))?;

    if quiet {
        let state = tokio::select! {
            state = job.wait_settled() => state,
            _ = tokio::signal::ctrl_c() => {
                job.cancel();
                anyhow::bail!("interrupted");
            }
        };
        println!("{}", serde_json::to_string(&state)?);
        return Ok(state);
    }

    let mut updates = job.subscribe();
    let mut thumbnail = None;
    loop {
        let state = tokio::select! {
            state = updates.next() => match state {
                Some(state) => state,
                None => return Ok(job.state()),
            },
            _ = tokio::signal::ctrl_c() => {
                job.cancel();
                anyhow::bail!("interrupted");
            }
        };
        println!("{}", serde_json::to_string(&state)?);
        if let JobState::InProgress {
            thumbnail: Some(latest),
            ..
        } = &state
        {
            thumbnail = Some(latest.clone());
        }
        if state.is_settled() {
            if let (Some(path), Some(latest)) = (&thumbnail_out, &thumbnail) {
                tokio::fs::write(path, &latest.jpeg).await?;
            }
            return Ok(state);
        }
    }
}
