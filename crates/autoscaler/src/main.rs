//! autoscaler — control loop entry point.

use autoscale_config::Settings;
use autoscaler::Scheduler;
use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "autoscaler")]
#[command(about = "Autoscaling control loop for a two-tier VM/DB fleet")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the control loop (default if no subcommand is given).
    Run,
    /// Load configuration from the environment and print it, without starting the loop.
    CheckConfig,
}

fn init_logging() {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive("autoscaler=info".parse().expect("valid directive")))
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_logging();

    let cli = Cli::parse();
    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => run().await,
        Commands::CheckConfig => check_config(),
    }
}

async fn run() -> anyhow::Result<()> {
    let settings = Settings::from_env()?;
    tracing::info!(host = %settings.host, prod = settings.prod, sleep_second = settings.sleep_second, "autoscaler starting");
    let mut scheduler = Scheduler::new(settings);
    scheduler.run().await
}

fn check_config() -> anyhow::Result<()> {
    let settings = Settings::from_env()?;
    println!("host:                 {}", settings.host);
    println!("max_load:             {}", settings.max_load);
    println!("pod_load_max:         {}", settings.pod_load_max);
    println!("pod_load_max_percent: {}", settings.pod_load_max_percent());
    println!("delta:                {}", settings.delta);
    println!("gap:                  {}", settings.gap);
    println!("penalty:              {}", settings.penalty);
    println!("sleep_second:         {}", settings.sleep_second);
    println!("memory_size:          {}", settings.memory_size);
    println!("train_size:           {}", settings.train_size);
    println!("max_data_size:        {}", settings.max_data_size);
    println!("min_memory_size:      {}", settings.min_memory_size);
    println!("prod:                 {}", settings.prod);
    println!("request_timeout_secs: {}", settings.request_timeout_secs);
    Ok(())
}
