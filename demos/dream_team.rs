use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use dreamteam::registry::AgentRegistry;
use dreamteam::render::{render_event, render_outcome, SAMPLE_TASKS};
use dreamteam::session::{RunController, RunServices};
use dreamteam::{DreamTeamConfig, ExecutionMode, TeamConfig};

// Run from the root folder of the repo as follows:
// AZURE_OPENAI_ENDPOINT=https://your-resource.openai.azure.com AZURE_OPENAI_API_KEY=... \
//   cargo run --example dream_team -- --run-locally --task "Generate a Python script and execute Fibonacci sequence below 1000"

/// Run the Dream Team against one task and print the transcript as it streams.
#[derive(Parser, Debug)]
#[command(name = "dream_team")]
struct Args {
    /// Task for the team. Defaults to the first sample task.
    #[arg(short, long)]
    task: Option<String>,

    /// Execute code in a local container instead of the remote session pool.
    #[arg(long)]
    run_locally: bool,

    /// Directory for logs, downloads and the local sandbox.
    #[arg(long)]
    logs_dir: Option<PathBuf>,

    /// Saved agent definitions. The builtin team is used when absent.
    #[arg(long)]
    agents: Option<PathBuf>,

    #[arg(long, default_value_t = 50)]
    max_rounds: usize,

    /// Wall-clock limit in minutes.
    #[arg(long, default_value_t = 25)]
    max_time: u64,

    #[arg(long, default_value_t = 5)]
    max_stalls: usize,

    #[arg(long)]
    save_screenshots: bool,
}

#[tokio::main]
async fn main() {
    dreamteam::init_logger();
    let args = Args::parse();

    let mut config = DreamTeamConfig::from_env().with_save_screenshots(args.save_screenshots);
    if args.run_locally {
        config = config.with_execution_mode(ExecutionMode::Local);
    }
    if let Some(logs_dir) = args.logs_dir {
        config = config.with_logs_dir(logs_dir);
    }

    let registry = match &args.agents {
        Some(path) => AgentRegistry::load_from(path).expect("Failed to load agent definitions"),
        None => {
            let mut registry = AgentRegistry::new();
            registry.restore_defaults();
            registry
        }
    };
    let team = TeamConfig::new(registry.specs().to_vec())
        .with_max_rounds(args.max_rounds)
        .with_max_wall_time(Duration::from_secs(args.max_time * 60))
        .with_max_stalls_before_replan(args.max_stalls);

    let services = RunServices::from_config(config).expect("Incomplete model configuration");
    let mut controller = RunController::new(services);

    let task = args.task.unwrap_or_else(|| SAMPLE_TASKS[0].to_string());
    println!("👤 user\n{}\n", task);

    let mut handle = match controller.start_run(&task, &team).await {
        Ok(handle) => handle,
        Err(e) => {
            eprintln!("{}", e);
            std::process::exit(1);
        }
    };

    loop {
        tokio::select! {
            event = handle.events.next() => match event {
                Some(event) => println!("{}", render_event(&event)),
                None => break,
            },
            _ = tokio::signal::ctrl_c() => {
                controller.cancel_run(&handle);
                break;
            }
        }
    }

    let state = controller.finish(handle).await;
    println!("{}", render_outcome(state));
}
