mod event;

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use color_eyre::Result;
use color_eyre::eyre::eyre;
use event::{Event, EventHandler};
use telemon::config::{self, load_config, load_config_from_path};
use telemon::report::{Frame, ReportOptions, render_json, render_text};
use telemon::system::{CpuSampler, Engine, MemorySampler, ProcessSampler, SortMode, SourceFactory};

#[derive(Parser)]
#[command(
    name = "telemon",
    about = "Samples CPU, memory and process telemetry in the background and prints each frame"
)]
struct Cli {
    /// Path to config file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Frame rate in milliseconds
    #[arg(long)]
    refresh_rate: Option<u64>,

    /// Sampling interval in milliseconds for every sampler
    #[arg(long)]
    interval: Option<u64>,

    /// Stop after this many frames
    #[arg(long)]
    iterations: Option<u64>,

    /// Process sort: memory, cpu, name, pid
    #[arg(long)]
    sort: Option<String>,

    /// Print one JSON object per frame
    #[arg(long, default_value_t = false)]
    json: bool,

    /// Select this pid once it has been observed
    #[arg(long)]
    select: Option<u32>,

    /// Log level written to stderr
    #[arg(long, default_value = "warn")]
    log_level: tracing::Level,

    /// Write logs as JSON lines
    #[arg(long, default_value_t = false)]
    log_json: bool,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let cli = Cli::parse();
    init_tracing(&cli)?;
    let config = load_config_for_cli(&cli)?;

    run(config, &cli).await
}

fn init_tracing(cli: &Cli) -> Result<()> {
    let builder = tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_max_level(cli.log_level);

    let installed = if cli.log_json {
        tracing::subscriber::set_global_default(builder.json().finish())
    } else {
        tracing::subscriber::set_global_default(builder.finish())
    };
    installed.map_err(|e| eyre!("failed to set tracing subscriber: {e}"))
}

fn load_config_for_cli(cli: &Cli) -> Result<config::Config> {
    let mut config = match &cli.config {
        Some(path) => load_config_from_path(path),
        None => load_config(),
    };

    if let Some(rate) = cli.refresh_rate {
        if rate == 0 {
            return Err(eyre!("--refresh-rate must be greater than 0"));
        }
        config.general.refresh_rate_ms = rate;
    }
    if let Some(interval) = cli.interval {
        if interval == 0 {
            return Err(eyre!("--interval must be greater than 0"));
        }
        config.set_all_intervals(interval);
    }
    if cli.iterations == Some(0) {
        return Err(eyre!("--iterations must be greater than 0"));
    }
    if let Some(ref sort) = cli.sort {
        config.report.default_sort = sort.clone();
    }
    if cli.json {
        config.report.format = "json".to_string();
    }

    Ok(config)
}

async fn run(config: config::Config, cli: &Cli) -> Result<()> {
    let engine = Engine::new(config.engine_settings(), SourceFactory::sysinfo());
    engine.run_all();
    let (cpu, memory, processes) = (engine.cpu(), engine.memory(), engine.processes());

    let options = ReportOptions {
        max_processes: config.report.max_processes,
        sort: SortMode::from_str_config(&config.report.default_sort),
    };
    let json = config.report.format.eq_ignore_ascii_case("json");
    let mut pending_select = cli.select;
    let mut events = EventHandler::new(Duration::from_millis(config.general.refresh_rate_ms));
    let mut frames = 0u64;

    while let Some(event) = events.next().await {
        match event {
            Event::Quit => break,
            Event::Tick => {
                if let Some(pid) = pending_select
                    && processes.num_processes() > 0
                {
                    if !processes.select_process(pid) {
                        tracing::warn!(pid, "cannot select a process that is not running");
                    }
                    pending_select = None;
                }

                println!("{}", render_frame(&cpu, &memory, &processes, &options, json)?);
                if !json {
                    println!();
                }

                frames += 1;
                if cli.iterations.is_some_and(|limit| frames >= limit) {
                    break;
                }
            }
        }
    }

    engine.shutdown();
    Ok(())
}

/// Read every sampler once and render. All holds are released on return.
fn render_frame(
    cpu: &CpuSampler,
    memory: &MemorySampler,
    processes: &ProcessSampler,
    options: &ReportOptions,
    json: bool,
) -> Result<String> {
    let cpu_data = cpu.get_data();
    let memory_data = memory.get_data();
    let process_data = processes.get_data();

    let frame = Frame {
        cpu: cpu_data.as_deref(),
        memory: memory_data.as_deref(),
        processes: process_data.as_deref(),
        own_cpu_load: cpu.current_process_load(),
    };
    if json {
        Ok(render_json(&frame, options)?)
    } else {
        Ok(render_text(&frame, options))
    }
}
