mod config;
mod probe;
mod report;
#[cfg(feature = "serve")]
mod serve;
mod signals;
mod status;
mod view;
mod worker;

use clap::{Args, Parser, Subcommand};
use config::KeepaliveConfig;
use signals::ShutdownRequest;
use status::StatusFile;
use std::path::PathBuf;
use tokio::sync::mpsc;
use view::RunView;
use worker::{KeepAliveWorker, WorkerEvent};

/// Keeps a disk from spinning down by reading one byte from a file on it
/// at a fixed interval.
#[derive(Parser, Debug)]
#[command(name = "keepalive", version, about)]
pub struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Config file path
    #[arg(short, long, global = true, default_value = "keepalive.toml")]
    config: PathBuf,

    /// Validate config and print resolved settings, don't run
    #[arg(long, global = true)]
    dry_run: bool,

    /// Extra logging (countdown ticks, probe results)
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Only print errors
    #[arg(short, long, global = true)]
    quiet: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Probe the target in the foreground until stopped
    Run(ProbeArgs),
    /// Serve the start/stop/status API over HTTP
    #[cfg(feature = "serve")]
    Serve {
        #[command(flatten)]
        probe: ProbeArgs,

        /// Bind address (overrides config)
        #[arg(long)]
        bind: Option<String>,

        /// Port (overrides config)
        #[arg(long)]
        port: Option<u16>,
    },
}

#[derive(Args, Debug, Default)]
struct ProbeArgs {
    /// File on the disk to keep awake (overrides config)
    #[arg(value_name = "TARGET")]
    target: Option<PathBuf>,

    /// Seconds between probes (overrides config)
    #[arg(short, long)]
    interval: Option<u64>,

    /// Total run time in minutes, 0 for no limit (overrides config)
    #[arg(short, long)]
    duration: Option<u64>,

    /// Write a JSON status file here (overrides config)
    #[arg(long)]
    status_file: Option<PathBuf>,
}

fn apply_overrides(config: &mut KeepaliveConfig, args: &ProbeArgs) {
    if let Some(target) = &args.target {
        config.probe.target = Some(target.clone());
    }
    if let Some(interval) = args.interval {
        config.probe.interval_secs = interval;
    }
    if let Some(duration) = args.duration {
        config.probe.max_duration_mins = duration;
    }
    if let Some(path) = &args.status_file {
        config.status.file = Some(path.clone());
    }
}

fn print_settings(config: &KeepaliveConfig) {
    let target = config
        .probe
        .target
        .as_ref()
        .map(|p| p.display().to_string())
        .unwrap_or_else(|| "(none)".to_string());
    println!("target:        {target}");
    println!("interval:      {}s", config.probe.interval_secs);
    match config.probe.max_duration_mins {
        0 => println!("max duration:  unlimited"),
        mins => println!("max duration:  {mins} min"),
    }
    if let Some(path) = &config.status.file {
        println!("status file:   {}", path.display());
    }
}

fn init_tracing(verbose: bool, quiet: bool) {
    let default_level = if verbose {
        "keepalive=debug"
    } else if quiet {
        "keepalive=warn"
    } else {
        "keepalive=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with_target(false)
        .init();
}

/// Run the keep-alive loop in the foreground. Returns the process exit code.
async fn run_foreground(
    config: &KeepaliveConfig,
    quiet: bool,
) -> Result<i32, Box<dyn std::error::Error>> {
    let target = config
        .probe
        .target
        .clone()
        .ok_or("no target file given: pass TARGET or set [probe] target")?;
    let run_config = config.run_config();

    let (tx, mut events) = mpsc::unbounded_channel();
    let mut worker = KeepAliveWorker::new(tx);
    let resolved = worker.start(&target, run_config)?;

    let status = config.status.file.clone().map(StatusFile::new);
    let mut view = RunView::default();
    view.begin(&resolved, run_config);
    if let Some(status) = &status {
        status.update(worker.phase(), &view);
    }

    if !quiet {
        let limit = match run_config.max_duration_mins {
            0 => "until stopped".to_string(),
            mins => format!("for {mins} min"),
        };
        println!(
            "keeping {} awake: one read every {}s, {limit}",
            resolved.display(),
            run_config.interval_secs
        );
    }

    let mut shutdown = signals::install()?;
    let terminal = loop {
        tokio::select! {
            event = events.recv() => {
                // The worker holds a sender for as long as it lives
                let Some(event) = event else { return Ok(1) };
                view.apply(&event);
                report::report(&event, quiet);
                if let Some(status) = &status {
                    if !matches!(event, WorkerEvent::CountdownTick { .. }) {
                        status.update(worker.phase(), &view);
                    }
                }
                if event.is_terminal() {
                    break event;
                }
            }
            Some(request) = shutdown.recv() => match request {
                ShutdownRequest::Graceful => {
                    worker.stop();
                    if !quiet {
                        eprintln!("stopping after the current tick (press Ctrl-C again to exit now)");
                    }
                }
                ShutdownRequest::Immediate => {
                    if let Some(status) = &status {
                        status.remove();
                    }
                    return Ok(130);
                }
            },
        }
    };

    worker.wait().await;
    if let Some(status) = &status {
        status.remove();
    }

    Ok(match terminal {
        WorkerEvent::ProbeFailed { .. } => 1,
        _ => 0,
    })
}

async fn execute(cli: Cli) -> Result<i32, Box<dyn std::error::Error>> {
    let mut config = KeepaliveConfig::load(&cli.config)?;

    match cli.command {
        Command::Run(args) => {
            apply_overrides(&mut config, &args);
            if cli.dry_run {
                print_settings(&config);
                config.run_config().validate()?;
                return Ok(0);
            }
            run_foreground(&config, cli.quiet).await
        }
        #[cfg(feature = "serve")]
        Command::Serve { probe, bind, port } => {
            apply_overrides(&mut config, &probe);
            if let Some(bind) = bind {
                config.serve.bind = bind;
            }
            if let Some(port) = port {
                config.serve.port = port;
            }
            if cli.dry_run {
                print_settings(&config);
                println!("listen:        {}:{}", config.serve.bind, config.serve.port);
                config.run_config().validate()?;
                return Ok(0);
            }
            serve::run(&config).await
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.quiet);
    tracing::debug!(?cli, "parsed CLI arguments");

    let code = match execute(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {e}");
            1
        }
    };
    std::process::exit(code);
}
