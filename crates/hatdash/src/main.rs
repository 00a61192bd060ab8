//! Hatdash - sensor board dashboard

use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Parser, Subcommand};
use hatdash_pipeline::{HardwareProbe, Pipeline, PipelineArgs, ProbeRoots};
use hatdash_web::AppState;
use tokio::net::TcpListener;
use tokio::runtime::Runtime;
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "hatdash")]
#[command(about = "Live sensor streaming, recording and LED display for the sensor board")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a headless recording
    Cli {
        /// Pass remaining arguments to hatdash-cli
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },
    /// Serve the live dashboard
    Serve {
        /// Port to bind to
        #[arg(short, long, default_value_t = 8080)]
        port: u16,

        /// Host to bind to
        #[arg(short = 'H', long, default_value = "0.0.0.0")]
        host: String,

        /// Dashboard files served at /
        #[arg(long, default_value = "crates/hatdash-web/static")]
        static_dir: PathBuf,

        #[command(flatten)]
        pipeline: PipelineArgs,
    },
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Cli { args }) => {
            let cli_args: Vec<&str> = args.iter().map(|s| s.as_str()).collect();
            run_cli(&cli_args)
        }
        Some(Commands::Serve {
            port,
            host,
            static_dir,
            pipeline,
        }) => run_serve(&host, port, &static_dir, pipeline),
        None => run_serve(
            "0.0.0.0",
            8080,
            Path::new("crates/hatdash-web/static"),
            PipelineArgs::default(),
        ),
    }
}

fn run_cli(args: &[&str]) -> anyhow::Result<()> {
    let mut full_args = vec!["hatdash-cli"];
    full_args.extend(args);

    match hatdash_cli::run_cli_main(&full_args) {
        Ok(_) => Ok(()),
        Err(e) => {
            eprintln!("CLI error: {:#}", e);
            std::process::exit(1);
        }
    }
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("shutdown requested"),
        Err(e) => {
            warn!("cannot listen for Ctrl-C: {e}");
            std::future::pending::<()>().await;
        }
    }
}

fn run_serve(host: &str, port: u16, static_dir: &Path, args: PipelineArgs) -> anyhow::Result<()> {
    let config = args.into_config().context("invalid configuration")?;
    let rt = Runtime::new()?;
    rt.block_on(async {
        let probe = HardwareProbe::run(&ProbeRoots::default());
        let pipeline =
            Pipeline::build(&config, &probe).context("no sensor source could be started")?;
        let app = hatdash_web::create_router(
            AppState::new(pipeline.handle(), config.period),
            static_dir,
        );

        let addr: SocketAddr = format!("{}:{}", host, port).parse()?;
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("cannot bind {addr}"))?;

        let (stop_tx, stop_rx) = watch::channel(false);
        let running = pipeline.spawn(stop_rx);

        println!("listening on http://{}", addr);
        info!(%addr, sensor = ?config.sensor, "dashboard started");
        let served = axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await;

        stop_tx.send_replace(true);
        let stats = running.join().await;
        info!(?stats, "pipeline stopped");
        served?;
        Ok(())
    })
}
