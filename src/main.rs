#[macro_use]
extern crate log;

use std::path::PathBuf;

use clap::{App, Arg, SubCommand};

use pip_bridge::config::{LoggingConfig, ServiceConfig};
use pip_bridge::master::Master;
use pip_bridge::pip_listener::PipListener;
use pip_bridge::stream_registry::StreamRegistry;

fn configure_logging(config: &LoggingConfig) {
    let level = match config.level.to_lowercase().as_str() {
        "trace" => log::LevelFilter::Trace,
        "debug" => log::LevelFilter::Debug,
        "warn" => log::LevelFilter::Warn,
        "error" => log::LevelFilter::Error,
        _ => log::LevelFilter::Info,
    };
    env_logger::Builder::from_default_env()
        .filter_level(level)
        .init();
}

fn main() {
    let matches = App::new("pip-bridge")
        .about("Bridges a running game's companion-app protocol to live-stream chat")
        .subcommand(
            SubCommand::with_name("master")
                .about("Runs the pip listener, IPC fabric, and chat pool")
                .arg(
                    Arg::with_name("config")
                        .long("config")
                        .takes_value(true)
                        .required(true),
                ),
        )
        .subcommand(
            SubCommand::with_name("worker")
                .about("Connects to a running master and hosts bots for its assigned streams")
                .arg(
                    Arg::with_name("config")
                        .long("config")
                        .takes_value(true)
                        .required(true),
                )
                .arg(
                    Arg::with_name("ipc")
                        .long("ipc")
                        .takes_value(true)
                        .required(true),
                ),
        )
        .get_matches();

    match matches.subcommand() {
        ("master", Some(sub)) => run_master(sub.value_of("config").unwrap()),
        ("worker", Some(sub)) => {
            run_worker(sub.value_of("config").unwrap(), sub.value_of("ipc").unwrap())
        }
        _ => {
            eprintln!("{}", matches.usage());
            std::process::exit(1);
        }
    }
}

fn run_master(config_path: &str) {
    let config = ServiceConfig::load(config_path).unwrap_or_else(|e| {
        eprintln!("config error: {}", e);
        std::process::exit(1);
    });
    configure_logging(&config.logging);

    let registry = StreamRegistry::from_config(&config).unwrap_or_else(|e| {
        error!("{}", e);
        std::process::exit(1);
    });
    let worker_count = config.worker_count;
    let listen_addr = config.listen.clone();
    let config_path = PathBuf::from(config_path);

    let mut rt = tokio::runtime::Runtime::new().expect("failed to start tokio runtime");
    rt.block_on(async move {
        let master = Master::start(registry, config_path, worker_count).unwrap_or_else(|e| {
            error!("failed to start master: {}", e);
            std::process::exit(1);
        });

        let listener = PipListener::bind(&listen_addr).await.unwrap_or_else(|e| {
            error!("failed to bind pip listener on {}: {}", listen_addr, e);
            std::process::exit(1);
        });
        info!("pip listener bound on {}", listen_addr);
        let listener = listener.spawn(master.clone());

        wait_for_shutdown_signal().await;
        info!("shutdown signal received, stopping");
        listener.stop().await;
        master.stop();
    });
}

fn run_worker(config_path: &str, sock_path: &str) {
    let config = ServiceConfig::load(config_path).unwrap_or_else(|e| {
        eprintln!("config error: {}", e);
        std::process::exit(1);
    });
    configure_logging(&config.logging);
    pip_bridge::worker_main::run(config, std::path::Path::new(sock_path));
}

#[cfg(unix)]
async fn wait_for_shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};
    let mut sigterm = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
    let mut sigint = signal(SignalKind::interrupt()).expect("failed to install SIGINT handler");
    tokio::select! {
        _ = sigterm.recv() => {}
        _ = sigint.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal() {
    tokio::signal::ctrl_c().await.ok();
}
