use clap::Parser;
use dispatchd::cli::Cli;
use dispatchd::config::{load_settings_file, select_settings_group};
use dispatchd::handlers::HandlerManager;
use dispatchd::server::{cooperative, event_loop, worker_pool, Dispatcher, ExecutionModel};
use log::{error, info};
use std::net::SocketAddr;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

fn main() -> ExitCode {
    env_logger::init();
    let cli = Cli::parse();

    let model = match cli.execution_model() {
        Ok(model) => model,
        Err(reason) => {
            error!("{reason}");
            return ExitCode::FAILURE;
        }
    };

    let settings = match load_settings_file(&cli.settings_file) {
        Ok(settings) => settings,
        Err(err) => {
            error!("{err}");
            return ExitCode::FAILURE;
        }
    };
    let group = match select_settings_group(&settings, &cli.settings) {
        Ok(group) => group,
        Err(err) => {
            error!("{err}");
            return ExitCode::FAILURE;
        }
    };
    let handlers = match HandlerManager::build(group) {
        Ok(handlers) => handlers,
        Err(err) => {
            error!("{err}");
            return ExitCode::FAILURE;
        }
    };

    let dispatcher = Arc::new(Dispatcher::new(handlers));
    let addr = SocketAddr::from(([0, 0, 0, 0], cli.port));

    let shutdown = Arc::new(AtomicBool::new(false));
    for sig in [signal_hook::consts::SIGINT, signal_hook::consts::SIGTERM] {
        if let Err(err) = signal_hook::flag::register(sig, shutdown.clone()) {
            error!("failed to register signal handler: {err}");
            return ExitCode::FAILURE;
        }
    }

    info!(
        "listening on {addr} (settings={}, model={:?})",
        cli.settings, model
    );

    let result = match model {
        ExecutionModel::EventLoop => {
            event_loop::run(addr, &dispatcher, || shutdown.load(Ordering::Relaxed))
        }
        ExecutionModel::WorkerPool => {
            worker_pool::run(addr, dispatcher.clone(), || shutdown.load(Ordering::Relaxed))
        }
        ExecutionModel::Cooperative => {
            match cooperative::Scheduler::bind(addr, dispatcher.clone()) {
                Ok(mut scheduler) => scheduler.run(|| shutdown.load(Ordering::Relaxed)),
                Err(err) => Err(err),
            }
        }
    };

    match result {
        Ok(()) => {
            info!("shutting down: {}", dispatcher.stats.snapshot());
            ExitCode::SUCCESS
        }
        Err(err) => {
            error!("server error: {err}");
            ExitCode::FAILURE
        }
    }
}
