//! Process entry point: parses flags, loads the plan, and runs the proxy's
//! data plane and control plane concurrently until killed (§6, "CLI").

use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use rfault_core::acceptor::{self, DialingPool};
use rfault_core::applier::ApplyOptions;
use rfault_helpers::logging::{self, Verbosity};
use rfault_helpers::rng::{PercentGate, ThreadRngGate};
use tokio::net::TcpListener;
use tracing::{error, info};

/// A fault-injecting TCP proxy for Redis traffic.
#[derive(Debug, Parser)]
#[command(version, about, long_about = None)]
struct Args {
    /// Plan file describing the fault-injection rules (JSON). An empty
    /// plan is used if omitted.
    #[arg(long, value_name = "PATH")]
    plan: Option<String>,

    /// Upstream Redis address to proxy to.
    #[arg(long, value_name = "HOST:PORT")]
    redis: String,

    /// Address the proxy listens on for client connections.
    #[arg(long, value_name = "HOST:PORT")]
    addr: String,

    /// Address the control-plane HTTP API listens on.
    #[arg(long, value_name = "HOST:PORT")]
    api: String,

    /// Verbosity: repeated `v` characters increase the log level
    /// (`""`, `"v"`, `"vv"`).
    #[arg(long, default_value = "")]
    log: String,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    if logging::setup_tracing(Verbosity::from_flag(&args.log)).is_err() {
        // A subscriber may already be installed (e.g. under test harnesses);
        // proceeding without one is not fatal.
    }

    let plan = match &args.plan {
        Some(path) => match rfault_plan_loader::load_plan_file(path) {
            Ok(plan) => plan,
            Err(err) => {
                error!(error = %err, "failed to load plan file");
                return ExitCode::FAILURE;
            }
        },
        None => rfault_plan_loader::empty_plan(),
    };
    let plan = Arc::new(plan);

    let listener = match TcpListener::bind(&args.addr).await {
        Ok(listener) => listener,
        Err(err) => {
            error!(error = %err, addr = %args.addr, "failed to bind proxy listen address");
            return ExitCode::FAILURE;
        }
    };
    let api_listener = match TcpListener::bind(&args.api).await {
        Ok(listener) => listener,
        Err(err) => {
            error!(error = %err, addr = %args.api, "failed to bind control-api listen address");
            return ExitCode::FAILURE;
        }
    };

    info!(addr = %args.addr, redis = %args.redis, api = %args.api, "starting rfault");

    let pool = Arc::new(DialingPool::new(args.redis.clone()));
    let gate: Arc<dyn PercentGate> = Arc::new(ThreadRngGate::new());
    let apply_opts = ApplyOptions::default();

    let data_plane = tokio::spawn(acceptor::run(
        listener,
        Arc::clone(&plan),
        pool,
        gate,
        apply_opts,
    ));

    let control_router = rfault_control_api::router(Arc::clone(&plan));
    let control_plane = tokio::spawn(async move {
        axum::serve(api_listener, control_router).await
    });

    tokio::select! {
        res = data_plane => {
            if let Err(err) = res {
                error!(error = %err, "data plane task panicked");
            }
        }
        res = control_plane => {
            match res {
                Ok(Err(err)) => error!(error = %err, "control-api server failed"),
                Err(err) => error!(error = %err, "control-api task panicked"),
                Ok(Ok(())) => {}
            }
        }
    }

    ExitCode::SUCCESS
}
