use clap::Parser;
use tracing_subscriber::EnvFilter;

use taxmatrix::api::{AppState, Cli, Command, build_run_config, load_policies};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    match Cli::parse().command {
        Command::Run(args) => {
            let config = match build_run_config(args) {
                Ok(config) => config,
                Err(msg) => exit_with(&msg),
            };
            let policies = match load_policies(config.policy.as_deref()) {
                Ok(policies) => policies,
                Err(msg) => exit_with(&msg),
            };
            let report = match taxmatrix::api::run_batch(&config, &policies) {
                Ok(report) => report,
                Err(e) => exit_with(&e.to_string()),
            };
            match serde_json::to_string_pretty(&report) {
                Ok(json) => println!("{json}"),
                Err(e) => exit_with(&format!("failed to encode report: {e}")),
            }
            if report.within_tolerance == Some(false) {
                std::process::exit(2);
            }
        }
        Command::Serve(args) => {
            let state = match load_policies(args.policy.as_deref())
                .and_then(|policies| AppState::new(policies).map_err(|e| e.to_string()))
            {
                Ok(state) => state,
                Err(msg) => exit_with(&msg),
            };
            if let Err(e) = taxmatrix::api::run_http_server(args.port, state).await {
                exit_with(&format!("Server error: {e}"));
            }
        }
    }
}

fn exit_with(msg: &str) -> ! {
    eprintln!("Error: {msg}");
    std::process::exit(1);
}
