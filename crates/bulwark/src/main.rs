//! `bulwark` command line: print default configuration, run a failure simulation

use anyhow::Context;
use bulwark::guard::{RecoveryOptions, RetryConfig};
use bulwark::degrade::ServiceConfig;
use bulwark::{init_tracing, ConfigFormat, Resilience, ResilienceConfig};
use clap::{value_parser, Arg, Command};
use std::path::PathBuf;
use std::time::Duration;

const SIMULATED_SERVICE: &str = "database";

#[derive(Debug, thiserror::Error)]
#[error("simulated failure: connection refused")]
struct SimulatedFailure;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Command::new("bulwark")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Resilience core: circuit breaker, health monitor, graceful degradation")
        .subcommand_required(true)
        .arg_required_else_help(true)
        .subcommand(
            Command::new("config")
                .about("Print the default configuration")
                .arg(
                    Arg::new("format")
                        .long("format")
                        .default_value("toml")
                        .value_parser(["toml", "yaml"])
                        .help("Output format"),
                ),
        )
        .subcommand(
            Command::new("simulate")
                .about("Run a scripted failure scenario and print the resulting status as JSON")
                .arg(
                    Arg::new("config")
                        .long("config")
                        .value_parser(value_parser!(PathBuf))
                        .help("Configuration file (.toml, .yaml or .yml)"),
                )
                .arg(
                    Arg::new("failures")
                        .long("failures")
                        .default_value("6")
                        .value_parser(value_parser!(u32))
                        .help("Number of failing calls to make"),
                ),
        );

    let matches = cli.get_matches();

    match matches.subcommand() {
        Some(("config", args)) => {
            let format: ConfigFormat = args
                .get_one::<String>("format")
                .map_or("toml", String::as_str)
                .parse()?;
            print!("{}", ResilienceConfig::default().render(format)?);
        }
        Some(("simulate", args)) => {
            let config = match args.get_one::<PathBuf>("config") {
                Some(path) => ResilienceConfig::from_file(path)
                    .with_context(|| format!("loading {}", path.display()))?,
                None => ResilienceConfig::default(),
            };
            let failures = args.get_one::<u32>("failures").copied().unwrap_or(6);

            init_tracing(&config.telemetry);
            let report = simulate(&config, failures).await?;
            println!("{report}");
        }
        _ => anyhow::bail!("unknown subcommand"),
    }

    Ok(())
}

async fn simulate(config: &ResilienceConfig, failures: u32) -> anyhow::Result<String> {
    let resilience = Resilience::new(config)?;
    let controller = resilience.controller();
    if controller.service_status(SIMULATED_SERVICE).is_none() {
        controller.register_service(ServiceConfig::new(SIMULATED_SERVICE).essential())?;
    }

    // keep the run short whatever the configured delays are
    let retry = RetryConfig {
        base_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(10),
        ..config.retry
    };

    for call in 1..=failures {
        let result: Result<(), _> = resilience
            .call(
                SIMULATED_SERVICE,
                RecoveryOptions::new().with_retry(retry),
                || async { Err(SimulatedFailure) },
            )
            .await;
        if let Err(error) = result {
            tracing::info!(call, error = %error, "simulated call failed");
        }
    }

    Ok(serde_json::to_string_pretty(&resilience.status())?)
}
