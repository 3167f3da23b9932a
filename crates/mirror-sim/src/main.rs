//! `mirror-sim` command line

use anyhow::Context;
use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use mirror_sim::{run_simulator, run_soak, SimulatorConfig};
use mirror_sync::SyncConfig;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

fn cli() -> Command {
    let config_arg = Arg::new("config")
        .long("config")
        .value_parser(value_parser!(PathBuf))
        .help("Engine configuration file (TOML)");
    let steps_arg = Arg::new("steps")
        .long("steps")
        .default_value("1000")
        .value_parser(value_parser!(u64))
        .help("Number of steps to simulate per seed");
    let checkpoint_arg = Arg::new("checkpoint-every")
        .long("checkpoint-every")
        .default_value("25")
        .value_parser(value_parser!(u64))
        .help("Steps between reconciliation checkpoints");

    Command::new("mirror-sim")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Live tree mirroring simulator")
        .subcommand_required(true)
        .subcommand(
            Command::new("simulate")
                .about("Run one seeded simulation")
                .arg(
                    Arg::new("seed")
                        .long("seed")
                        .default_value("42")
                        .value_parser(value_parser!(u64))
                        .help("Random seed for reproducibility"),
                )
                .arg(steps_arg.clone())
                .arg(checkpoint_arg.clone())
                .arg(config_arg.clone())
                .arg(
                    Arg::new("stop-on-violation")
                        .long("stop-on-violation")
                        .action(ArgAction::SetTrue)
                        .help("Stop simulation on first violation"),
                )
                .arg(
                    Arg::new("json")
                        .long("json")
                        .action(ArgAction::SetTrue)
                        .help("Output as JSON"),
                ),
        )
        .subcommand(
            Command::new("soak")
                .about("Run the simulator over consecutive seeds")
                .arg(
                    Arg::new("seeds")
                        .long("seeds")
                        .default_value("100")
                        .value_parser(value_parser!(u64))
                        .help("Number of seeds to run"),
                )
                .arg(
                    Arg::new("start-seed")
                        .long("start-seed")
                        .default_value("0")
                        .value_parser(value_parser!(u64))
                        .help("First seed"),
                )
                .arg(steps_arg)
                .arg(checkpoint_arg)
                .arg(config_arg),
        )
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    // A subscriber may already be installed by an embedding harness.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn load_sync_config(args: &ArgMatches) -> anyhow::Result<SyncConfig> {
    match args.get_one::<PathBuf>("config") {
        Some(path) => SyncConfig::load(path).with_context(|| format!("loading {}", path.display())),
        None => Ok(SyncConfig::default()),
    }
}

fn base_config(args: &ArgMatches) -> anyhow::Result<SimulatorConfig> {
    Ok(SimulatorConfig {
        steps: args.get_one::<u64>("steps").copied().unwrap_or(1000),
        checkpoint_every: args.get_one::<u64>("checkpoint-every").copied().unwrap_or(25),
        sync: load_sync_config(args)?,
        ..SimulatorConfig::default()
    })
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let matches = cli().get_matches();

    match matches.subcommand() {
        Some(("simulate", args)) => {
            let config = SimulatorConfig {
                seed: args.get_one::<u64>("seed").copied().unwrap_or(42),
                stop_on_first_violation: args.get_flag("stop-on-violation"),
                ..base_config(args)?
            };

            let report = run_simulator(config).await.context("simulation failed to start")?;
            if args.get_flag("json") {
                println!("{}", report.to_json()?);
            } else {
                println!("{}", report.generate_text());
            }

            std::process::exit(if report.passed() { 0 } else { 1 });
        }
        Some(("soak", args)) => {
            let seeds = args.get_one::<u64>("seeds").copied().unwrap_or(100);
            let config = SimulatorConfig {
                seed: args.get_one::<u64>("start-seed").copied().unwrap_or(0),
                ..base_config(args)?
            };

            let report = run_soak(config, seeds).await.context("soak failed to start")?;
            println!("{}", report.generate_text());

            std::process::exit(if report.passed() { 0 } else { 1 });
        }
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_is_well_formed() {
        cli().debug_assert();
    }

    #[test]
    fn test_config_file_overrides_engine_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sync.toml");
        std::fs::write(&path, "event_queue_capacity = 64\n").unwrap();

        let matches = cli()
            .try_get_matches_from(["mirror-sim", "soak", "--config", path.to_str().unwrap(), "--steps", "10"])
            .unwrap();
        let (_, args) = matches.subcommand().unwrap();
        let config = base_config(args).unwrap();

        assert_eq!(config.steps, 10);
        assert_eq!(config.sync.event_queue_capacity, 64);
    }

    #[test]
    fn test_missing_config_file_is_reported() {
        let matches = cli()
            .try_get_matches_from(["mirror-sim", "simulate", "--config", "/nonexistent/sync.toml"])
            .unwrap();
        let (_, args) = matches.subcommand().unwrap();
        assert!(base_config(args).is_err());
    }
}
