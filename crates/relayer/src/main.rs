use anyhow::{Context, Result};
use clap::{crate_version, App, Arg, SubCommand};
use pn_config::Config;
use pn_relayer::{runner, trace};
use std::{fs, path::Path};

const COMMAND_RUN: &str = "run";
const COMMAND_EXAMPLE_CONFIG: &str = "generate-example-config";
const ARG_OUTPUT_PATH: &str = "output-path";
const ARG_CONFIG: &str = "config";
const ARG_FROM_PRIMARY_BLOCK: &str = "from-primary-block";
const ARG_FROM_APP_BLOCK: &str = "from-app-block";

fn read_config<P: AsRef<Path>>(path: P) -> Result<Config> {
    let content = fs::read(&path)
        .with_context(|| format!("read config file from {}", path.as_ref().to_string_lossy()))?;
    let config = toml::from_slice(&content).with_context(|| "parse config file")?;
    Ok(config)
}

fn generate_example_config<P: AsRef<Path>>(path: P) -> Result<()> {
    let mut config = Config::default();
    config.protocol.fee_rates.push(Default::default());
    let content = toml::to_string_pretty(&config)?;
    fs::write(path, content)?;
    Ok(())
}

async fn run_cli() -> Result<()> {
    let app = App::new("pn-relayer")
        .about("Provider side relayer of the payment channel network.")
        .version(crate_version!())
        .subcommand(
            SubCommand::with_name(COMMAND_RUN)
                .about("Run the relayer")
                .arg(
                    Arg::with_name(ARG_CONFIG)
                        .short("c")
                        .takes_value(true)
                        .required(true)
                        .default_value("./config.toml")
                        .help("The config file path"),
                )
                .arg(
                    Arg::with_name(ARG_FROM_PRIMARY_BLOCK)
                        .long(ARG_FROM_PRIMARY_BLOCK)
                        .takes_value(true)
                        .help("Scan the primary chain from this block instead of the checkpoint"),
                )
                .arg(
                    Arg::with_name(ARG_FROM_APP_BLOCK)
                        .long(ARG_FROM_APP_BLOCK)
                        .takes_value(true)
                        .help("Scan the application chain from this block instead of the checkpoint"),
                )
                .display_order(0),
        )
        .subcommand(
            SubCommand::with_name(COMMAND_EXAMPLE_CONFIG)
                .about("Generate an example config file")
                .arg(
                    Arg::with_name(ARG_OUTPUT_PATH)
                        .short("o")
                        .takes_value(true)
                        .required(true)
                        .default_value("./config.example.toml")
                        .help("The path of the example config file"),
                )
                .display_order(1),
        );

    let matches = app.get_matches();
    match matches.subcommand() {
        (COMMAND_RUN, Some(m)) => {
            let config_path = m.value_of(ARG_CONFIG).unwrap_or("./config.toml");
            let config = read_config(&config_path)?;
            let from_primary: Option<u64> = m
                .value_of(ARG_FROM_PRIMARY_BLOCK)
                .map(str::parse)
                .transpose()
                .with_context(|| "parse --from-primary-block")?;
            let from_app: Option<u64> = m
                .value_of(ARG_FROM_APP_BLOCK)
                .map(str::parse)
                .transpose()
                .with_context(|| "parse --from-app-block")?;
            runner::run(config, from_primary, from_app).await?;
        }
        (COMMAND_EXAMPLE_CONFIG, Some(m)) => {
            let path = m.value_of(ARG_OUTPUT_PATH).unwrap_or("./config.example.toml");
            generate_example_config(path)?;
        }
        _ => {
            // default command: run with ./config.toml
            let config = read_config("./config.toml")?;
            runner::run(config, None, None).await?;
        }
    };
    Ok(())
}

fn main() -> Result<()> {
    trace::init()?;
    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    rt.block_on(run_cli())
}
