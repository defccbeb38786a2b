use anyhow::{bail, Context, Result};
use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use ouro_channel::{HttpTransport, RequestChannel};
use ouro_core::{to_pretty_json, ChangeOrchestrator, OrchestratorConfig, OrchestratorState, Services};
use ouro_options::{slice_options, SchemaCodec};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

fn cli() -> Command {
    let file_arg = || {
        Arg::new("file")
            .required(true)
            .value_parser(value_parser!(PathBuf))
            .help("Slice options JSON file")
    };

    Command::new("ouroboros")
        .version(ouro_core::VERSION)
        .about("Slice options and slicing backend client")
        .arg_required_else_help(true)
        .arg(
            Arg::new("config")
                .long("config")
                .global(true)
                .value_parser(value_parser!(PathBuf))
                .help("TOML configuration file"),
        )
        .arg(
            Arg::new("server")
                .long("server")
                .global(true)
                .env("OUROBOROS_SERVER")
                .help("Backend base URL, overrides the configuration file"),
        )
        .arg(
            Arg::new("working-dir")
                .long("working-dir")
                .global(true)
                .value_parser(value_parser!(PathBuf))
                .help("Directory relative file paths resolve against [default: current directory]"),
        )
        .arg(
            Arg::new("json-logs")
                .long("json-logs")
                .global(true)
                .action(ArgAction::SetTrue)
                .help("Emit logs as JSON"),
        )
        .subcommand(Command::new("schema").about("Print the JSON schema of the default slice options"))
        .subcommand(
            Command::new("validate")
                .about("Validate a slice options file")
                .arg(file_arg()),
        )
        .subcommand(
            Command::new("submit")
                .about("Load a slice options file, submit it and follow its progress")
                .arg(file_arg()),
        )
        .subcommand(
            Command::new("visualize")
                .about("Load a slice options file and request a visualization")
                .arg(file_arg()),
        )
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn load_config(matches: &ArgMatches) -> Result<OrchestratorConfig> {
    let mut config = match matches.get_one::<PathBuf>("config") {
        Some(path) => OrchestratorConfig::from_toml_file(path)?,
        None => OrchestratorConfig::default(),
    };
    if let Some(server) = matches.get_one::<String>("server") {
        config = config.with_server_url(server.clone());
    }
    Ok(config)
}

fn working_dir(matches: &ArgMatches) -> Result<PathBuf> {
    match matches.get_one::<PathBuf>("working-dir") {
        Some(dir) => Ok(dir.clone()),
        None => std::env::current_dir().context("cannot determine current directory"),
    }
}

fn print_schema() -> Result<()> {
    let schema = slice_options()?.to_schema();
    println!("{}", to_pretty_json(&schema)?);
    Ok(())
}

fn validate_file(file: &Path) -> Result<()> {
    let text =
        std::fs::read_to_string(file).with_context(|| format!("cannot read {}", file.display()))?;
    let document: serde_json::Value =
        serde_json::from_str(&text).with_context(|| format!("{} is not JSON", file.display()))?;

    let codec = SchemaCodec::for_tree(&slice_options()?)?;
    match codec.validate(&document) {
        Ok(_) => {
            println!("{}: valid slice options", file.display());
            Ok(())
        }
        Err(e) => {
            for reason in e.reasons() {
                eprintln!("  {reason}");
            }
            bail!("{} is not a slice options file", file.display())
        }
    }
}

async fn run_job(matches: &ArgMatches, file: &Path, submit: bool) -> Result<()> {
    let config = load_config(matches)?;
    let dir = working_dir(matches)?;
    tracing::info!("Using backend {} in {}", config.server_url, dir.display());

    let transport = Arc::new(HttpTransport::with_timeout(
        config.server_url.clone(),
        config.request_timeout(),
    )?);
    let (channel, mut events) = RequestChannel::new(transport);
    let mut orchestrator =
        ChangeOrchestrator::with_slice_options(config, channel, Services::local(dir))?;

    orchestrator.load_options_file(file).await?;

    if submit {
        if let Err(e) = orchestrator.fetch_current_job().await {
            tracing::warn!("Could not look up the current job: {}", e);
        }
        if orchestrator.submit().await?.is_none() {
            bail!("nothing submitted: check the output folder, output name and Neuroglancer JSON fields");
        }
    } else if orchestrator.state() == OrchestratorState::Idle
        && orchestrator.request_visualization().await?.is_none()
    {
        bail!("no visualization requested: check the output folder, output name and Neuroglancer JSON fields");
    }

    orchestrator
        .run_until_idle(&mut events, |o| {
            let line: Vec<String> = o
                .progress()
                .iter()
                .map(|(step, fraction)| format!("{step} {:.0}%", fraction * 100.0))
                .collect();
            if !line.is_empty() {
                println!("{}", line.join("  "));
            }
        })
        .await?;

    if let Some(visualization) = orchestrator.visualization() {
        println!("{}", to_pretty_json(visualization)?);
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let matches = cli().get_matches();
    let Some((name, args)) = matches.subcommand() else {
        cli().print_help()?;
        return Ok(());
    };
    // Global flags are read from the subcommand so they may appear on either side of it
    init_tracing(args.get_flag("json-logs"));

    match name {
        "schema" => print_schema(),
        "validate" => validate_file(required_file(args)?),
        "submit" => run_job(args, required_file(args)?, true).await,
        "visualize" => run_job(args, required_file(args)?, false).await,
        other => bail!("unknown command: {other}"),
    }
}

fn required_file(args: &ArgMatches) -> Result<&PathBuf> {
    args.get_one::<PathBuf>("file").context("missing FILE argument")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_definition_is_consistent() {
        cli().debug_assert();
    }

    #[test]
    fn global_flags_reach_subcommands() {
        let matches = cli()
            .try_get_matches_from(["ouroboros", "submit", "job.json", "--server", "http://backend:9000"])
            .unwrap();
        let (name, args) = matches.subcommand().unwrap();
        let config = load_config(args).unwrap();

        assert_eq!(config.server_url, "http://backend:9000");
        assert_eq!(name, "submit");
        assert_eq!(required_file(args).unwrap(), &PathBuf::from("job.json"));
    }
}
