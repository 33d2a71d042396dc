use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use gateway_addon::ipc::MessageValidator;
use gateway_addon::manifest::AddonManifest;
use gateway_addon::{AddonConfig, PluginClient};

/// Gateway add-on host - registers a plugin with the gateway and routes its messages
#[derive(Parser)]
#[command(name = "gateway-addon", version, about)]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Register with the gateway and run until unloaded
    Run(RunArgs),
    /// Validate a JSON message file
    Validate {
        /// Path to a file holding one message envelope
        file: PathBuf,
    },
    /// List the message types of the embedded schema set
    Schemas,
}

#[derive(Args)]
#[group(required = true, multiple = false)]
struct RunArgs {
    /// Plugin identifier
    #[arg(long, env = "GATEWAY_ADDON_PLUGIN_ID")]
    plugin_id: Option<String>,

    /// Add-on directory containing manifest.json
    #[arg(long)]
    manifest: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let filter = match cli.verbose {
        0 => "info,gateway_addon=info",
        1 => "info,gateway_addon=debug",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .init();

    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            tracing::error!("fatal: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<ExitCode> {
    match cli.command {
        Command::Run(args) => {
            run_plugin(args).await?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Validate { file } => validate(&file),
        Command::Schemas => {
            list_schemas();
            Ok(ExitCode::SUCCESS)
        }
    }
}

async fn run_plugin(args: RunArgs) -> anyhow::Result<()> {
    let plugin_id = match (args.plugin_id, args.manifest) {
        (Some(id), _) => id,
        (None, Some(dir)) => AddonManifest::load(&dir)?.id,
        (None, None) => anyhow::bail!("either --plugin-id or --manifest is required"),
    };

    let config = AddonConfig::load()?;
    tracing::debug!(?config, "loaded configuration");

    let mut client = PluginClient::new(&plugin_id, &config);
    client.register()?;
    let registration = client.wait_registered().await?;
    let router = registration.router;

    tracing::info!(
        plugin_id = %plugin_id,
        gateway_version = %registration.gateway_version,
        "plugin running"
    );

    tokio::select! {
        () = router.closed() => {
            tracing::info!("router closed");
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("received shutdown signal");
            router.shutdown();
            router.closed().await;
        }
    }

    Ok(())
}

fn validate(file: &Path) -> anyhow::Result<ExitCode> {
    let raw = std::fs::read(file)?;

    match MessageValidator::global().validate(&raw) {
        Ok(message) => {
            println!("{}: valid {}", file.display(), message.type_name());
            Ok(ExitCode::SUCCESS)
        }
        Err(e) => {
            eprintln!("{}: {e}", file.display());
            Ok(ExitCode::FAILURE)
        }
    }
}

fn list_schemas() {
    let validator = MessageValidator::global();
    println!("Schema set v{}", validator.version());
    for message_type in validator.message_types() {
        println!("  {message_type}");
    }
}
