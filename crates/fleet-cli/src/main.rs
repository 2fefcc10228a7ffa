mod cmd;
mod output;

use clap::{Parser, Subcommand};
use cmd::config::ConfigSubcommand;
use fleet_core::FleetError;
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "fleet",
    about = "Provision a small fleet of Kubernetes-ready VMs on Google Compute Engine",
    version,
    propagate_version = true
)]
struct Cli {
    /// Config file
    #[arg(long, global = true, env = "FLEET_CONFIG", default_value = "fleet.yaml")]
    config: PathBuf,

    /// Cloud project (default: config, then `gcloud config get-value project`)
    #[arg(long, global = true, env = "FLEET_PROJECT")]
    project: Option<String>,

    /// Output as JSON
    #[arg(long, global = true, short = 'j')]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create machines, wait for them, and install the cluster payload
    Provision {
        /// Number of machines, 1 to 10
        count: Option<String>,

        /// Skip the confirmation prompt
        #[arg(long, short = 'y')]
        yes: bool,
    },

    /// Delete instances and firewall rules by tag or name prefix
    Teardown {
        /// Network tag to match (default: machine.tag from config)
        #[arg(long)]
        tag: Option<String>,

        /// Name prefix to match (default: machine.prefix from config)
        #[arg(long)]
        prefix: Option<String>,

        /// Only delete instances
        #[arg(long, conflicts_with = "rules_only")]
        instances_only: bool,

        /// Only delete firewall rules
        #[arg(long)]
        rules_only: bool,

        /// Skip the confirmation prompt
        #[arg(long, short = 'y')]
        yes: bool,
    },

    /// Write standalone teardown scripts
    Scripts {
        /// Output directory
        #[arg(long, default_value = ".")]
        dir: PathBuf,

        /// Network tag to match (default: machine.tag from config)
        #[arg(long)]
        tag: Option<String>,

        /// Name prefix to match (default: machine.prefix from config)
        #[arg(long)]
        prefix: Option<String>,
    },

    /// Print the rendered installation payload without touching the cloud
    Payload,

    /// Show or create the config file
    Config {
        #[command(subcommand)]
        subcommand: ConfigSubcommand,
    },
}

fn main() {
    let cli = Cli::parse();

    let default_level = match &cli.command {
        Commands::Provision { .. } | Commands::Teardown { .. } => tracing::Level::INFO,
        _ => tracing::Level::WARN,
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(default_level.into()),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let ctx = cmd::Context {
        config_path: cli.config,
        project: cli.project,
        json: cli.json,
    };

    let result = match cli.command {
        Commands::Provision { count, yes } => cmd::provision::run(&ctx, count.as_deref(), yes),
        Commands::Teardown {
            tag,
            prefix,
            instances_only,
            rules_only,
            yes,
        } => cmd::teardown::run(
            &ctx,
            tag.as_deref(),
            prefix.as_deref(),
            cmd::teardown::scope(instances_only, rules_only),
            yes,
        ),
        Commands::Scripts { dir, tag, prefix } => {
            cmd::scripts::run(&ctx, &dir, tag.as_deref(), prefix.as_deref())
        }
        Commands::Payload => cmd::payload::run(&ctx),
        Commands::Config { subcommand } => cmd::config::run(&ctx, subcommand),
    };

    if let Err(e) = result {
        eprintln!("error: {e:#}");
        std::process::exit(exit_code(&e));
    }
}

/// Map the root cause to the documented exit code.
fn exit_code(e: &anyhow::Error) -> i32 {
    if let Some(failed) = e.downcast_ref::<cmd::provision::RunFailed>() {
        return failed.code;
    }
    e.chain()
        .find_map(|cause| cause.downcast_ref::<FleetError>())
        .map(FleetError::exit_code)
        .unwrap_or(1)
}
