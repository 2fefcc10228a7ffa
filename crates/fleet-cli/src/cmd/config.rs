use crate::cmd::Context;
use crate::output::print_json;
use anyhow::Context as _;
use clap::Subcommand;
use fleet_core::config::{FleetConfig, WarnLevel};
use fleet_core::paths;

#[derive(Subcommand)]
pub enum ConfigSubcommand {
    /// Print the effective configuration and any warnings
    Show,

    /// Write a default fleet.yaml next to --config unless one exists
    Init,
}

pub fn run(ctx: &Context, subcmd: ConfigSubcommand) -> anyhow::Result<()> {
    match subcmd {
        ConfigSubcommand::Show => show(ctx),
        ConfigSubcommand::Init => init(ctx),
    }
}

// ---------------------------------------------------------------------------
// show
// ---------------------------------------------------------------------------

fn show(ctx: &Context) -> anyhow::Result<()> {
    let cfg = ctx.load_config()?;
    let warnings = cfg.validate();

    if ctx.json {
        print_json(&serde_json::json!({
            "path": ctx.config_path.display().to_string(),
            "exists": ctx.config_path.exists(),
            "config": cfg,
            "warnings": warnings,
        }))?;
    } else {
        if !ctx.config_path.exists() {
            println!("# {} not found, showing defaults", ctx.config_path.display());
        }
        print!("{}", serde_yaml::to_string(&cfg).context("failed to render config")?);
        for w in &warnings {
            let prefix = match w.level {
                WarnLevel::Warning => "warning",
                WarnLevel::Error => "error",
            };
            eprintln!("[{prefix}] {}", w.message);
        }
    }

    // Surface the first error-level warning with the validation exit code.
    cfg.ensure_valid()?;
    Ok(())
}

// ---------------------------------------------------------------------------
// init
// ---------------------------------------------------------------------------

fn init(ctx: &Context) -> anyhow::Result<()> {
    let dir = ctx.config_dir();
    let path = paths::config_path(dir);
    let written = FleetConfig::init(dir)
        .with_context(|| format!("failed to write {}", path.display()))?;

    if ctx.json {
        print_json(&serde_json::json!({
            "path": path.display().to_string(),
            "created": written,
        }))?;
    } else if written {
        println!("created {}", path.display());
    } else {
        println!("{} already exists, left unchanged", path.display());
    }
    Ok(())
}
