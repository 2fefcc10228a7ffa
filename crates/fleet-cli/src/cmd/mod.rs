pub mod config;
pub mod payload;
pub mod provision;
pub mod scripts;
pub mod teardown;

use anyhow::Context as _;
use fleet_core::cloud::gcloud;
use fleet_core::config::FleetConfig;
use std::path::{Path, PathBuf};

/// Global flags shared by every subcommand.
pub struct Context {
    pub config_path: PathBuf,
    pub project: Option<String>,
    pub json: bool,
}

impl Context {
    pub fn load_config(&self) -> anyhow::Result<FleetConfig> {
        FleetConfig::load(&self.config_path)
            .with_context(|| format!("failed to load {}", self.config_path.display()))
    }

    /// Directory the config file lives in.
    pub fn config_dir(&self) -> &Path {
        match self.config_path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        }
    }

    /// Flag or env, then config. `None` if neither names a project.
    pub fn configured_project(&self, cfg: &FleetConfig) -> Option<String> {
        self.project
            .clone()
            .or_else(|| cfg.location.project.clone())
            .filter(|p| !p.trim().is_empty())
    }

    /// Like [`Context::configured_project`], falling back to gcloud's active project.
    pub fn resolve_project(&self, cfg: &FleetConfig) -> anyhow::Result<String> {
        if let Some(p) = self.configured_project(cfg) {
            return Ok(p);
        }
        let project = gcloud::active_project()?;
        tracing::debug!(project = %project, "using gcloud active project");
        Ok(project)
    }
}
