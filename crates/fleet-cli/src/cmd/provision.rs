use crate::cmd::Context;
use crate::output::{print_json, Table};
use fleet_core::cloud::GcloudCli;
use fleet_core::config::FleetConfig;
use fleet_core::confirm::{AssumeYes, Confirmer, StdinConfirmer};
use fleet_core::error::FleetError;
use fleet_core::orchestrator::{Orchestrator, Overall, RunReport};
use fleet_core::readiness::ThreadSleeper;
use fleet_core::request::{self, ProvisionRequest};
use fleet_core::teardown;
use std::path::{Path, PathBuf};

/// A run that completed but left machines failed. Carries the exit code of
/// the first failure.
#[derive(Debug)]
pub struct RunFailed {
    pub code: i32,
    pub overall: Overall,
    pub failed: usize,
}

impl std::fmt::Display for RunFailed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "run {}: {} machine(s) failed", self.overall, self.failed)
    }
}

impl std::error::Error for RunFailed {}

pub fn run(ctx: &Context, count: Option<&str>, yes: bool) -> anyhow::Result<()> {
    // Nothing else happens until the count is known to be good.
    let count = request::parse_machine_count(count)?;

    let cfg = ctx.load_config()?;
    let project = ctx.resolve_project(&cfg)?;
    let request = ProvisionRequest::new(count, project, &cfg)?;

    let gcloud = GcloudCli::new(&request.project, &request.zone)?;
    let confirmer: &dyn Confirmer = if yes { &AssumeYes } else { &StdinConfirmer };
    let orchestrator = Orchestrator::new(&gcloud, &gcloud, &ThreadSleeper, &gcloud, confirmer);

    let report = match orchestrator.run(&request) {
        Ok(report) => report,
        // The first rule may already exist.
        Err(err @ FleetError::SharedResource { .. }) => {
            write_teardown_scripts(ctx, &cfg)?;
            return Err(err.into());
        }
        Err(err) => return Err(err.into()),
    };

    // Once anything may exist in the cloud, leave the cleanup scripts behind,
    // failed runs included.
    let scripts = if report.overall == Overall::Declined {
        Vec::new()
    } else {
        write_teardown_scripts(ctx, &cfg)?
    };

    if ctx.json {
        print_json(&report)?;
    } else {
        print_report(&report, &scripts);
    }

    match report.overall {
        Overall::Success | Overall::Declined => Ok(()),
        Overall::Partial | Overall::Failed => Err(RunFailed {
            code: report.exit_code(),
            overall: report.overall,
            failed: report.count_in(fleet_core::provision::MachineState::Failed),
        }
        .into()),
    }
}

fn write_teardown_scripts(ctx: &Context, cfg: &FleetConfig) -> anyhow::Result<Vec<PathBuf>> {
    let filter = teardown::build_filter(Some(&cfg.machine.tag), Some(&cfg.machine.prefix))?;
    let project = ctx.configured_project(cfg);
    let written = teardown::write_scripts(Path::new("."), &filter, project.as_deref())?;
    tracing::info!(count = written.len(), "wrote teardown scripts");
    Ok(written)
}

fn print_report(report: &RunReport, scripts: &[PathBuf]) {
    if report.overall == Overall::Declined {
        println!("Aborted. Nothing was created.");
        return;
    }

    let mut table = Table::new(["MACHINE", "STATE", "DETAIL"]);
    for m in &report.per_machine {
        let detail = m.failure().map(|f| f.message.as_str()).unwrap_or_default();
        table.row([m.name.as_str(), m.state().as_str(), detail]);
    }
    table.print();
    println!();
    println!("Run {} finished: {}", report.run_id, report.overall);
    for path in scripts {
        println!("Teardown script: {}", path.display());
    }
    if report.overall == Overall::Success {
        println!("Run ~/cluster-urls.sh on a machine to print its service URLs.");
    }
}
