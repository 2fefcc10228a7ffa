use crate::cmd::Context;
use crate::output::{print_json, Table};
use fleet_core::cloud::GcloudCli;
use fleet_core::confirm::{AssumeYes, Confirmer, StdinConfirmer};
use fleet_core::teardown::{self, TeardownReport, TeardownScope};

pub fn scope(instances_only: bool, rules_only: bool) -> TeardownScope {
    match (instances_only, rules_only) {
        (true, _) => TeardownScope::Instances,
        (_, true) => TeardownScope::Rules,
        _ => TeardownScope::All,
    }
}

pub fn run(
    ctx: &Context,
    tag: Option<&str>,
    prefix: Option<&str>,
    scope: TeardownScope,
    yes: bool,
) -> anyhow::Result<()> {
    let cfg = ctx.load_config()?;
    let filter = teardown::build_filter(
        Some(tag.unwrap_or(&cfg.machine.tag)),
        Some(prefix.unwrap_or(&cfg.machine.prefix)),
    )?;
    let project = ctx.resolve_project(&cfg)?;
    let gcloud = GcloudCli::new(&project, &cfg.location.zone)?;
    let confirmer: &dyn Confirmer = if yes { &AssumeYes } else { &StdinConfirmer };

    tracing::info!(project = %project, filter = %filter.describe(), "teardown");
    let report = teardown::sweep(&gcloud, &filter, scope, confirmer)?;

    if ctx.json {
        print_json(&report)?;
    } else {
        print_report(&report);
    }

    // Exit non-zero only after every match has been attempted.
    match report.incomplete_error() {
        Some(err) => Err(err.into()),
        None => Ok(()),
    }
}

fn print_report(report: &TeardownReport) {
    if report.matched.is_empty() {
        println!("Nothing matches. Nothing to delete.");
        return;
    }
    if !report.confirmed {
        println!("Aborted. Nothing was deleted.");
        return;
    }

    let mut table = Table::new(["RESOURCE", "RESULT", "DETAIL"]);
    for name in &report.deleted {
        table.row([name.as_str(), "deleted", ""]);
    }
    for f in &report.failed {
        table.row([f.name.as_str(), "failed", f.cause.as_str()]);
    }
    table.print();
    println!();
    println!(
        "Deleted: {}, failed: {}",
        report.deleted.len(),
        report.failed.len()
    );
}
