use crate::cmd::Context;
use crate::output::print_json;
use fleet_core::teardown;
use std::path::Path;

pub fn run(
    ctx: &Context,
    dir: &Path,
    tag: Option<&str>,
    prefix: Option<&str>,
) -> anyhow::Result<()> {
    let cfg = ctx.load_config()?;
    let filter = teardown::build_filter(
        Some(tag.unwrap_or(&cfg.machine.tag)),
        Some(prefix.unwrap_or(&cfg.machine.prefix)),
    )?;
    // The scripts fall back to gcloud's own default project at run time.
    let project = ctx.configured_project(&cfg);
    let written = teardown::write_scripts(dir, &filter, project.as_deref())?;

    if ctx.json {
        let paths: Vec<String> = written.iter().map(|p| p.display().to_string()).collect();
        print_json(&serde_json::json!({
            "filter": filter,
            "written": paths,
        }))?;
    } else {
        for path in &written {
            println!("wrote {}", path.display());
        }
        println!("Run teardown-instances.sh before teardown-firewall.sh.");
    }
    Ok(())
}
