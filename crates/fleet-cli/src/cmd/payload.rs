use crate::cmd::Context;
use crate::output::print_json;
use fleet_core::payload::{self, PayloadParams};

/// Render the payload from config alone. No project and no gcloud needed.
pub fn run(ctx: &Context) -> anyhow::Result<()> {
    let cfg = ctx.load_config()?;
    cfg.ensure_valid()?;

    let params = PayloadParams::from(&cfg);
    let artifact = payload::render_params(&params)?;

    if ctx.json {
        print_json(&serde_json::json!({
            "params": params,
            "payload": artifact.body(),
        }))?;
    } else {
        print!("{}", artifact.body());
    }
    Ok(())
}
