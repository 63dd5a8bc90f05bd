use std::path::PathBuf;

use console::style;

use filemover_lib::session::simulate_plan;
use filemover_lib::util::format::format_duration;
use filemover_lib::{FileMoverError, MovePlan, Result};

pub fn handle(plan_path: PathBuf) -> Result<u8> {
    let plan: MovePlan =
        serde_json::from_str(&std::fs::read_to_string(&plan_path).map_err(|e| {
            FileMoverError::Config(format!("cannot read {}: {}", plan_path.display(), e))
        })?)?;

    let report = simulate_plan(&plan);

    println!("{}", serde_json::to_string_pretty(&report)?);

    eprintln!(
        "{} {} would succeed, {} blocked by conflicts, {} skipped, ~{}",
        style("Dry run:").bold(),
        report.success_estimate,
        report.conflicts_remaining,
        report.skipped,
        format_duration(std::time::Duration::from_secs(
            report.estimated_duration_secs
        ))
    );

    if report.conflicts_remaining > 0 {
        eprintln!(
            "{} resolve the conflicts or set nodes to Skip before applying",
            style("note:").yellow()
        );
    }

    Ok(super::EXIT_OK)
}
