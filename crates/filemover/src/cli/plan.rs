use std::path::PathBuf;

use comfy_table::{presets::UTF8_FULL, Cell, Table};
use console::style;

use filemover_lib::config::load_rules;
use filemover_lib::util::format::format_bytes;
use filemover_lib::{FolderHit, MovePlan, MovePlanner, PlanOptions, Result};

pub fn handle(
    input: PathBuf,
    rules_path: PathBuf,
    output: PathBuf,
    no_cross_volume: bool,
    verbose: bool,
) -> Result<u8> {
    let hits: Vec<FolderHit> = serde_json::from_str(&std::fs::read_to_string(&input).map_err(
        |e| filemover_lib::FileMoverError::Config(format!("cannot read {}: {}", input.display(), e)),
    )?)?;
    let rules = load_rules(&rules_path)?;

    if verbose {
        eprintln!(
            "{} Planning over {} hit(s), {} rule(s)",
            style(">>>").cyan(),
            hits.len(),
            rules.len()
        );
    }

    let options = PlanOptions {
        enable_cross_volume: !no_cross_volume,
        ..PlanOptions::default()
    };
    let plan = MovePlanner::new(options).build(&hits, &rules)?;

    print_plan_summary(&plan);

    std::fs::write(&output, serde_json::to_string_pretty(&plan)?)?;
    eprintln!(
        "{} Plan with {} node(s) written to {}",
        style("✓").green(),
        plan.nodes.len(),
        output.display()
    );

    Ok(super::EXIT_OK)
}

fn print_plan_summary(plan: &MovePlan) {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_header(vec!["Operation", "Before", "After", "Conflicts"]);

    for node in plan.root_nodes().take(20) {
        table.add_row(vec![
            Cell::new(node.kind.as_str()),
            Cell::new(node.path_before.display()),
            Cell::new(node.path_after.display()),
            Cell::new(node.conflicts.len()),
        ]);
    }
    eprintln!("{}", table);

    if plan.roots.len() > 20 {
        eprintln!("  ... and {} more", plan.roots.len() - 20);
    }

    let summary = &plan.summary;
    eprintln!(
        "{} {} dir(s), {} cross-volume, {} conflict(s), {} warning(s){}{}",
        style("Summary:").bold(),
        summary.count_dirs,
        summary.cross_volume,
        summary.conflicts,
        summary.warnings,
        summary
            .total_bytes
            .map(|b| format!(", {}", format_bytes(b)))
            .unwrap_or_default(),
        if summary.dangerous > 0 {
            format!(
                ", {} destructive overwrite(s)",
                style(summary.dangerous).red().bold()
            )
        } else {
            String::new()
        }
    );
}
