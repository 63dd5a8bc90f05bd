use std::path::PathBuf;
use std::time::Duration;

use console::style;
use dialoguer::Confirm;

use filemover_lib::session::ExecSession;
use filemover_lib::util::format::format_bytes;
use filemover_lib::util::progress::{move_progress_bar, transfer_message};
use filemover_lib::{ExecOptions, FileMoverError, MovePlan, Result};

pub fn handle(
    plan_path: PathBuf,
    journal: Option<PathBuf>,
    yes: bool,
    threads: Option<usize>,
) -> Result<u8> {
    let plan: MovePlan =
        serde_json::from_str(&std::fs::read_to_string(&plan_path).map_err(|e| {
            FileMoverError::Config(format!("cannot read {}: {}", plan_path.display(), e))
        })?)?;

    let executable = plan.executable_nodes().count();
    if executable == 0 {
        eprintln!(
            "{} plan has no executable operations",
            style("note:").yellow()
        );
        return Ok(super::EXIT_OK);
    }

    let dangerous: usize = plan
        .executable_nodes()
        .filter(|n| n.overwrites_existing())
        .count();
    let unresolved: usize = plan
        .executable_nodes()
        .filter(|n| n.conflicts.iter().any(|c| !c.is_dangerous()))
        .count();

    eprintln!(
        "{} {} operation(s){}{}",
        style("About to execute:").bold(),
        executable,
        plan.summary
            .total_bytes
            .map(|b| format!(", {}", format_bytes(b)))
            .unwrap_or_default(),
        if unresolved > 0 {
            format!(
                " ({} with unresolved conflicts)",
                style(unresolved).yellow()
            )
        } else {
            String::new()
        }
    );

    if dangerous > 0 {
        eprintln!(
            "{} {} existing destination(s) will be overwritten and their current contents destroyed",
            style("warning:").red().bold(),
            dangerous
        );
    }

    if !yes {
        let proceed = Confirm::new()
            .with_prompt("Move these folders? This modifies the filesystem")
            .default(false)
            .interact()
            .map_err(|e| FileMoverError::Config(e.to_string()))?;
        if !proceed {
            eprintln!("Aborted.");
            return Ok(super::EXIT_CANCELLED);
        }
    }

    let journal_path = journal.unwrap_or_else(|| {
        PathBuf::from(format!(
            "filemover_{}.jsonl",
            chrono::Utc::now().format("%Y%m%d_%H%M%S")
        ))
    });

    let bar = move_progress_bar(executable as u64);
    bar.set_message("Executing plan");
    let session = ExecSession::start(
        plan,
        journal_path.clone(),
        ExecOptions {
            parallel_threads: threads,
        },
    );

    while session.running() {
        let progress = session.progress();
        bar.set_position(progress.completed_ops);
        if let Some(item) = &progress.current_item {
            bar.set_message(transfer_message(item, progress.bytes_processed));
        }
        std::thread::sleep(Duration::from_millis(100));
    }
    let result = session.join()?;
    bar.finish_and_clear();

    eprintln!(
        "{} {} ok, {} failed, {} skipped ({} processed)",
        style("Done:").green().bold(),
        result.success_count,
        result.failed_count,
        result.skip_count,
        format_bytes(result.bytes_processed)
    );
    for failure in &result.failures {
        eprintln!(
            "  {} {}: {}",
            style("failed").red(),
            failure.path.display(),
            failure.message
        );
    }
    eprintln!("Journal: {}", journal_path.display());
    eprintln!(
        "Undo with: filemover undo --journal {}",
        journal_path.display()
    );

    Ok(super::exit_code_for_status(result.status))
}
