use std::path::PathBuf;

use console::style;
use dialoguer::Confirm;

use filemover_lib::session::{undo_journal, validate_journal};
use filemover_lib::{FileMoverError, Result};

pub fn handle(journal: PathBuf, yes: bool, force: bool) -> Result<u8> {
    let summary = validate_journal(&journal)?;

    eprintln!(
        "{} {} entr(ies): {} ok, {} failed, {} skipped",
        style("Journal:").bold(),
        summary.entries,
        summary.ok,
        summary.failed,
        summary.skipped
    );
    if summary.pending_tail > 0 {
        eprintln!(
            "{} {} attempt(s) have no recorded result; that execution was interrupted",
            style("warning:").yellow(),
            summary.pending_tail
        );
    }
    if summary.ok == 0 {
        eprintln!("Nothing to undo.");
        return Ok(super::EXIT_OK);
    }

    if !yes {
        let proceed = Confirm::new()
            .with_prompt(format!(
                "Reverse {} completed operation(s)?",
                summary.ok
            ))
            .default(false)
            .interact()
            .map_err(|e| FileMoverError::Config(e.to_string()))?;
        if !proceed {
            eprintln!("Aborted.");
            return Ok(super::EXIT_CANCELLED);
        }
    }

    let report = undo_journal(&journal, !force)?;

    eprintln!(
        "{} {} restored, {} could not be restored",
        style("Undo:").green().bold(),
        report.restored_count,
        report.failed_restores.len()
    );
    for failure in &report.failed_restores {
        eprintln!(
            "  {} {} ({:?}): {}",
            style("kept").yellow(),
            failure.dest.display(),
            failure.reason,
            failure.message
        );
    }

    if report.failed_restores.is_empty() {
        Ok(super::EXIT_OK)
    } else {
        Ok(super::EXIT_PARTIAL)
    }
}
