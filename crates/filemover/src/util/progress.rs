use indicatif::{ProgressBar, ProgressStyle};

use crate::util::format::format_bytes;

/// Bar for plan execution: operation counts drive the bar, bytes and the
/// current folder ride in the message so long CopyDelete transfers stay
/// readable.
pub fn move_progress_bar(total_ops: u64) -> ProgressBar {
    let bar = ProgressBar::new(total_ops);
    bar.set_style(
        ProgressStyle::default_bar()
            .template("{msg}\n[{bar:44.green/239}] {pos}/{len} ops | {elapsed_precise} elapsed, {eta} left")
            .expect("progress bar template")
            .progress_chars("=> "),
    );
    bar
}

pub fn scan_spinner(root_count: usize) -> ProgressBar {
    let spinner = ProgressBar::new_spinner();
    spinner.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.cyan} {msg} [{elapsed}]")
            .expect("spinner template"),
    );
    spinner.set_message(format!("Scanning {} root(s)", root_count));
    spinner
}

/// Message line for the execution bar: current folder plus bytes moved.
pub fn transfer_message(current_item: &str, bytes_processed: u64) -> String {
    format!("Moving: {} ({})", current_item, format_bytes(bytes_processed))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transfer_message_includes_bytes() {
        let message = transfer_message("report_q1", 2048);
        assert!(message.contains("report_q1"));
        assert!(message.contains("2.00 KB"));
    }
}
