use std::path::PathBuf;

use console::style;

use filemover_lib::util::progress::scan_spinner;
use filemover_lib::{CancelToken, Config, FolderScanner, Result};

pub fn handle(
    roots: Vec<PathBuf>,
    config_path: PathBuf,
    output: Option<PathBuf>,
    verbose: bool,
) -> Result<u8> {
    let config = Config::load(&config_path)?;
    let roots = if roots.is_empty() {
        config.roots.clone()
    } else {
        roots
    };

    if verbose {
        eprintln!(
            "{} Scanning {} root(s) with {} rule(s)...",
            style(">>>").cyan(),
            roots.len(),
            config.rules.len()
        );
    }

    let spinner = scan_spinner(roots.len());
    let scanner = FolderScanner::new(config.rules, config.options)?;
    let hits = scanner.scan_roots(&roots, &CancelToken::new())?;
    spinner.finish_and_clear();

    let json = serde_json::to_string_pretty(&hits)?;
    match output {
        Some(path) => {
            std::fs::write(&path, json)?;
            eprintln!(
                "{} {} hit(s) written to {}",
                style("✓").green(),
                hits.len(),
                path.display()
            );
        }
        None => println!("{}", json),
    }

    Ok(super::EXIT_OK)
}
