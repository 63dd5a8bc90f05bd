use std::path::PathBuf;

use comfy_table::{presets::UTF8_FULL, Cell, Table};
use console::style;

use filemover_lib::{Config, Result};

#[derive(clap::Subcommand)]
pub enum ConfigCommands {
    #[command(about = "Validate a configuration file")]
    Validate {
        #[arg(help = "Configuration file path")]
        path: PathBuf,
    },

    #[command(about = "Show the rules in a configuration file")]
    Show {
        #[arg(help = "Configuration file path")]
        path: PathBuf,
    },
}

pub fn handle(action: ConfigCommands) -> Result<u8> {
    match action {
        ConfigCommands::Validate { path } => {
            Config::load(&path)?;
            eprintln!("{} {} is valid", style("✓").green(), path.display());
            Ok(super::EXIT_OK)
        }
        ConfigCommands::Show { path } => {
            let config = Config::load(&path)?;

            eprintln!("{}", style("Roots").bold());
            for root in &config.roots {
                eprintln!("  {}", root.display());
            }

            let mut table = Table::new();
            table.load_preset(UTF8_FULL);
            table.set_header(vec![
                "Id", "Enabled", "Kind", "Pattern", "Destination", "Template", "Policy",
                "Priority",
            ]);
            for rule in &config.rules {
                table.add_row(vec![
                    Cell::new(&rule.id),
                    Cell::new(rule.enabled),
                    Cell::new(format!("{:?}", rule.pattern.kind)),
                    Cell::new(&rule.pattern.value),
                    Cell::new(rule.dest_root.display()),
                    Cell::new(&rule.template),
                    Cell::new(format!("{:?}", rule.policy)),
                    Cell::new(rule.priority),
                ]);
            }
            println!("{}", table);

            if !config.profiles.is_empty() {
                eprintln!(
                    "{} {}",
                    style("Profiles:").bold(),
                    config
                        .profiles
                        .iter()
                        .map(|p| p.name.clone())
                        .collect::<Vec<_>>()
                        .join(", ")
                );
            }
            Ok(super::EXIT_OK)
        }
    }
}
