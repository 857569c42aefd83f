pub mod toml_config;

pub use toml_config::GatekeeperConfig;

#[cfg(feature = "cli")]
use clap::{Parser, Subcommand};
#[cfg(feature = "cli")]
use uuid::Uuid;

#[cfg(feature = "cli")]
#[derive(Debug, Clone, Parser)]
#[command(name = "orggatekeeper")]
#[command(about = "Keeps the org_unit_hierarchy of OS2mo organisation units up to date")]
pub struct CliConfig {
    #[arg(long, short, default_value = "orggatekeeper.toml")]
    pub config: String,

    #[arg(long, help = "Enable verbose output")]
    pub verbose: bool,

    #[arg(long, help = "Only log what would have changed")]
    pub dry_run: bool,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[cfg(feature = "cli")]
#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Listen for change events (default)
    Run,
    /// Recalculate the given organisation units once
    Trigger {
        #[arg(required = true)]
        uuids: Vec<Uuid>,
    },
    /// Recalculate every organisation unit
    TriggerAll {
        #[arg(long, help = "Only units without an org_unit_hierarchy")]
        missing_only: bool,
    },
}

#[cfg(feature = "cli")]
impl CliConfig {
    pub fn command(&self) -> Command {
        self.command.clone().unwrap_or(Command::Run)
    }

    /// Command-line flags take precedence over the file.
    pub fn apply_overrides(&self, config: &mut GatekeeperConfig) {
        if self.verbose {
            config.logging.verbose = true;
        }
        if self.dry_run {
            config.sync.dry_run = true;
        }
    }
}

#[cfg(all(test, feature = "cli"))]
mod tests {
    use super::*;

    #[test]
    fn defaults_to_run() {
        let cli = CliConfig::parse_from(["orggatekeeper"]);
        assert!(matches!(cli.command(), Command::Run));
        assert_eq!(cli.config, "orggatekeeper.toml");
    }

    #[test]
    fn trigger_parses_uuids_and_overrides_apply() {
        let cli = CliConfig::parse_from([
            "orggatekeeper",
            "--dry-run",
            "trigger",
            "5ac5fdba-1ed8-4800-b000-0000012a0002",
        ]);
        match cli.command() {
            Command::Trigger { uuids } => assert_eq!(uuids.len(), 1),
            other => panic!("unexpected command {:?}", other),
        }
        let mut config = GatekeeperConfig::from_toml_str("[mo]\nclient_secret = \"s\"\n").unwrap();
        cli.apply_overrides(&mut config);
        assert!(config.sync.dry_run);
    }
}
