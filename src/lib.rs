pub mod adapters;
pub mod config;
pub mod core;
pub mod domain;
pub mod utils;

#[cfg(feature = "cli")]
pub use config::{CliConfig, Command};
pub use config::GatekeeperConfig;

pub use adapters::graphql::MoGraphQlGateway;
pub use core::{classifier::classify, consumer::EventConsumer, sync::SyncWorker};
pub use domain::model::{Category, CategoryClasses, ChangeEvent, OrgUnit, Policy};
pub use utils::error::{GatekeeperError, GatewayError, Result};
