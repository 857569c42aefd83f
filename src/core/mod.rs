pub mod classifier;
pub mod consumer;
pub mod gateway;
pub mod policy;
pub mod retry;
pub mod sync;

pub use crate::domain::model::{Category, ChangeEvent, OrgUnit, Policy};
pub use crate::domain::ports::{Broker, Clock, OrgGateway};
pub use crate::utils::error::Result;
