// Adapters layer: concrete implementations for external systems.

#[cfg(feature = "amqp")]
pub mod amqp;
pub mod auth;
pub mod graphql;
