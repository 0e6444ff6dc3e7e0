//! Broker core: lifecycle operations over the store and the storage account gateway.

pub mod domain;
pub mod mount;
mod shares;
pub mod service;

pub use service::{Broker, BrokerSettings};
