//! Azure File Share service broker core.
//! - `broker`: provision, deprovision, bind and unbind with per-share reference counts.
//! - `storage`: file-backed and SQL-backed persistence with per-share locks.
//! - `azure`: the storage account gateway contract and an in-memory implementation.
//! - `bootstrap`: builds a broker from `configs::BrokerConfig`.

pub mod errors;
pub mod azure;
pub mod broker;
pub mod storage;
pub mod bootstrap;
#[cfg(test)]
pub mod test_support;
