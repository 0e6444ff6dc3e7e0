//! Persistence rows for the SQL-backed broker store.
//!
//! Each table keeps lookup columns next to a `value` column holding the
//! serialized document; the service crate owns the document shapes.

pub mod errors;
pub mod db;
pub mod service_instance;
pub mod service_binding;
pub mod file_share;

#[cfg(test)]
mod tests;
