pub mod aggregator;
pub mod domain;
pub mod foundation;
pub mod infrastructure;

pub use foundation::error::{OracleError, Result};
