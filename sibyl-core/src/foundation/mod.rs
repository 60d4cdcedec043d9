pub mod constants;
pub mod error;
pub mod types;
pub mod util;

pub use error::{OracleError, Result};
pub use types::{DataStructureId, Hash32, RequestHash};
