pub mod hashes;
pub mod message;
pub mod pending;
pub mod schema;
pub mod signing;

pub use message::{Record, SignRequest, SignResponse, StructureStats, WireMessage};
pub use pending::{PendingTable, SignatureOutcome};
pub use signing::{EthSigner, TrustedSet};
