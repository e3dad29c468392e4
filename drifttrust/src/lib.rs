// DriftTrust — node identity, key agreement and packet sealing for the Drift overlay.
//
// Crate root: module declarations and public re-exports.

pub mod crypto;
pub mod error;

// Re-export key types at crate root for convenience.
pub use crypto::keys::{NodeId, NodeIdentity, PublicIdentity};
pub use error::{DriftTrustError, Result};
