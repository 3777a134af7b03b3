use thiserror::Error as ThisError;

use crate::hash::Hash;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, ThisError, PartialEq, Clone)]
pub enum Error {
    #[error("malformed proof: {0}")]
    MalformedProof(String),

    #[error("proof resolves to root {computed}, expected {expected}")]
    InconsistentRoot { computed: Hash, expected: Hash },

    #[error("deep subtree root {actual} does not match expected root {expected}")]
    RootMismatch { actual: Hash, expected: Hash },

    #[error("root {0} is not present in the node store")]
    RootMissing(Hash),

    #[error("subtree {0} has not been witnessed by any proof")]
    UnwitnessedSubtree(Hash),

    #[error("cannot route key {} through a partially witnessed node", hex::encode(.0))]
    RoutingAmbiguous(Vec<u8>),

    #[error("key {} not found", hex::encode(.0))]
    KeyNotFound(Vec<u8>),

    #[error("attempt to store an empty value at key {}", hex::encode(.0))]
    EmptyValue(Vec<u8>),

    #[error("the tree has no root")]
    EmptyTree,

    #[error("element already exists")]
    ElementExists,

    #[error("node store error: {0}")]
    Store(String),
}

impl From<hex::FromHexError> for Error {
    fn from(error: hex::FromHexError) -> Self {
        Error::MalformedProof(format!("hex error: {}", error))
    }
}
