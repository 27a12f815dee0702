//! Error taxonomy for the gateway core.
//!
//! Each subsystem gets its own `thiserror` enum; `GatewayError` composes
//! them the way `dolos_core::DomainError` composes `WalError` /
//! `ChainError` / `StateError` / `ArchiveError` / `MempoolError`. The
//! HTTP edge maps each variant down to one of the kinds in the error
//! taxonomy (`BadRequest`, `NotFound`, `Conflict`, `Internal`,
//! `SubmitFailure`) instead of leaking subsystem detail to clients.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("truncated cbor stream")]
    Truncated,

    #[error("unknown major/argument combination: major {0}, info {1}")]
    UnknownHead(u8, u8),

    #[error("invalid indefinite-length terminator")]
    InvalidBreak,

    #[error("invalid utf-8 in text string")]
    InvalidUtf8,

    #[error("unrecognized constructor tag {0}")]
    UnrecognizedConstructor(u64),

    #[error("malformed cbor: {0}")]
    Malformed(String),
}

#[derive(Debug, Error)]
pub enum ChainError {
    #[error("io error reading chain archive: {0}")]
    Io(#[from] std::io::Error),

    #[error("codec error decoding block: {0}")]
    Codec(#[from] CodecError),

    #[error("chunk filename is not parseable as a chunk id: {0}")]
    UnparseableChunkId(String),

    #[error("invalid wrapped-block envelope (expected array-header 0x82)")]
    InvalidEnvelope,

    #[error("unrecognized era tag {0}")]
    UnrecognizedEra(u8),

    #[error("block not found")]
    BlockNotFound,

    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

#[derive(Debug, Error)]
pub enum MempoolError {
    #[error("sql error while pruning: {0}")]
    Sql(#[from] SqlError),
}

#[derive(Debug, Error)]
pub enum NodeBridgeError {
    #[error("io error launching node cli: {0}")]
    Io(#[from] std::io::Error),

    #[error("node cli exited with failure: {0}")]
    CliFailure(String),

    #[error("could not parse node cli json output: {0}")]
    Json(#[from] serde_json::Error),

    #[error("node cli produced malformed cbor: {0}")]
    Codec(#[from] CodecError),
}

#[derive(Debug, Error)]
pub enum SqlError {
    #[error("pool error: {0}")]
    Pool(#[from] deadpool_postgres::PoolError),

    #[error("query error: {0}")]
    Query(#[from] tokio_postgres::Error),

    #[error("pool build error: {0}")]
    Build(String),
}

#[derive(Debug, Error)]
pub enum SubmitError {
    #[error("request body exceeds the maximum allowed size")]
    BodyTooLarge,

    #[error("request body is not valid utf-8")]
    InvalidUtf8,

    #[error("request body is not valid hex")]
    InvalidHex,

    #[error("request body is not valid json")]
    InvalidJson,

    #[error("could not decode ledger transaction: {0}")]
    DecodeTx(#[from] CodecError),

    #[error("node rejected the transaction after all retries: {0}")]
    Rejected(String),

    #[error(transparent)]
    NodeBridge(#[from] NodeBridgeError),

    #[error(transparent)]
    Sql(#[from] SqlError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum FacadeError {
    #[error("invalid address for this network")]
    InvalidAddress,

    #[error("not found")]
    NotFound,

    #[error("not enough utxos to satisfy the request")]
    InsufficientFunds,

    #[error(transparent)]
    Sql(#[from] SqlError),

    #[error(transparent)]
    Chain(#[from] ChainError),

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error(transparent)]
    NodeBridge(#[from] NodeBridgeError),

    #[error(transparent)]
    Submit(#[from] SubmitError),
}

/// Coarse HTTP-facing classification, per the error taxonomy in the
/// specification's Error Handling Design section.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    BadRequest,
    NotFound,
    Conflict,
    Internal,
    SubmitFailure,
}

impl FacadeError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            FacadeError::InvalidAddress => ErrorKind::NotFound,
            FacadeError::NotFound => ErrorKind::NotFound,
            FacadeError::InsufficientFunds => ErrorKind::NotFound,
            FacadeError::Sql(_) => ErrorKind::Internal,
            FacadeError::Chain(_) => ErrorKind::Internal,
            FacadeError::Codec(_) => ErrorKind::Internal,
            FacadeError::NodeBridge(_) => ErrorKind::Internal,
            FacadeError::Submit(e) => match e {
                SubmitError::BodyTooLarge
                | SubmitError::InvalidUtf8
                | SubmitError::InvalidHex
                | SubmitError::InvalidJson
                | SubmitError::DecodeTx(_) => ErrorKind::BadRequest,
                SubmitError::Rejected(_) => ErrorKind::SubmitFailure,
                SubmitError::NodeBridge(_) | SubmitError::Sql(_) | SubmitError::Io(_) => {
                    ErrorKind::Internal
                }
            },
        }
    }
}
