use thiserror::Error;

/// Failures the caller must be able to distinguish.
///
/// Tool failures and permission denials are deliberately absent: they are
/// normal outcomes converted into error tool replies, never `Err` values.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Network or stream failure while talking to the inference API.
    /// The turn is aborted; the session keeps its last persisted state.
    #[error("transport error: {0}")]
    Transport(#[source] anyhow::Error),

    /// No session is registered under the given fid.
    #[error("unknown session: {0}")]
    UnknownSession(String),

    /// A fid that does not follow the `YYYY-MM-DD-HH-MM-SS` shape.
    #[error("malformed fid: {0}")]
    InvalidFid(String),

    /// Database or snapshot file I/O failed.
    #[error("persistence error: {0}")]
    Persistence(#[source] anyhow::Error),

    /// The on-disk snapshot could not be decoded. The placeholder that
    /// requested the load stays registered and untouched.
    #[error("snapshot decode error: {0}")]
    Deserialize(#[source] anyhow::Error),
}
