use thiserror::Error;

/// Session-fatal decode failures.
///
/// These poison the whole response: every pending chunk is rejected and no
/// further rows are accepted. Failures scoped to a single value (an unknown
/// temporary reference, a failed module load, an errored dependency) are not
/// represented here; they reject only the consuming chunk.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("framing error: {0}")]
    Framing(#[from] flightwire_row::RowError),

    #[error("malformed row payload: {0}")]
    Json(#[from] serde_json::Error),

    #[error("protocol violation: {0}")]
    Protocol(String),

    #[error("row {id} redefines an already-defined chunk")]
    DuplicateRow { id: u32 },

    #[error("response is closed")]
    Closed,
}

pub type Result<T> = std::result::Result<T, DecodeError>;
