use thiserror::Error;

/// Errors raised while parsing or comparing the opaque wire types
/// (change stamps, sync cookies, UUIDs) that make up the data model.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum CsnError {
    #[error("serverID {0} out of range [0, 4095]")]
    ServerIdOutOfRange(i32),

    #[error("malformed change stamp: {0}")]
    MalformedChangeStamp(String),

    #[error("malformed sync cookie: {0}")]
    MalformedCookie(String),

    #[error("cookie vector shape invariant violated: |ctxcsn| ({ctxcsn}) != |sids| ({sids})")]
    VectorShapeMismatch { ctxcsn: usize, sids: usize },

    #[error("malformed UUID: expected 16 bytes, got {0}")]
    MalformedUuid(usize),
}
