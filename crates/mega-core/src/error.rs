use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Error taxonomy for the client.
///
/// The first group mirrors the service's negative integer codes; the rest
/// are client-side conditions. Transport retries the kinds reported by
/// [`Error::is_retryable`] internally; everything else propagates.
#[derive(Debug, Error)]
pub enum Error {
    #[error("internal service error")]
    Internal,
    #[error("invalid arguments")]
    BadArgs,
    #[error("resource temporarily unavailable, try again")]
    Again,
    #[error("rate limit reached")]
    RateLimit,
    #[error("upload failed, restart the transfer from scratch")]
    UploadFailed,
    #[error("too many connections on this resource")]
    TooManyConnections,
    #[error("packet out of range or not on a chunk boundary")]
    Range,
    #[error("transfer URL expired, request a fresh one")]
    Expired,
    #[error("object not found")]
    NotFound,
    #[error("access denied")]
    AccessDenied,
    #[error("a decryption operation failed")]
    Decrypt,
    #[error("invalid or expired session, log in again")]
    InvalidSession,
    #[error("account blocked")]
    Blocked,
    #[error("request over quota")]
    OverQuota,
    #[error("MAC verification failed")]
    MacMismatch,
    #[error("multi-factor authentication required")]
    MfaRequired,
    #[error("unknown service error {0}")]
    Service(i32),

    #[error("bad node attribute")]
    BadAttribute,
    #[error("bad response from service: {0}")]
    BadResponse(String),
    #[error("worker count {0} exceeds the maximum of {max}", max = crate::config::MAX_WORKERS)]
    WorkerLimitExceeded(usize),
    #[error("hashcash challenge not solved within the timeout")]
    HashcashTimeout,
    #[error("transfer cancelled")]
    Cancelled,
    #[error("not logged in")]
    NotLoggedIn,
    #[error("http transport: {0}")]
    Http(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("codec: {0}")]
    Codec(#[from] mega_codec::CodecError),
}

impl Error {
    /// Map a service status code to an error; `0` is success.
    pub fn from_service_code(code: i32) -> Result<()> {
        Err(match code {
            0 => return Ok(()),
            -1 => Error::Internal,
            -2 => Error::BadArgs,
            -3 => Error::Again,
            -4 => Error::RateLimit,
            -5 => Error::UploadFailed,
            -6 => Error::TooManyConnections,
            -7 => Error::Range,
            -8 => Error::Expired,
            -9 => Error::NotFound,
            -11 => Error::AccessDenied,
            -14 => Error::Decrypt,
            -15 => Error::InvalidSession,
            -16 => Error::Blocked,
            -17 => Error::OverQuota,
            -22 => Error::MacMismatch,
            -26 => Error::MfaRequired,
            other => Error::Service(other),
        })
    }

    /// Kinds the transport layer retries with backoff.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::Internal | Error::Again | Error::RateLimit | Error::TooManyConnections
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_code_table() {
        assert!(Error::from_service_code(0).is_ok());
        assert!(matches!(Error::from_service_code(-3), Err(Error::Again)));
        assert!(matches!(Error::from_service_code(-9), Err(Error::NotFound)));
        assert!(matches!(
            Error::from_service_code(-15),
            Err(Error::InvalidSession)
        ));
        assert!(matches!(
            Error::from_service_code(-22),
            Err(Error::MacMismatch)
        ));
        assert!(matches!(
            Error::from_service_code(-26),
            Err(Error::MfaRequired)
        ));
        assert!(matches!(
            Error::from_service_code(-99),
            Err(Error::Service(-99))
        ));
    }

    #[test]
    fn test_retryable_kinds() {
        assert!(Error::Again.is_retryable());
        assert!(Error::RateLimit.is_retryable());
        assert!(Error::Internal.is_retryable());
        assert!(Error::TooManyConnections.is_retryable());
        assert!(!Error::NotFound.is_retryable());
        assert!(!Error::MacMismatch.is_retryable());
        assert!(!Error::BadArgs.is_retryable());
    }
}
