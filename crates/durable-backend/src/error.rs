/// Errors a [`crate::client::BackendClient`] can surface, classified into
/// transient (retry-eligible) and permanent (abort-the-invocation): transient
/// errors surface as typed failures to the caller, while permanent errors
/// abort the invocation with `FAILED`.
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("transient backend error: {0}")]
    Transient(String),
    #[error("permanent backend error: {0}")]
    Permanent(String),
    #[error("stale checkpoint token rejected")]
    StaleToken,
}

impl BackendError {
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}
