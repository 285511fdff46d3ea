use thiserror::Error;

#[derive(Error, Debug)]
pub enum TokenError {
    #[error("Token has expired")]
    Expired,

    #[error("Invalid provider key bytes")]
    InvalidKeyBytes,

    #[error("Signature verification failed")]
    InvalidSignature,

    #[error("Malformed token: {0}")]
    Malformed(String),
}
