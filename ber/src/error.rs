use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("malformed BER data")]
    Malformed,
}
