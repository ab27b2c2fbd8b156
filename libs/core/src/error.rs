use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("Invalid error code {0:?}: expected upper-case ASCII letters, digits and underscores")]
    InvalidCode(String),
}

pub type Result<T> = std::result::Result<T, Error>;
