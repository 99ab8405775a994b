//! Errors raised while resolving and preparing the data folder

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    /// Creating folders or reading the config file failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The config file exists but is not valid TOML for its section
    #[error("Configuration error: {0}")]
    Config(String),
}
