#![allow(unreachable_pub)]

mod config;
mod error;
mod request;
mod response;

pub use config::{
    Config, DEFAULT_BASE_URL, DEFAULT_CONNECT_TIMEOUT, DEFAULT_TIMEOUT, DEFAULT_USER_AGENT,
    ReconnectPolicy,
};
pub use error::ErrorKind;
pub use request::{Request, RequestBody};
pub use response::Response;

/// The sluice `Result` type
pub type Result<T> = std::result::Result<T, crate::ErrorKind>;
