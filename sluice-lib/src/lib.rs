//! `sluice` is a rate-limit aware HTTP client for REST APIs that scope their
//! quotas per route and disclose them through response headers.
//!
//! Every request is mapped onto a bucket key. Buckets that are exhausted
//! defer the request until the server-disclosed reset time instead of
//! letting the server throttle the client, and a request that loses its
//! connection half-way is replayed once on a fresh connection.
//!
//! ```no_run
//! use secrecy::SecretString;
//! use sluice_lib::{DispatcherBuilder, Request, Result};
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!   let dispatcher = DispatcherBuilder::builder()
//!       .token(SecretString::from("my-secret-token".to_string()))
//!       .build()
//!       .dispatcher()
//!       .await?;
//!
//!   let reply = dispatcher
//!       .submit(Request::get("/channels/381870553235193857/messages").query("limit", "5"))
//!       .await?;
//!   println!("{:?}", reply.bytes());
//!   Ok(())
//! }
//! ```
#![warn(clippy::all, clippy::pedantic)]
#![warn(
    absolute_paths_not_starting_with_crate,
    rustdoc::invalid_html_tags,
    missing_copy_implementations,
    missing_debug_implementations,
    semicolon_in_expressions_from_macros,
    unreachable_pub,
    unused_extern_crates,
    variant_size_differences,
    clippy::missing_const_for_fn
)]
#![deny(anonymous_parameters, macro_use_extern_crate)]
#![deny(missing_docs)]
#![allow(clippy::module_name_repetitions)]

mod connection;
mod dispatcher;
mod executor;
mod retry;
mod types;

/// Route normalization, bucket bookkeeping and rate-limit header handling.
pub mod ratelimit;

pub use crate::{
    connection::{Connection, ConnectionManager, ConnectionSettings},
    dispatcher::{DEFAULT_SWEEP_INTERVAL, Dispatcher, DispatcherBuilder},
    executor::{Executor, RawResponse},
    ratelimit::{BucketKey, BucketStore, Readiness, normalize},
    types::{
        Config, DEFAULT_BASE_URL, DEFAULT_CONNECT_TIMEOUT, DEFAULT_TIMEOUT, DEFAULT_USER_AGENT,
        ErrorKind, ReconnectPolicy, Request, RequestBody, Response, Result,
    },
};
