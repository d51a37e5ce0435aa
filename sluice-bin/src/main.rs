//! `sluice` sends a single request to a REST API that scopes its rate limits
//! per route, and prints the reply.
//!
//! The binary is a thin wrapper around `sluice-lib`, which keeps track of the
//! limits the API discloses and waits for exhausted buckets instead of
//! getting throttled.
//!
//! Fetch the current user:
//! ```sh
//! SLUICE_TOKEN=... sluice get /users/@me
//! ```
//!
//! Post a message:
//! ```sh
//! sluice post /channels/381870553235193857/messages --json '{"content": "hi"}'
//! ```
//!
//! Settings can also be read from a TOML file, `sluice.toml` in the working
//! directory by default:
//! ```sh
//! sluice --config ~/.config/sluice.toml get /gateway
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

use std::io::{self, Write};

use anyhow::{Context, Error, Result};
use clap::{Parser, crate_version};
use log::{error, info};
use sluice_lib::{Config, DispatcherBuilder, ErrorKind};

mod formatters;
mod options;
mod verbosity;

use crate::formatters::{
    log::init_logging,
    response::{format_payload, format_response},
};
use crate::options::SluiceOptions;

/// A C-like enum that can be cast to `i32` and used as process exit code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ExitCode {
    Success = 0,
    // NOTE: exit code 1 is used for any `Result::Err` bubbled up to `main()`
    // using the `?` operator, e.g. when the API cannot be reached.
    #[allow(unused)]
    UnexpectedFailure = 1,
    ApiError = 2,
    ConfigFile = 3,
}

fn main() -> Result<()> {
    // std::process::exit doesn't guarantee that all destructors will be run,
    // therefore we wrap the main code in another function to ensure that.
    // See: https://doc.rust-lang.org/stable/std/process/fn.exit.html
    let exit_code = run_main()?;
    std::process::exit(exit_code);
}

/// Set up logging and runtime and send the request
fn run_main() -> Result<i32> {
    let opts = SluiceOptions::parse();
    init_logging(&opts.verbose);

    let config = match opts.config() {
        Ok(config) if config.token.is_none() => {
            error!("{}", ErrorKind::MissingToken);
            return Ok(ExitCode::ConfigFile as i32);
        }
        Ok(config) => config,
        Err(e) => {
            error!("Error while loading config: {e:?} (sluice {})", crate_version!());
            return Ok(ExitCode::ConfigFile as i32);
        }
    };

    let runtime = tokio::runtime::Runtime::new()?;
    match runtime.block_on(run(&opts, config)) {
        Err(e) if Some(io::ErrorKind::BrokenPipe) == underlying_io_error_kind(&e) => {
            Ok(ExitCode::Success as i32)
        }
        res => res,
    }
}

/// Check if the given error can be traced back to an `io::ErrorKind`
/// This is helpful for troubleshooting the root cause of an error.
/// Code is taken from the anyhow documentation.
fn underlying_io_error_kind(error: &Error) -> Option<io::ErrorKind> {
    for cause in error.chain() {
        if let Some(io_error) = cause.downcast_ref::<io::Error>() {
            return Some(io_error.kind());
        }
    }
    None
}

/// Send the request described by `opts` and print the reply
async fn run(opts: &SluiceOptions, config: Config) -> Result<i32> {
    let request = opts.request()?;
    let base_url = config.base_url.clone();

    let dispatcher = DispatcherBuilder::from_config(config)
        .dispatcher()
        .await
        .with_context(|| format!("Cannot connect to `{base_url}`"))?;

    info!("{} {}", request.method, request.route);
    match dispatcher.submit(request).await {
        Ok(response) => {
            let mut stdout = io::stdout().lock();
            stdout.write_all(&format_response(&response))?;
            stdout.flush()?;
            Ok(ExitCode::Success as i32)
        }
        Err(ErrorKind::Api { status, payload }) => {
            let mut stderr = io::stderr().lock();
            writeln!(stderr, "{status}")?;
            let payload = format_payload(&payload);
            if !payload.is_empty() {
                writeln!(stderr, "{}", payload.trim_end())?;
            }
            Ok(ExitCode::ApiError as i32)
        }
        Err(e) => Err(e.into()),
    }
}
