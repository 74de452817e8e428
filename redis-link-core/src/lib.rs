//! Core types shared by the `redis-link` client crates.
//!
//! This crate holds the pieces that do not depend on the async runtime:
//! connection configuration, the error taxonomy, and the RESP value type.

#![deny(warnings)]
#![warn(missing_docs)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::missing_const_for_fn)]

pub mod config;
pub mod error;
pub mod value;

pub use config::{ConnectOptions, SentinelOptions};
pub use error::{Error, Result};
pub use value::RespValue;
