//! Common utilities for mongolier
//!
//! This crate provides the error type shared by every mongolier crate and the
//! classification of transient "auto-reconnect" driver failures.

pub mod error;

pub use error::{
    is_auto_reconnect, is_duplicate_id_key, is_duplicate_key, MongolierError, Reconnectable,
    Result,
};
