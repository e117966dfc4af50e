//! Core types shared by the sso-portal crates.
//!
//! Holds the strongly-typed user identifier and the `Result` alias used by
//! storage layers that report failures through rootcause.

pub mod error;
pub mod id;

pub use error::Result;
pub use id::{ParseIdError, UserId};
