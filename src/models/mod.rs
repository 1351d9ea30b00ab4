//! Internal models and types for the r-token-registry library.
//!
//! This module contains the token record, the boundary-crossing token info
//! shape, and the error type used throughout the library.

mod rtoken_error;
mod rtoken_info;
mod rtoken_record;

pub use rtoken_error::RTokenError;
pub use rtoken_info::RTokenInfo;
pub use rtoken_record::{RIdentity, RTokenRecord};
