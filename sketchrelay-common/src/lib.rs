//! Common functionality for sketchrelay.
#![warn(missing_docs)]

mod retry;
mod time;

pub use crate::retry::*;
pub use crate::time::*;
