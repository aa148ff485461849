#![forbid(unsafe_code)]

mod catalog;
mod merge;

pub use catalog::*;
pub use merge::*;
