//! HTTP request handlers.

pub mod artifacts;
pub mod health;
pub mod storage;

pub use artifacts::*;
pub use health::*;
pub use storage::*;
