//! diskmemo library
//!
//! Persistent memoization of expensive calls, stored as files in a single
//! cache directory and reused until they reach a configured age.

pub mod cache;
pub mod cli;
pub mod fetch;
