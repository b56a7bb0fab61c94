//! Device state

pub mod cache;
