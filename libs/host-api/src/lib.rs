//! Local host API models

pub mod models;
