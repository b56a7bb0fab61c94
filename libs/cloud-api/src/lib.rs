//! SmartThings cloud API models

pub mod models;
