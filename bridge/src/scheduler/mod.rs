//! Polling cadence and scheduling

pub mod activity;
pub mod poll;
