//! Background workers

pub mod poller;
pub mod token_refresh;
