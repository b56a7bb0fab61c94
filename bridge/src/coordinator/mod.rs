//! Device command coordination

pub mod command;
pub mod fsm;
