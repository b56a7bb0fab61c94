//! Device capabilities and classification

pub mod capability;
pub mod kind;
