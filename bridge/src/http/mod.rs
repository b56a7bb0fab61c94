//! Cloud HTTP layer

pub mod client;
pub mod cloud;
pub mod devices;
pub mod oauth;
