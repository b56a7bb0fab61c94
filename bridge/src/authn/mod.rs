//! OAuth2 token handling

pub mod token;
pub mod token_store;
