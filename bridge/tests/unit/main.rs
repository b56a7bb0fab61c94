//! Integration tests

mod support;

mod test_cloud;
mod test_coordinator;
mod test_scheduler;
mod test_server;
mod test_token_store;
