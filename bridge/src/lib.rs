//! SmartThings bridge library
//!
//! Keeps a local view of SmartThings device state in step with the cloud
//! and forwards commands from the host.

pub mod app;
pub mod authn;
pub mod coordinator;
pub mod devices;
pub mod discovery;
pub mod errors;
pub mod filesys;
pub mod http;
pub mod logs;
pub mod ratelimit;
pub mod scheduler;
pub mod server;
pub mod state;
pub mod storage;
pub mod utils;
pub mod workers;
