pub mod config;
pub mod error;
pub mod floor;
pub mod message;
pub mod shared_state;
pub mod signal;
