// Library interface for the binary and for testing

pub mod app;
pub mod config;
pub mod constants;
pub mod error;
pub mod fixture;
pub mod gateway;
pub mod identity;
pub mod models;
pub mod pairing;
pub mod parent;
pub mod platform;
pub mod schedule;
pub mod serve;
pub mod store;
pub mod sync;
pub mod tracking;

pub use error::{Error, Result};
pub use pairing::derive_pairing_code;
