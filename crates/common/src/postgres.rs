mod client;
mod config;
mod device_store;

pub use client::*;
pub use config::*;
pub use device_store::*;
