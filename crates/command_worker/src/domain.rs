mod device_command_service;
mod dispatcher;
mod error;

pub use device_command_service::*;
pub use dispatcher::*;
pub use error::*;
