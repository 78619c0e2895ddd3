mod command_intake_service;
mod response_producer;

pub use command_intake_service::*;
pub use response_producer::*;
