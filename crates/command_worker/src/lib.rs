pub mod command_worker;
pub mod domain;
pub mod nats;

pub use command_worker::*;
pub use domain::*;
pub use nats::*;
