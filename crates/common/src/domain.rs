mod command;
mod device;
mod device_store;
mod in_memory_device_store;
mod response;

pub use command::*;
pub use device::*;
pub use device_store::*;
pub use in_memory_device_store::*;
pub use response::*;
