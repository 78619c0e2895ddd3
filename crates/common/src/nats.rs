mod client;
mod consume;
mod consume_logging;
mod stream;
mod tower_consumer;
mod traits;

pub use client::*;
pub use consume::*;
pub use consume_logging::*;
pub use stream::*;
pub use tower_consumer::*;
pub use traits::*;
