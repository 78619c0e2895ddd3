pub mod domain;
pub mod nats;
pub mod postgres;
pub mod telemetry;

#[cfg(any(test, feature = "testing"))]
pub use domain::MockDeviceStore;
#[cfg(any(test, feature = "testing"))]
pub use nats::{MockJetStreamConsumer, MockJetStreamPublisher, MockPullConsumer, MockStreamAdmin};
