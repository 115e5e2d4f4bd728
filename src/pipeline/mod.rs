pub mod control;
pub mod inbox;
pub mod measurement;
pub mod poller;
pub mod snapshot;
pub mod window;

pub use control::ControlHandler;
pub use inbox::UpdateInbox;
pub use measurement::{LiveMeasurement, SharedMeasurement};
pub use poller::Poller;
pub use snapshot::SnapshotPublisher;
