pub mod checkpoint;
pub mod coordinator;
pub mod inflight;
pub mod resource;
pub mod signal;

pub use checkpoint::{Checkpoint, CheckpointError};
pub use coordinator::{ShutdownCoordinator, ShutdownCoordinatorBuilder, ShutdownReport};
pub use inflight::{InFlightGuard, InFlightTracker};
pub use resource::{Resource, ResourceError, ResourceManager};
pub use signal::{ShutdownSignal, SignalHandler};
