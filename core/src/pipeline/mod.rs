//! Chapter loading: cancellation, resource resolution, image processing and coordination.

pub mod cancel;
pub mod coordinator;
pub mod loader;
pub mod markup;
pub mod processor;
pub mod resize;

pub use cancel::CancellationToken;
pub use coordinator::{ContentReady, LoadCoordinator, LoadFailure};
pub use loader::{ContentLoader, LoadOutcome};
pub use processor::ImageProcessor;
pub use resize::ResizeFilter;
