pub mod mock;
pub mod types;

pub use mock::{MockFramebuffer, MockPage, MockPageLog, PageBehavior};
pub use types::{DriverError, DriverResult, PageDriver, PixelArtifact};
