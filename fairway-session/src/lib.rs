pub mod ble;
pub mod config;
pub mod error;
pub mod location;
pub mod observer;
pub mod registry;
pub mod session;
pub mod storage;

pub use error::SessionError;
pub use location::LocationTracker;
pub use registry::BallRegistry;
pub use session::SessionCoordinator;
