pub mod errors;
pub mod models;
pub mod services;
pub mod state;
pub mod utils;

// Re-export commonly used types
pub use errors::{RiderError, RiderResult, ValidationError};
pub use models::{ConnectionState, LiveLocation, Ride, RideScreen, RideStatus, ViewModel};
pub use services::ride_view::{ControllerEvent, RideViewController, TrackerSettings};
pub use state::{AppConfig, AppState};
