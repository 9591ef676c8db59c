pub mod capture;
pub mod engine;
pub mod error;
pub mod formatter;
pub mod listener;
pub mod scaler;
pub mod session;
pub mod style;

pub use error::{CaptureError, GradingError};
pub use session::{GradingSession, SessionReport};
