//! Logging infrastructure: structured `tracing` output, JSON or pretty, with optional
//! file rotation and secret scrubbing before anything reaches stdout or disk.

pub mod logger;
pub mod rotation;
pub mod secret_scrubbing;

pub use logger::LoggerImpl;
pub use rotation::LogRotator;
pub use secret_scrubbing::SecretScrubbingLayer;
