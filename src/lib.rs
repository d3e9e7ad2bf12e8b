pub mod clock;
pub mod config;
pub mod driver;
pub mod errors;
pub mod events;
pub mod indicator;
pub mod logging;
pub mod script;
pub mod telemetry;
pub mod transition;
