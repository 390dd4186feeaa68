//! Application module
//!
//! Wires the profile, the affinity scheduler, the controller and the stdio
//! adapters together and runs them as tasks until shutdown.

pub mod builder;
pub mod core;
pub mod services;
pub mod tasks;

pub use builder::ApplicationBuilder;
pub use self::core::Application;
pub use services::ApplicationServices;
