pub mod app;
pub mod config;
pub mod domain;
pub mod infrastructure;

// Re-export main modules
pub use domain::controller;
pub use domain::scheduler;
pub use domain::topology;
pub use infrastructure::logging;
pub use infrastructure::metrics;
