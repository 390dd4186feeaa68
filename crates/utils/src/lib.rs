//! Helpers shared by the orchestrator binaries: logging setup and build
//! version information.

mod build_info;
pub mod logging;
pub mod version;
