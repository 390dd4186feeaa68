pub mod cli;
pub mod profile;

pub use cli::*;
pub use profile::*;
