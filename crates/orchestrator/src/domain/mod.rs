pub mod controller;
pub mod ports;
pub mod scheduler;
pub mod topology;
