// Frameworks layer: process bootstrap, logging and the host loop.

pub mod config;
pub mod server;
