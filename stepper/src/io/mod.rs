//! I/O for the stepper CLI: configuration, unit files, terminal host.

pub mod config;
pub mod terminal;
pub mod unit_file;
