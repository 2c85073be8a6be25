// src/lib.rs
// live viewer for a serial current meter; main.rs is the command line front end
pub mod config;
pub mod console;
pub mod drivers;
pub mod engine;
pub mod recorder;
pub mod types;
