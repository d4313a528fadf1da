//! Application Layer
//!
//! Use-case orchestration: the alert engine core and the ports it
//! exposes to the host shell.

pub mod ports;
pub mod services;
