//! Virtual gamepad core: finds the companion server on the local network and
//! turns physical controller input into normalized gamepad messages.

pub mod config;
pub mod consumer;
pub mod control;
pub mod controller;
pub mod discovery;
pub mod platform;
