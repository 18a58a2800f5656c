#![no_std]

#[cfg(test)]
extern crate std;

pub mod codec;
pub mod config;
pub mod context;
pub mod error;
pub mod fixed;
pub mod fusion;
pub mod hid;
pub mod hop;
pub mod ids;
pub mod log_ring;
pub mod quality;
pub mod radio_if;
pub mod receiver;
pub mod sensor;
pub mod storage;
pub mod timer;
pub mod tracker;

pub mod prelude;
