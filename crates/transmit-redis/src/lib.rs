//! Redis adapter for Transmit
//!
//! This crate provides:
//! - `RedisBus`: Synchronize Transmit instances over Redis Pub/Sub

mod bus;

pub use bus::RedisBus;
