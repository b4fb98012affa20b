//! Concrete driver implementations.
//!
//! The engine only knows the [`Driver`](crate::driver::Driver) port;
//! this module ships a batteries-included local driver. Anything else
//! (remote hosts, recording fakes) implements the same trait outside
//! the crate.

pub mod local;

pub use local::LocalDriver;
