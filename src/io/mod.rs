// src/io/mod.rs
//
// Device I/O: the serial link, its hand-off slot and error type.

pub mod error;
pub mod serial;
pub mod slot;

pub use error::LinkError;
pub use slot::LatestValueSlot;
