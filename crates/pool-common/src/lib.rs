//! Shared primitives for the mining pool services.

pub mod multi_call;

pub use multi_call::{CallHandle, MultiCall};
