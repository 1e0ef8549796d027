//! Fuxi store: known-object cache and the ordered per-key delta queue that
//! sits between a reflector (producer) and a dispatcher (consumer).

#![forbid(unsafe_code)]

mod cache;
mod delta_fifo;

pub use cache::Cache;
pub use delta_fifo::{DeltaFifo, Popped};
