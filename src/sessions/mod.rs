//! Session lifecycle: registry of resident conversation windows plus the
//! background sweeper that flushes and evicts idle ones.

pub mod registry;
pub mod sweeper;

pub use registry::SessionRegistry;
pub use sweeper::EvictionSweeper;
