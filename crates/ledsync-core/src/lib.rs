pub mod artifacts;
pub mod capture;
pub mod debug;
pub mod error;
pub mod extract;
pub mod mask;
pub mod pipeline;
pub mod reconcile;
pub mod region;
pub mod video;

#[cfg(test)]
mod test_support;

pub use error::SyncError;
