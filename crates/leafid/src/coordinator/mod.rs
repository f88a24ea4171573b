//! Worker id leasing for Snowflake mode.
//!
//! A [`WorkerIdCoordinator`] maps each instance address (`ip:port`) to a
//! stable worker id through a [`CoordinationBackend`], keeps a local copy in a
//! [`LocalWorkerIdFile`], and refreshes a liveness timestamp while running.

mod backend;
mod endpoint;
mod fallback;
mod holder;
mod memory;

pub use backend::*;
pub use endpoint::*;
pub use fallback::*;
pub use holder::*;
pub use memory::*;
