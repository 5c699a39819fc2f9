//! Leader election for control planes that span clusters.
//!
//! The lease record lives in a single mutable remote document (a GitHub
//! gist) instead of a Kubernetes `Lease`, so candidates in different
//! clusters, or outside any cluster, can contend for the same leadership.
//!
//! ```no_run
//! use kubekit_coordination::{Elector, ElectorConfig, GistLock};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let lock = GistLock::new("replica-1", "18b035a3a81e5e64ac5c7b55301aeaf9", "<token>").await?;
//! let elector = Elector::new(lock, ElectorConfig::default())?;
//! elector
//!     .run(async {
//!         // leader-only work; stops when leadership is lost
//!     })
//!     .await?;
//! # Ok(())
//! # }
//! ```

mod elector;
mod gist;
mod lock;
#[cfg(test)]
mod test_util;

pub use elector::{Elector, ElectorConfig, ElectorError};
pub use gist::{GistClient, GistError};
pub use lock::{ElectionLock, Error, GistLock, LeaderElectionRecord, Result};
