//! Session/connection cache
//!
//! Every network backend borrows its connections from a [`SessionPool`]. Pools are
//! keyed by [`crate::credentials::Credential`], reconnect stale transports, and never
//! disconnect a connection that is still borrowed.

mod connector;
mod lease;
mod pool;

pub use connector::{Connector, Endpoint, RemoteSession};
pub use lease::SessionLease;
pub use pool::{AcquireMode, PoolConfig, PoolStats, SessionPool};
