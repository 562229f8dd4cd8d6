//! Storage engine for tenant-scoped addresses.
//!
//! Data flows top-down: repository → fan-out coordinator → table accessors →
//! column-family session. Results and errors flow back up.

pub mod config;
pub mod fan_out;
pub mod repository;
pub mod session;
pub mod tables;


pub use config::{ConfigError, StoreConfig};
pub use fan_out::{FanOut, FanOutError, MutationPlan};
pub use repository::{AddressRepository, AddressStore, AddressStoreError};
pub use session::{InMemorySession, PostgresSession, Session, SessionError};
pub use tables::{AddressIndexTable, AddressKey, AddressTable};
