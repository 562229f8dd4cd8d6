//! `address-core`: domain building blocks for tenant-scoped addresses.
//!
//! This crate contains **pure domain** primitives (no storage concerns).

pub mod address;
pub mod error;
pub mod generator;
pub mod id;
pub mod value_object;

pub use address::{Address, AddressDiff};
pub use error::{DomainError, DomainResult};
pub use generator::{IdGenerator, IdGeneratorError, RandomIdGenerator};
pub use id::{AddressId, ApplicationId, TenantId};
pub use value_object::ValueObject;
