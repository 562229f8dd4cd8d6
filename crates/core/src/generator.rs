//! Address identifier generation.

use std::sync::Arc;

use thiserror::Error;

use crate::id::AddressId;

/// Identifier generation failure.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("address id generation failed: {0}")]
pub struct IdGeneratorError(pub String);

/// Supplies new unique address identifiers.
///
/// Generation is fallible so that implementations backed by an external
/// source can report failure; the repository propagates it unchanged.
pub trait IdGenerator: Send + Sync {
    fn generate(&self) -> Result<AddressId, IdGeneratorError>;
}

impl<G> IdGenerator for Arc<G>
where
    G: IdGenerator + ?Sized,
{
    fn generate(&self) -> Result<AddressId, IdGeneratorError> {
        (**self).generate()
    }
}

/// Default generator: random (v4) UUIDs.
#[derive(Debug, Default, Clone, Copy)]
pub struct RandomIdGenerator;

impl RandomIdGenerator {
    pub fn new() -> Self {
        Self
    }
}

impl IdGenerator for RandomIdGenerator {
    fn generate(&self) -> Result<AddressId, IdGeneratorError> {
        Ok(AddressId::new())
    }
}
