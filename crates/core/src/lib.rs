//! `revsync-core`: shared domain building blocks.
//!
//! Pure primitives only (identifiers, errors, optimistic concurrency tokens).
//! Nothing in here performs IO.

pub mod entity;
pub mod error;
pub mod id;
pub mod value_object;
pub mod version;

pub use entity::Entity;
pub use error::{DomainError, DomainResult};
pub use id::{AggregateId, RecordId};
pub use value_object::ValueObject;
pub use version::ExpectedVersion;
