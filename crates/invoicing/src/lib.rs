//! Invoice collaborator contract.
//!
//! The invoice entity itself lives elsewhere; this crate only describes what
//! the revenue engine reads from it: point-in-time snapshots and the
//! `(previous, current)` change events built from them.

pub mod change;
pub mod invoice;

pub use change::{ChangeShape, InvoiceChange};
pub use invoice::{InvoiceId, InvoiceSnapshot, InvoiceStatus};
