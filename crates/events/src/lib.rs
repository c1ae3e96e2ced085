//! Event delivery mechanics: the event contract, envelopes and pub/sub.
//!
//! Nothing here knows about invoices or revenue; the invoicing crate supplies
//! the payload type and infra wires a bus to the synchronization worker.

pub mod bus;
pub mod envelope;
pub mod event;
pub mod in_memory_bus;

pub use bus::{EventBus, Subscription};
pub use envelope::EventEnvelope;
pub use event::Event;
pub use in_memory_bus::{InMemoryBusError, InMemoryEventBus};
