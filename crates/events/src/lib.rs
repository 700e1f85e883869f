//! Document events, commands and the publish/subscribe boundary.
//!
//! Events emitted by the invoice, voucher and receipt aggregates are persisted by the infra
//! event store and then published here for projections and upstream contexts (ticket workflow,
//! booking workflow) that react to financial changes.

pub mod bus;
pub mod command;
pub mod envelope;
pub mod event;
pub mod in_memory_bus;

pub use bus::{EventBus, Subscription};
pub use command::Command;
pub use envelope::EventEnvelope;
pub use event::Event;
pub use in_memory_bus::{InMemoryBusError, InMemoryEventBus};
