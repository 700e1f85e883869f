//! `homeledger-core` — domain foundation building blocks.
//!
//! This crate contains **pure domain** primitives shared by the document crates
//! (no infrastructure concerns).

pub mod aggregate;
pub mod entity;
pub mod error;
pub mod id;
pub mod money;
pub mod value_object;

pub use aggregate::{Aggregate, AggregateRoot, ExpectedVersion};
pub use entity::Entity;
pub use error::{DomainError, DomainResult, ErrorKind};
pub use id::{
    ActorId, AggregateId, ApartmentId, InvoiceId, JournalEntryId, LineId, PaymentMethodId,
    ReceiptId, ServiceTypeId, TicketId, VoucherId,
};
pub use money::Money;
pub use value_object::ValueObject;
