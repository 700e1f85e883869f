//! Read models: disposable key/value storage and the document views served to callers.

pub mod store;
pub mod views;

pub use store::{InMemoryReadStore, ReadStore};
pub use views::{InvoiceView, ReceiptInvoiceRef, ReceiptView, VoucherView};
