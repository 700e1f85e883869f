//! Invoicing domain module (event-sourced).
//!
//! Invoices with their details, and the receipts that settle them. Pure, deterministic domain
//! logic (no IO, no storage); prices and numbers are resolved by the caller.

pub mod billing;
pub mod invoice;
pub mod receipt;

pub use billing::BillingSchedule;
pub use invoice::{
    ChangeInvoiceStatus, CreateInvoice, DeleteInvoice, DetailRemoved, DetailUpserted, Invoice,
    InvoiceCommand, InvoiceCreated, InvoiceDeleted, InvoiceDetail, InvoiceEvent,
    InvoiceHeaderUpdated, InvoiceStatus, InvoiceStatusChanged, PriceSource, RemoveDetail,
    StatusChange, UpdateInvoiceHeader, UpsertDetail, normalize_invoice_no,
};
pub use receipt::{
    Receipt, ReceiptCommand, ReceiptEvent, ReceiptRecorded, RecordReceipt, default_receipt_no,
};
