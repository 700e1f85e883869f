//! Infrastructure layer: event store, command pipeline, read models and the document service.

pub mod clock;
pub mod command_dispatcher;
pub mod config;
pub mod error;
pub mod event_store;
pub mod numbering;
pub mod price_catalog;
pub mod projections;
pub mod read_model;
pub mod receipt_processor;
pub mod service;

pub use clock::{Clock, FixedClock, SystemClock, business_date};
pub use command_dispatcher::{CommandDispatcher, DispatchError, Dispatched, Prepared};
pub use config::{ConfigError, FinanceConfig};
pub use error::FinanceError;
pub use numbering::{DocumentKind, DocumentNumberRegistry};
pub use price_catalog::InMemoryServicePriceCatalog;
pub use receipt_processor::{ReceiptProcessor, RecordReceiptRequest, RecordedReceipt};
pub use service::{
    FinancialDocumentService, InvoiceDetailInput, NewInvoiceDraft, NewVoucher, RecurringCharge,
    VoucherItemInput,
};

mod integration_tests;
