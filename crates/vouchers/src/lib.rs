//! Cash voucher domain module (event-sourced).
//!
//! A voucher records a cash disbursement. It is drafted, submitted for approval and then either
//! approved (final, with a journal-entry reference) or cancelled.

pub mod voucher;

pub use voucher::{
    ApproveVoucher, CancelVoucher, CreateVoucher, DeleteVoucher, ItemRemoved, ItemUpserted,
    RemoveItem, ReturnToDraft, SubmitVoucher, UpsertItem, Voucher, VoucherApproved,
    VoucherCancelled, VoucherCommand, VoucherCreated, VoucherDeleted, VoucherEvent, VoucherItem,
    VoucherItemSpec, VoucherReturnedToDraft, VoucherStatus, VoucherSubmitted,
    normalize_voucher_no,
};
