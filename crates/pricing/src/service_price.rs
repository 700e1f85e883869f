//! Date-effective service prices.
//!
//! A service type either has a fixed price (an APPROVED row whose half-open interval
//! `[effective_date, end_date)` covers the reference date) or it has none, in which case the
//! caller must supply a price. Price rows are owned by a separate catalog; the resolver only
//! reads them.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use homeledger_core::ServiceTypeId;

/// Identifier of a price row.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ServicePriceId(pub Uuid);

impl ServicePriceId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for ServicePriceId {
    fn default() -> Self {
        Self::new()
    }
}

/// Approval status of a price row. Only `Approved` rows are ever used for pricing.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PriceStatus {
    Pending,
    Approved,
    Rejected,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServicePrice {
    pub id: ServicePriceId,
    pub service_type_id: ServiceTypeId,
    pub unit_price: Decimal,
    pub effective_date: NaiveDate,
    /// Exclusive. `None` means still effective.
    pub end_date: Option<NaiveDate>,
    pub status: PriceStatus,
    pub created_at: DateTime<Utc>,
}

impl ServicePrice {
    /// Whether this row prices `as_of`.
    pub fn applies_on(&self, as_of: NaiveDate) -> bool {
        self.status == PriceStatus::Approved
            && self.effective_date <= as_of
            && self.end_date.is_none_or(|end| as_of < end)
    }
}

/// Read access to the price rows of a service type.
pub trait ServicePriceSource: Send + Sync {
    /// All rows of a service type, in any order and any status.
    fn prices_for(&self, service_type_id: ServiceTypeId) -> Vec<ServicePrice>;
}

impl<S> ServicePriceSource for std::sync::Arc<S>
where
    S: ServicePriceSource + ?Sized,
{
    fn prices_for(&self, service_type_id: ServiceTypeId) -> Vec<ServicePrice> {
        (**self).prices_for(service_type_id)
    }
}

/// Resolves the effective unit price of a service type on a date.
#[derive(Debug, Clone)]
pub struct ServicePriceResolver<S> {
    source: S,
}

impl<S> ServicePriceResolver<S>
where
    S: ServicePriceSource,
{
    pub fn new(source: S) -> Self {
        Self { source }
    }

    /// The row that prices `service_type_id` on `as_of`, if any.
    ///
    /// Overlapping rows: the latest `effective_date` wins, then the most recently created one.
    pub fn resolve_current(
        &self,
        service_type_id: ServiceTypeId,
        as_of: NaiveDate,
    ) -> Option<ServicePrice> {
        self.source
            .prices_for(service_type_id)
            .into_iter()
            .filter(|p| p.service_type_id == service_type_id && p.applies_on(as_of))
            .max_by_key(|p| (p.effective_date, p.created_at))
    }

    /// `None` means "no fixed price": the caller has to supply one.
    pub fn resolve_current_price(
        &self,
        service_type_id: ServiceTypeId,
        as_of: NaiveDate,
    ) -> Option<Decimal> {
        self.resolve_current(service_type_id, as_of)
            .map(|p| p.unit_price)
    }
}
