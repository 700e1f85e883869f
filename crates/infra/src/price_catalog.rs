use std::collections::HashMap;
use std::sync::RwLock;

use homeledger_core::ServiceTypeId;
use homeledger_pricing::{ServicePrice, ServicePriceSource};

/// In-memory service price catalog for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryServicePriceCatalog {
    prices: RwLock<HashMap<ServiceTypeId, Vec<ServicePrice>>>,
}

impl InMemoryServicePriceCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a price row, or replace the row with the same id.
    pub fn insert(&self, price: ServicePrice) {
        if let Ok(mut prices) = self.prices.write() {
            let rows = prices.entry(price.service_type_id).or_default();
            match rows.iter().position(|p| p.id == price.id) {
                Some(idx) => rows[idx] = price,
                None => rows.push(price),
            }
        }
    }
}

impl ServicePriceSource for InMemoryServicePriceCatalog {
    fn prices_for(&self, service_type_id: ServiceTypeId) -> Vec<ServicePrice> {
        match self.prices.read() {
            Ok(prices) => prices.get(&service_type_id).cloned().unwrap_or_default(),
            Err(_) => vec![],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, Utc};
    use homeledger_pricing::{PriceStatus, ServicePriceId, ServicePriceResolver};
    use rust_decimal_macros::dec;
    use std::sync::Arc;

    #[test]
    fn replaces_rows_by_id() {
        let catalog = Arc::new(InMemoryServicePriceCatalog::new());
        let water = ServiceTypeId::new();
        let mut row = ServicePrice {
            id: ServicePriceId::new(),
            service_type_id: water,
            unit_price: dec!(12000),
            effective_date: NaiveDate::from_ymd_opt(2025, 1, 1).unwrap(),
            end_date: None,
            status: PriceStatus::Pending,
            created_at: Utc::now(),
        };
        catalog.insert(row.clone());

        let resolver = ServicePriceResolver::new(catalog.clone());
        let as_of = NaiveDate::from_ymd_opt(2025, 2, 1).unwrap();
        assert_eq!(resolver.resolve_current_price(water, as_of), None);

        row.status = PriceStatus::Approved;
        catalog.insert(row);
        assert_eq!(catalog.prices_for(water).len(), 1);
        assert_eq!(resolver.resolve_current_price(water, as_of), Some(dec!(12000)));
    }
}
