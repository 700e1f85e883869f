//! Monthly billing schedule used to derive the dates of recurring invoices.

use chrono::{Datelike, Duration, NaiveDate};
use serde::{Deserialize, Serialize};

use homeledger_core::{DomainError, DomainResult};

pub const MAX_GENERATION_DAY: u32 = 28;
pub const MAX_DUE_DAYS: u32 = 90;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BillingSchedule {
    /// Day of month on which monthly invoices are issued (1-28).
    pub generation_day_of_month: u32,
    /// Days between issue and due date (1-90).
    pub due_days_after_issue: u32,
    pub enabled: bool,
}

impl Default for BillingSchedule {
    fn default() -> Self {
        Self {
            generation_day_of_month: 1,
            due_days_after_issue: 40,
            enabled: true,
        }
    }
}

impl BillingSchedule {
    pub fn validate(&self) -> DomainResult<()> {
        if !(1..=MAX_GENERATION_DAY).contains(&self.generation_day_of_month) {
            return Err(DomainError::validation(
                "generation_day_of_month",
                format!("must be between 1 and {MAX_GENERATION_DAY}"),
            ));
        }
        if !(1..=MAX_DUE_DAYS).contains(&self.due_days_after_issue) {
            return Err(DomainError::validation(
                "due_days_after_issue",
                format!("must be between 1 and {MAX_DUE_DAYS}"),
            ));
        }
        Ok(())
    }

    /// Issue and due date of the invoice for `year`/`month`.
    ///
    /// The generation day is clamped to the length of the month.
    pub fn dates_for(&self, year: i32, month: u32) -> DomainResult<(NaiveDate, NaiveDate)> {
        if !self.enabled {
            return Err(DomainError::validation(
                "billing",
                "monthly invoice generation is disabled",
            ));
        }
        self.validate()?;

        let first = NaiveDate::from_ymd_opt(year, month, 1)
            .ok_or_else(|| DomainError::validation("month", format!("{year}-{month} is not a month")))?;
        let day = self.generation_day_of_month.min(days_in_month(first));
        let issue = first.with_day(day).ok_or_else(|| {
            DomainError::invariant(format!("day {day} is outside {year}-{month}"))
        })?;
        let due = issue + Duration::days(i64::from(self.due_days_after_issue));
        Ok((issue, due))
    }
}

fn days_in_month(first: NaiveDate) -> u32 {
    let next = if first.month() == 12 {
        NaiveDate::from_ymd_opt(first.year() + 1, 1, 1)
    } else {
        NaiveDate::from_ymd_opt(first.year(), first.month() + 1, 1)
    };
    next.map(|n| (n - first).num_days() as u32).unwrap_or(31)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_schedule_issues_on_the_first_with_forty_days() {
        let (issue, due) = BillingSchedule::default().dates_for(2025, 2).unwrap();
        assert_eq!(issue, NaiveDate::from_ymd_opt(2025, 2, 1).unwrap());
        assert_eq!(due, NaiveDate::from_ymd_opt(2025, 3, 13).unwrap());
    }

    #[test]
    fn rejects_out_of_range_settings() {
        let schedule = BillingSchedule {
            generation_day_of_month: 29,
            ..BillingSchedule::default()
        };
        assert_eq!(
            schedule.validate().unwrap_err().field(),
            Some("generation_day_of_month")
        );

        let schedule = BillingSchedule {
            due_days_after_issue: 0,
            ..BillingSchedule::default()
        };
        assert_eq!(
            schedule.validate().unwrap_err().field(),
            Some("due_days_after_issue")
        );
    }

    #[test]
    fn disabled_schedule_refuses_to_generate() {
        let schedule = BillingSchedule {
            enabled: false,
            ..BillingSchedule::default()
        };
        assert_eq!(schedule.dates_for(2025, 1).unwrap_err().field(), Some("billing"));
    }

    #[test]
    fn invalid_month_is_a_validation_error() {
        let err = BillingSchedule::default().dates_for(2025, 13).unwrap_err();
        assert_eq!(err.field(), Some("month"));
    }

    #[test]
    fn month_lengths() {
        let feb_leap = NaiveDate::from_ymd_opt(2024, 2, 1).unwrap();
        let dec = NaiveDate::from_ymd_opt(2025, 12, 1).unwrap();
        assert_eq!(days_in_month(feb_leap), 29);
        assert_eq!(days_in_month(dec), 31);
    }
}
