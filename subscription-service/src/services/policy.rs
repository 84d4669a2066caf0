//! Billing period arithmetic.

use anyhow::{bail, Result};
use chrono::{DateTime, Duration, NaiveTime, TimeZone, Utc};
use rand::Rng;

use crate::config::BillingConfig;

/// Entitlement window of one paid period.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BillingWindow {
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
    pub grace_end: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct BillingPolicy {
    period: Duration,
    grace: Duration,
    renewal_hour: u32,
    utc_offset: Duration,
    lookup_window: Duration,
}

impl BillingPolicy {
    pub fn from_config(config: &BillingConfig) -> Result<Self> {
        if config.period_days <= 0 {
            bail!("Billing period must be at least one day");
        }
        if config.grace_days < 0 {
            bail!("Grace period cannot be negative");
        }
        if config.renewal_hour > 23 {
            bail!("Renewal hour must be between 0 and 23");
        }
        if config.renewal_utc_offset_secs.abs() >= 24 * 3600 {
            bail!("Renewal UTC offset must be less than one day");
        }
        if config.schedule_lookup_window_days < 0 {
            bail!("Schedule lookup window cannot be negative");
        }

        Ok(Self {
            period: Duration::days(config.period_days),
            grace: Duration::days(config.grace_days),
            renewal_hour: config.renewal_hour,
            utc_offset: Duration::seconds(config.renewal_utc_offset_secs.into()),
            lookup_window: Duration::days(config.schedule_lookup_window_days),
        })
    }

    /// Window of a period paid at `now`.
    pub fn window(&self, now: DateTime<Utc>) -> BillingWindow {
        let period_end = now + self.period;
        BillingWindow {
            period_start: now,
            period_end,
            grace_end: period_end + self.grace,
        }
    }

    /// Day after `period_end`, at `renewal_hour:minute` on the renewal wall clock.
    pub fn next_renewal_at(&self, period_end: DateTime<Utc>, minute: u32) -> DateTime<Utc> {
        let local_day = (period_end + Duration::days(1) + self.utc_offset).date_naive();
        let local_time = local_day.and_time(NaiveTime::default())
            + Duration::hours(self.renewal_hour.into())
            + Duration::minutes(minute.min(59).into());

        Utc.from_utc_datetime(&(local_time - self.utc_offset))
    }

    /// Spreads renewals over the renewal hour.
    pub fn random_renewal_minute() -> u32 {
        rand::thread_rng().gen_range(0..60)
    }

    /// Range in which a charge scheduled for `scheduled_at` is searched for.
    pub fn lookup_range(&self, scheduled_at: DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>) {
        (scheduled_at - self.lookup_window, scheduled_at + self.lookup_window)
    }
}
