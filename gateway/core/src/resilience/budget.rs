//! Budget guard
//!
//! Spend is summed per UTC day (from 00:00:00 UTC) and per UTC calendar month
//! (from the 1st, 00:00:00 UTC). A request is rejected when spend so far plus
//! its worst-case estimate would exceed either limit.
//!
//! The guard is soft: sums are read without serializing against concurrent
//! usage writes, so parallel requests can overshoot slightly. A failing or
//! missing persistence port disables enforcement rather than failing calls.

use std::fmt;

use chrono::{DateTime, Datelike, NaiveDate, TimeZone, Utc};
use serde::Serialize;

use crate::config::BudgetConfig;
use crate::error::GatewayError;
use crate::ports::PersistencePort;

/// Which spend window a limit applies to
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BudgetWindow {
    /// Current UTC day
    Daily,
    /// Current UTC calendar month
    Monthly,
}

impl fmt::Display for BudgetWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Daily => write!(f, "daily"),
            Self::Monthly => write!(f, "monthly"),
        }
    }
}

/// Start of the UTC day containing `now`
pub fn day_start(now: DateTime<Utc>) -> DateTime<Utc> {
    utc_midnight(now.date_naive()).unwrap_or(now)
}

/// Start of the UTC calendar month containing `now`
pub fn month_start(now: DateTime<Utc>) -> DateTime<Utc> {
    NaiveDate::from_ymd_opt(now.year(), now.month(), 1)
        .and_then(utc_midnight)
        .unwrap_or(now)
}

fn utc_midnight(date: NaiveDate) -> Option<DateTime<Utc>> {
    date.and_hms_opt(0, 0, 0)
        .map(|naive| Utc.from_utc_datetime(&naive))
}

/// Outcome of a budget check that did not reject
#[derive(Clone, Debug, Default, PartialEq)]
pub struct BudgetStatus {
    /// Whether limits were actually enforced
    pub enforced: bool,
    /// Spend so far today
    pub daily_spent: f64,
    /// Spend so far this month
    pub monthly_spent: f64,
}

/// Checks spend against configured limits
#[derive(Clone, Debug)]
pub struct BudgetGuard {
    config: BudgetConfig,
}

impl BudgetGuard {
    /// Build from configuration
    pub fn new(config: BudgetConfig) -> Self {
        Self { config }
    }

    /// Check whether a request estimated at `estimated_cost` fits
    ///
    /// # Errors
    ///
    /// `GatewayError::BudgetExceeded` when a limit would be exceeded and
    /// `hard_stop` is set.
    pub async fn check(
        &self,
        port: Option<&dyn PersistencePort>,
        now: DateTime<Utc>,
        estimated_cost: f64,
    ) -> Result<BudgetStatus, GatewayError> {
        if !self.config.enabled {
            return Ok(BudgetStatus::default());
        }
        let Some(port) = port else {
            tracing::debug!("No persistence port, budget not enforced");
            return Ok(BudgetStatus::default());
        };

        let spent = async {
            let daily = port.sum_successful_cost(day_start(now)).await?;
            let monthly = port.sum_successful_cost(month_start(now)).await?;
            Ok::<_, crate::ports::PortError>((daily, monthly))
        }
        .await;

        let (daily_spent, monthly_spent) = match spent {
            Ok(sums) => sums,
            Err(err) => {
                tracing::warn!(error = %err, "Failed to read spend, budget not enforced");
                return Ok(BudgetStatus::default());
            }
        };

        self.check_window(BudgetWindow::Daily, daily_spent, self.config.daily_limit, estimated_cost)?;
        self.check_window(
            BudgetWindow::Monthly,
            monthly_spent,
            self.config.monthly_limit,
            estimated_cost,
        )?;

        Ok(BudgetStatus {
            enforced: true,
            daily_spent,
            monthly_spent,
        })
    }

    fn check_window(
        &self,
        window: BudgetWindow,
        spent: f64,
        limit: f64,
        estimated: f64,
    ) -> Result<(), GatewayError> {
        let projected = spent + estimated;

        if projected > limit {
            let remaining = (limit - spent).max(0.0);
            if self.config.hard_stop {
                tracing::warn!(%window, spent, estimated, limit, "Budget exceeded, rejecting request");
                return Err(GatewayError::BudgetExceeded {
                    window,
                    spent,
                    estimated,
                    limit,
                    remaining,
                });
            }
            tracing::warn!(
                %window,
                spent,
                estimated,
                limit,
                "Budget exceeded, proceeding because hard_stop is disabled"
            );
            return Ok(());
        }

        let used_pct = projected / limit * 100.0;
        if used_pct >= self.config.alert_threshold {
            tracing::warn!(
                %window,
                spent,
                limit,
                used_pct,
                threshold = self.config.alert_threshold,
                "Budget alert threshold reached"
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::InMemoryUsageStore;

    fn at(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    #[test]
    fn test_window_boundaries_are_utc() {
        let now = at("2026-03-17T23:59:59+00:00");
        assert_eq!(day_start(now), at("2026-03-17T00:00:00+00:00"));
        assert_eq!(month_start(now), at("2026-03-01T00:00:00+00:00"));

        // 01:00 in UTC+02:00 is still the previous UTC day
        let now = at("2026-04-01T01:00:00+02:00");
        assert_eq!(day_start(now), at("2026-03-31T00:00:00+00:00"));
        assert_eq!(month_start(now), at("2026-03-01T00:00:00+00:00"));
    }

    fn guard(hard_stop: bool) -> BudgetGuard {
        BudgetGuard::new(BudgetConfig {
            daily_limit: 10.0,
            monthly_limit: 100.0,
            hard_stop,
            ..BudgetConfig::default()
        })
    }

    #[tokio::test]
    async fn test_daily_limit_rejects() {
        let now = at("2026-05-10T12:00:00Z");
        let store = InMemoryUsageStore::new();
        store.seed_cost(now, 15.0);

        let err = guard(true)
            .check(Some(&store as &dyn PersistencePort), now, 0.01)
            .await
            .unwrap_err();
        match err {
            GatewayError::BudgetExceeded {
                window, remaining, ..
            } => {
                assert_eq!(window, BudgetWindow::Daily);
                assert!(remaining.abs() < f64::EPSILON);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_under_limit_proceeds() {
        let now = at("2026-05-10T12:00:00Z");
        let store = InMemoryUsageStore::new();
        store.seed_cost(now, 5.0);

        let status = guard(true).check(Some(&store as &dyn PersistencePort), now, 0.01).await.unwrap();
        assert!(status.enforced);
        assert!((status.daily_spent - 5.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_monthly_limit_counts_earlier_days() {
        let now = at("2026-05-10T12:00:00Z");
        let store = InMemoryUsageStore::new();
        store.seed_cost(at("2026-05-02T08:00:00Z"), 99.99);
        store.seed_cost(at("2026-04-30T08:00:00Z"), 500.0);

        let err = guard(true).check(Some(&store as &dyn PersistencePort), now, 0.5).await.unwrap_err();
        assert!(matches!(
            err,
            GatewayError::BudgetExceeded {
                window: BudgetWindow::Monthly,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_soft_limit_only_warns() {
        let now = at("2026-05-10T12:00:00Z");
        let store = InMemoryUsageStore::new();
        store.seed_cost(now, 15.0);
        assert!(guard(false).check(Some(&store as &dyn PersistencePort), now, 0.01).await.is_ok());
    }

    #[tokio::test]
    async fn test_missing_or_failing_port_not_enforced() {
        let now = Utc::now();
        let status = guard(true).check(None, now, 1000.0).await.unwrap();
        assert!(!status.enforced);

        let store = InMemoryUsageStore::new();
        store.seed_cost(now, 15.0);
        store.fail_reads(true);
        let status = guard(true).check(Some(&store as &dyn PersistencePort), now, 0.01).await.unwrap();
        assert!(!status.enforced);
    }
}
