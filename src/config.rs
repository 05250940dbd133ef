//! Deployment configuration, all from environment variables.

use anyhow::{Context, Result};
use std::{env, str::FromStr, time::Duration};

use crate::{
    planner::PlannerSettings,
    poller::PollSettings,
    timeframe::{Anchors, PeriodAnchor},
};

pub const DEFAULT_DATABASE: &str = "data-lake-database-0";
pub const DEFAULT_OUTPUT: &str =
    "s3://s3-data-lake-athena-sql-results/athena-query-results-aggregations/";

#[derive(Clone, Debug)]
pub struct Settings {
    pub planner: PlannerSettings,
    pub athena_output: String,
    pub redis_url: Option<String>,
}

impl Settings {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|k| env::var(k).ok())
    }

    /// Build settings from an arbitrary variable lookup, so that we can test
    /// without touching the process environment.
    pub fn from_lookup<F>(get: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        fn parsed<T, F>(get: &F, key: &str, default: T) -> Result<T>
        where
            T: FromStr,
            T::Err: std::error::Error + Send + Sync + 'static,
            F: Fn(&str) -> Option<String>,
        {
            match get(key) {
                Some(text) => text
                    .trim()
                    .parse()
                    .with_context(|| format!("invalid value {text:?} for ${key}")),
                None => Ok(default),
            }
        }

        let database = get("HYDRONODE_ATHENA_DATABASE").unwrap_or_else(|| DEFAULT_DATABASE.to_owned());
        let athena_output = get("HYDRONODE_ATHENA_OUTPUT").unwrap_or_else(|| DEFAULT_OUTPUT.to_owned());

        let redis_url = get("HYDRONODE_REDIS_URL")
            .or_else(|| get("REDIS_HOST").map(|host| format!("rediss://{host}:6379")));

        let interval_ms: u64 = parsed(&get, "HYDRONODE_POLL_INTERVAL_MS", 1000)?;
        let max_wait_secs: u64 = parsed(&get, "HYDRONODE_POLL_MAX_WAIT_SECS", 300)?;

        let mut anchors = Anchors::default();

        if let Some(text) = get("HYDRONODE_DAYS_ANCHOR") {
            anchors.days = anchor(&text, "HYDRONODE_DAYS_ANCHOR")?;
        }

        if let Some(text) = get("HYDRONODE_MONTHS_ANCHOR") {
            anchors.months = anchor(&text, "HYDRONODE_MONTHS_ANCHOR")?;
        }

        Ok(Settings {
            planner: PlannerSettings {
                database,
                poll: PollSettings {
                    interval: Duration::from_millis(interval_ms),
                    max_wait: Duration::from_secs(max_wait_secs),
                },
                anchors,
            },
            athena_output,
            redis_url,
        })
    }
}

fn anchor(text: &str, key: &str) -> Result<PeriodAnchor> {
    text.parse()
        .with_context(|| format!("${key} must be `today`, `latest` or YYYY-MM-DD, not {text:?}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use std::collections::HashMap;

    fn settings(vars: &[(&str, &str)]) -> Result<Settings> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect();
        Settings::from_lookup(|k| vars.get(k).cloned())
    }

    #[test]
    fn defaults() {
        let s = settings(&[]).unwrap();
        assert_eq!(s.planner.database, DEFAULT_DATABASE);
        assert_eq!(s.athena_output, DEFAULT_OUTPUT);
        assert_eq!(s.redis_url, None);
        assert_eq!(s.planner.poll.interval, Duration::from_secs(1));
        assert_eq!(s.planner.poll.max_wait, Duration::from_secs(300));
        assert_eq!(
            s.planner.anchors.days,
            PeriodAnchor::Fixed(NaiveDate::from_ymd_opt(2021, 4, 30).unwrap())
        );
    }

    #[test]
    fn overrides() {
        let s = settings(&[
            ("REDIS_HOST", "cache.example.com"),
            ("HYDRONODE_POLL_MAX_WAIT_SECS", "60"),
            ("HYDRONODE_DAYS_ANCHOR", "today"),
            ("HYDRONODE_MONTHS_ANCHOR", "latest"),
        ])
        .unwrap();
        assert_eq!(s.redis_url.as_deref(), Some("rediss://cache.example.com:6379"));
        assert_eq!(s.planner.poll.max_wait, Duration::from_secs(60));
        assert_eq!(s.planner.anchors.days, PeriodAnchor::Today);
        assert_eq!(s.planner.anchors.months, PeriodAnchor::LatestPartition);

        let s = settings(&[
            ("REDIS_HOST", "ignored"),
            ("HYDRONODE_REDIS_URL", "redis://localhost:6379"),
        ])
        .unwrap();
        assert_eq!(s.redis_url.as_deref(), Some("redis://localhost:6379"));
    }

    #[test]
    fn garbage_rejected() {
        assert!(settings(&[("HYDRONODE_POLL_INTERVAL_MS", "soon")]).is_err());
        let err = settings(&[("HYDRONODE_DAYS_ANCHOR", "2021-13-01")]).unwrap_err();
        assert!(format!("{err:#}").contains("HYDRONODE_DAYS_ANCHOR"));
    }
}
