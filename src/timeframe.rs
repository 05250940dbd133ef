//! Timeframes, the partitions they map to, and period generation.
//!
//! The aggregate tables in the data lake are Hive-style partitioned by string
//! columns `year`, `month` and `day` (zero-padded). Each timeframe reads from
//! its own pre-aggregated table, and only the date columns that exist in that
//! table may appear in a partition filter.

use chrono::{Datelike, Days, Months, NaiveDate, Utc};
use std::{fmt, str::FromStr};

use crate::error::{Result, ServiceError};

#[derive(Copy, Clone, Debug, Eq, Hash, PartialEq)]
pub enum Timeframe {
    Days,
    Months,
    Years,
}

impl Timeframe {
    pub const ALL: [Timeframe; 3] = [Timeframe::Days, Timeframe::Months, Timeframe::Years];

    pub fn as_str(&self) -> &'static str {
        match self {
            Timeframe::Days => "DAYS",
            Timeframe::Months => "MONTHS",
            Timeframe::Years => "YEARS",
        }
    }

    pub fn table(&self) -> &'static str {
        match self {
            Timeframe::Days => "sensordata_daily_aggregates",
            Timeframe::Months => "sensordata_monthly_aggregates",
            Timeframe::Years => "sensordata_yearly_agg",
        }
    }

    /// The partition columns of this timeframe's table, coarsest first.
    pub fn date_columns(&self) -> &'static [&'static str] {
        match self {
            Timeframe::Days => &["year", "month", "day"],
            Timeframe::Months => &["year", "month"],
            Timeframe::Years => &["year"],
        }
    }

    /// How many periods we look back over.
    pub fn lookback(&self) -> usize {
        match self {
            Timeframe::Days => 12,
            Timeframe::Months => 6,
            Timeframe::Years => 4,
        }
    }

    /// Generate the periods to scan, newest first, ending at `anchor`. Only
    /// the components of `anchor` that matter at this granularity are used.
    pub fn periods(&self, anchor: NaiveDate) -> Vec<Period> {
        let n = self.lookback();

        match self {
            Timeframe::Days => (0..n as u64)
                .filter_map(|i| anchor.checked_sub_days(Days::new(i)))
                .map(|d| Period::day(d.year(), d.month(), d.day()))
                .collect(),

            Timeframe::Months => {
                let first = anchor.with_day(1).unwrap_or(anchor);
                (0..n as u32)
                    .filter_map(|i| first.checked_sub_months(Months::new(i)))
                    .map(|d| Period::month(d.year(), d.month()))
                    .collect()
            }

            Timeframe::Years => (0..n as i32)
                .map(|i| Period::year(anchor.year() - i))
                .collect(),
        }
    }
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Timeframe {
    type Err = ServiceError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "DAYS" => Ok(Timeframe::Days),
            "MONTHS" => Ok(Timeframe::Months),
            "YEARS" => Ok(Timeframe::Years),
            _ => Err(ServiceError::validation(
                "'timeframe' must be DAYS, MONTHS or YEARS",
            )),
        }
    }
}

/// A partial date key. `month` and `day` are present only at the
/// granularities that have them.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Period {
    pub year: String,
    pub month: Option<String>,
    pub day: Option<String>,
}

impl Period {
    pub fn year(year: i32) -> Self {
        Period {
            year: format!("{year:04}"),
            month: None,
            day: None,
        }
    }

    pub fn month(year: i32, month: u32) -> Self {
        Period {
            month: Some(format!("{month:02}")),
            ..Period::year(year)
        }
    }

    pub fn day(year: i32, month: u32, day: u32) -> Self {
        Period {
            day: Some(format!("{day:02}")),
            ..Period::month(year, month)
        }
    }

    /// (column, value) pairs, coarsest first.
    pub fn components(&self) -> Vec<(&'static str, &str)> {
        let mut c = vec![("year", self.year.as_str())];

        if let Some(m) = &self.month {
            c.push(("month", m.as_str()));
        }

        if let Some(d) = &self.day {
            c.push(("day", d.as_str()));
        }

        c
    }
}

/// The newest partition that exists for an entity, as reported by the
/// `MAX(...)` discovery query.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PartitionMarker {
    pub max_year: String,
    pub max_month: Option<String>,
    pub max_day: Option<String>,
}

impl PartitionMarker {
    /// Interpret the marker as a calendar date, filling in missing
    /// components with the first month/day.
    pub fn as_date(&self) -> Result<NaiveDate> {
        fn num<T: FromStr>(what: &str, text: &str) -> Result<T> {
            text.trim().parse().map_err(|_| {
                ServiceError::upstream(
                    "malformed partition marker",
                    format!("{what} = {text:?}"),
                )
            })
        }

        let y: i32 = num("max_year", &self.max_year)?;
        let m: u32 = match &self.max_month {
            Some(t) => num("max_month", t)?,
            None => 1,
        };
        let d: u32 = match &self.max_day {
            Some(t) => num("max_day", t)?,
            None => 1,
        };

        NaiveDate::from_ymd_opt(y, m, d).ok_or_else(|| {
            ServiceError::upstream(
                "malformed partition marker",
                format!("{y:04}-{m:02}-{d:02} is not a date"),
            )
        })
    }
}

/// Where DAYS and MONTHS period generation starts counting back from.
///
/// The deployed handlers disagree here: the on-demand one pins fixed
/// reference dates, the batch one uses the wall clock. Neither uses the
/// discovered partition, which YEARS does. All three are selectable.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum PeriodAnchor {
    Fixed(NaiveDate),
    Today,
    LatestPartition,
}

impl PeriodAnchor {
    pub fn default_for(tf: Timeframe) -> Self {
        let date = match tf {
            Timeframe::Days => NaiveDate::from_ymd_opt(2021, 4, 30),
            Timeframe::Months => NaiveDate::from_ymd_opt(2024, 12, 1),
            Timeframe::Years => None,
        };

        match date {
            Some(d) => PeriodAnchor::Fixed(d),
            None => PeriodAnchor::LatestPartition,
        }
    }

    fn resolve(&self, marker: &PartitionMarker) -> Result<NaiveDate> {
        match self {
            PeriodAnchor::Fixed(d) => Ok(*d),
            PeriodAnchor::Today => Ok(Utc::now().date_naive()),
            PeriodAnchor::LatestPartition => marker.as_date(),
        }
    }
}

impl FromStr for PeriodAnchor {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "today" => Ok(PeriodAnchor::Today),
            "latest" => Ok(PeriodAnchor::LatestPartition),
            other => Ok(PeriodAnchor::Fixed(NaiveDate::parse_from_str(
                other, "%Y-%m-%d",
            )?)),
        }
    }
}

/// Per-timeframe anchor configuration.
#[derive(Clone, Debug)]
pub struct Anchors {
    pub days: PeriodAnchor,
    pub months: PeriodAnchor,
}

impl Default for Anchors {
    fn default() -> Self {
        Anchors {
            days: PeriodAnchor::default_for(Timeframe::Days),
            months: PeriodAnchor::default_for(Timeframe::Months),
        }
    }
}

impl Anchors {
    /// Figure out the anchor date for a timeframe. YEARS always follows the
    /// discovered partition.
    pub fn anchor_date(&self, tf: Timeframe, marker: &PartitionMarker) -> Result<NaiveDate> {
        match tf {
            Timeframe::Days => self.days.resolve(marker),
            Timeframe::Months => self.months.resolve(marker),
            Timeframe::Years => PeriodAnchor::LatestPartition.resolve(marker),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ymd(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn marker(y: &str, m: Option<&str>, d: Option<&str>) -> PartitionMarker {
        PartitionMarker {
            max_year: y.to_owned(),
            max_month: m.map(str::to_owned),
            max_day: d.map(str::to_owned),
        }
    }

    #[test]
    fn years_count_back_from_latest() {
        let anchors = Anchors::default();
        let anchor = anchors
            .anchor_date(Timeframe::Years, &marker("2024", None, None))
            .unwrap();
        let years: Vec<_> = Timeframe::Years
            .periods(anchor)
            .into_iter()
            .map(|p| p.year)
            .collect();
        assert_eq!(years, ["2024", "2023", "2022", "2021"]);
    }

    #[test]
    fn months_roll_over_year() {
        let p = Timeframe::Months.periods(ymd(2024, 12, 1));
        assert_eq!(p.len(), 6);
        assert_eq!(p[0], Period::month(2024, 12));
        assert_eq!(p[5], Period::month(2024, 7));

        let p = Timeframe::Months.periods(ymd(2025, 2, 28));
        let got: Vec<_> = p
            .iter()
            .map(|p| format!("{}-{}", p.year, p.month.as_deref().unwrap()))
            .collect();
        assert_eq!(
            got,
            ["2025-02", "2025-01", "2024-12", "2024-11", "2024-10", "2024-09"]
        );
    }

    #[test]
    fn months_from_end_of_month() {
        // Naive month subtraction from the 31st would clamp; we work from the 1st.
        let p = Timeframe::Months.periods(ymd(2024, 3, 31));
        assert_eq!(p[1], Period::month(2024, 2));
        assert_eq!(p[2], Period::month(2024, 1));
    }

    #[test]
    fn days_descend_twelve() {
        let p = Timeframe::Days.periods(ymd(2021, 4, 30));
        assert_eq!(p.len(), 12);
        assert_eq!(p[0], Period::day(2021, 4, 30));
        assert_eq!(p[11], Period::day(2021, 4, 19));
    }

    #[test]
    fn days_cross_month_and_year() {
        let p = Timeframe::Days.periods(ymd(2024, 3, 2));
        assert_eq!(p[1], Period::day(2024, 3, 1));
        assert_eq!(p[2], Period::day(2024, 2, 29));

        let p = Timeframe::Days.periods(ymd(2021, 1, 3));
        assert_eq!(p[3], Period::day(2020, 12, 31));
        assert_eq!(p[11], Period::day(2020, 12, 23));
    }

    #[test]
    fn periods_zero_padded() {
        let p = Period::day(2021, 4, 9);
        assert_eq!(p.components(), [("year", "2021"), ("month", "04"), ("day", "09")]);
    }

    #[test]
    fn never_empty() {
        for tf in Timeframe::ALL {
            assert_eq!(tf.periods(ymd(2020, 1, 1)).len(), tf.lookback());
        }
    }

    #[test]
    fn parse_timeframe() {
        assert_eq!("days".parse::<Timeframe>().unwrap(), Timeframe::Days);
        assert_eq!(" Years".parse::<Timeframe>().unwrap(), Timeframe::Years);
        assert!(matches!(
            "weeks".parse::<Timeframe>(),
            Err(ServiceError::Validation(_))
        ));
    }

    #[test]
    fn anchors() {
        let m = marker("2023", Some("06"), Some("15"));
        let a = Anchors::default();
        assert_eq!(a.anchor_date(Timeframe::Days, &m).unwrap(), ymd(2021, 4, 30));
        assert_eq!(a.anchor_date(Timeframe::Months, &m).unwrap(), ymd(2024, 12, 1));

        let a = Anchors {
            days: PeriodAnchor::LatestPartition,
            months: "2022-03-01".parse().unwrap(),
        };
        assert_eq!(a.anchor_date(Timeframe::Days, &m).unwrap(), ymd(2023, 6, 15));
        assert_eq!(a.anchor_date(Timeframe::Months, &m).unwrap(), ymd(2022, 3, 1));
        assert_eq!("Today".parse::<PeriodAnchor>().unwrap(), PeriodAnchor::Today);
        assert!("yesterday".parse::<PeriodAnchor>().is_err());
    }

    #[test]
    fn bad_marker() {
        assert!(matches!(
            marker("twenty", None, None).as_date(),
            Err(ServiceError::Upstream { .. })
        ));
        assert!(marker("2023", Some("02"), Some("30")).as_date().is_err());
    }
}
