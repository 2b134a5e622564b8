//! Turns a caller's [`TimeRangeSpec`] into the concrete bucket periods to read.
//!
//! All calendar arithmetic happens in a fixed UTC offset supplied at
//! construction, never in the host's zone.

use chrono::{DateTime, Datelike, Duration, FixedOffset, NaiveDate, Timelike, Utc};

use super::UsageError;
use crate::{
    cache::UsageKeys,
    models::{DisplayGranularity, Granularity, RangeMode, TimeRangeSpec},
};

/// Longest `custom` range, in days (inclusive).
pub const MAX_CUSTOM_RANGE_DAYS: i64 = 365;

/// The bucket periods that cover a range.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolvedRange {
    /// Periodic buckets, oldest first, no duplicates.
    Buckets {
        granularity: Granularity,
        periods: Vec<String>,
        display: DisplayGranularity,
    },
    /// The lifetime running totals.
    Lifetime,
}

impl ResolvedRange {
    pub fn period_count(&self) -> usize {
        match self {
            ResolvedRange::Buckets { periods, .. } => periods.len(),
            ResolvedRange::Lifetime => 1,
        }
    }
}

/// Resolves ranges against a fixed display offset.
#[derive(Debug, Clone, Copy)]
pub struct RangeResolver {
    offset: FixedOffset,
}

impl RangeResolver {
    pub fn new(offset: FixedOffset) -> Self {
        Self { offset }
    }

    /// Validate the requested range and expand it into bucket periods relative to `now`.
    ///
    /// Pure: never touches the store.
    pub fn resolve(
        &self,
        spec: &TimeRangeSpec,
        mode: RangeMode,
        now: DateTime<Utc>,
    ) -> Result<ResolvedRange, UsageError> {
        let local_now = now.with_timezone(&self.offset);
        let today = local_now.date_naive();

        let resolved = match (spec, mode) {
            (TimeRangeSpec::Today, RangeMode::Total) => daily(vec![today]),
            (TimeRangeSpec::Today, RangeMode::Series) => {
                let periods = (0..=local_now.hour())
                    .filter_map(|hour| today.and_hms_opt(hour, 0, 0))
                    .map(UsageKeys::hourly_period)
                    .collect();
                ResolvedRange::Buckets {
                    granularity: Granularity::Hourly,
                    periods,
                    display: DisplayGranularity::Hour,
                }
            }
            (TimeRangeSpec::Last7Days, _) => daily(days_ending(today, 7)),
            (TimeRangeSpec::Last30Days, RangeMode::Total)
            | (TimeRangeSpec::Monthly, RangeMode::Total) => ResolvedRange::Buckets {
                granularity: Granularity::Monthly,
                periods: vec![UsageKeys::monthly_period(today)],
                display: DisplayGranularity::Day,
            },
            (TimeRangeSpec::Last30Days, RangeMode::Series) => daily(days_ending(today, 30)),
            (TimeRangeSpec::Monthly, RangeMode::Series) => {
                let first = today.with_day(1).unwrap_or(today);
                daily(days_between(first, today))
            }
            (TimeRangeSpec::Custom { start, end }, _) => {
                if start > end {
                    return Err(UsageError::InvalidRange {
                        start: *start,
                        end: *end,
                    });
                }
                let days = (*end - *start).num_days() + 1;
                if days > MAX_CUSTOM_RANGE_DAYS {
                    return Err(UsageError::RangeTooLarge {
                        days,
                        max: MAX_CUSTOM_RANGE_DAYS,
                    });
                }
                daily(days_between(*start, *end))
            }
            (TimeRangeSpec::All, _) => ResolvedRange::Lifetime,
        };

        Ok(resolved)
    }
}

fn daily(dates: Vec<NaiveDate>) -> ResolvedRange {
    ResolvedRange::Buckets {
        granularity: Granularity::Daily,
        periods: dates.into_iter().map(UsageKeys::daily_period).collect(),
        display: DisplayGranularity::Day,
    }
}

/// `count` consecutive days ending with `last`, oldest first.
fn days_ending(last: NaiveDate, count: i64) -> Vec<NaiveDate> {
    let first = last - Duration::days(count - 1);
    days_between(first, last)
}

/// Every day from `first` to `last` inclusive.
fn days_between(first: NaiveDate, last: NaiveDate) -> Vec<NaiveDate> {
    first.iter_days().take_while(|d| *d <= last).collect()
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use chrono::TimeZone;
    use rstest::rstest;

    use super::*;

    fn resolver(offset_hours: i32) -> RangeResolver {
        RangeResolver::new(FixedOffset::east_opt(offset_hours * 3600).unwrap())
    }

    fn utc(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, min, 0).unwrap()
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn periods(range: &ResolvedRange) -> &[String] {
        match range {
            ResolvedRange::Buckets { periods, .. } => periods,
            ResolvedRange::Lifetime => panic!("expected buckets"),
        }
    }

    #[test]
    fn test_today_total_is_one_daily_bucket() {
        let range = resolver(8)
            .resolve(&TimeRangeSpec::Today, RangeMode::Total, utc(2026, 10, 17, 3, 0))
            .unwrap();
        assert_eq!(
            range,
            ResolvedRange::Buckets {
                granularity: Granularity::Daily,
                periods: vec!["2026-10-17".into()],
                display: DisplayGranularity::Day,
            }
        );
    }

    #[test]
    fn test_today_series_is_hourly_through_current_hour() {
        // 06:30 UTC is 14:30 at +08:00
        let range = resolver(8)
            .resolve(&TimeRangeSpec::Today, RangeMode::Series, utc(2026, 10, 17, 6, 30))
            .unwrap();
        let ResolvedRange::Buckets {
            granularity,
            periods,
            display,
        } = range
        else {
            panic!("expected buckets");
        };
        assert_eq!(granularity, Granularity::Hourly);
        assert_eq!(display, DisplayGranularity::Hour);
        assert_eq!(periods.len(), 15);
        assert_eq!(periods.first().unwrap(), "2026-10-17:00");
        assert_eq!(periods.last().unwrap(), "2026-10-17:14");
    }

    #[test]
    fn test_day_boundary_follows_configured_offset() {
        // 2026-10-16 20:00 UTC is already 2026-10-17 at +08:00 but still the 16th in UTC
        let now = utc(2026, 10, 16, 20, 0);
        let shanghai = resolver(8)
            .resolve(&TimeRangeSpec::Today, RangeMode::Total, now)
            .unwrap();
        assert_eq!(periods(&shanghai), ["2026-10-17"]);

        let utc_range = resolver(0)
            .resolve(&TimeRangeSpec::Today, RangeMode::Total, now)
            .unwrap();
        assert_eq!(periods(&utc_range), ["2026-10-16"]);

        let new_york = resolver(-5)
            .resolve(&TimeRangeSpec::Today, RangeMode::Total, utc(2026, 10, 17, 3, 0))
            .unwrap();
        assert_eq!(periods(&new_york), ["2026-10-16"]);
    }

    #[rstest]
    #[case::total(RangeMode::Total)]
    #[case::series(RangeMode::Series)]
    fn test_7days_is_seven_daily_buckets_oldest_first(#[case] mode: RangeMode) {
        let range = resolver(8)
            .resolve(&TimeRangeSpec::Last7Days, mode, utc(2026, 3, 2, 12, 0))
            .unwrap();
        assert_eq!(
            periods(&range),
            [
                "2026-02-24",
                "2026-02-25",
                "2026-02-26",
                "2026-02-27",
                "2026-02-28",
                "2026-03-01",
                "2026-03-02"
            ]
        );
    }

    #[test]
    fn test_30days_total_is_current_month() {
        let range = resolver(8)
            .resolve(&TimeRangeSpec::Last30Days, RangeMode::Total, utc(2026, 10, 17, 0, 0))
            .unwrap();
        assert_eq!(
            range,
            ResolvedRange::Buckets {
                granularity: Granularity::Monthly,
                periods: vec!["2026-10".into()],
                display: DisplayGranularity::Day,
            }
        );
    }

    #[test]
    fn test_30days_series_is_thirty_daily_buckets() {
        let range = resolver(8)
            .resolve(&TimeRangeSpec::Last30Days, RangeMode::Series, utc(2026, 10, 17, 0, 0))
            .unwrap();
        let periods = periods(&range);
        assert_eq!(periods.len(), 30);
        assert_eq!(periods.first().unwrap(), "2026-09-18");
        assert_eq!(periods.last().unwrap(), "2026-10-17");
    }

    #[test]
    fn test_monthly_series_runs_from_first_of_month() {
        let range = resolver(8)
            .resolve(&TimeRangeSpec::Monthly, RangeMode::Series, utc(2026, 10, 5, 0, 0))
            .unwrap();
        assert_eq!(
            periods(&range),
            ["2026-10-01", "2026-10-02", "2026-10-03", "2026-10-04", "2026-10-05"]
        );

        let total = resolver(8)
            .resolve(&TimeRangeSpec::Monthly, RangeMode::Total, utc(2026, 10, 5, 0, 0))
            .unwrap();
        assert_eq!(periods(&total), ["2026-10"]);
    }

    #[test]
    fn test_all_is_lifetime() {
        for mode in [RangeMode::Total, RangeMode::Series] {
            let range = resolver(8)
                .resolve(&TimeRangeSpec::All, mode, utc(2026, 10, 17, 0, 0))
                .unwrap();
            assert_eq!(range, ResolvedRange::Lifetime);
        }
    }

    #[rstest]
    #[case::single_day(date(2026, 5, 1), date(2026, 5, 1))]
    #[case::across_month(date(2026, 1, 28), date(2026, 2, 3))]
    #[case::leap_february(date(2024, 2, 27), date(2024, 3, 1))]
    #[case::across_year(date(2025, 12, 30), date(2026, 1, 2))]
    #[case::max_span(date(2025, 1, 1), date(2025, 12, 31))]
    fn test_custom_produces_consecutive_unique_days(
        #[case] start: NaiveDate,
        #[case] end: NaiveDate,
    ) {
        let range = resolver(8)
            .resolve(
                &TimeRangeSpec::Custom { start, end },
                RangeMode::Total,
                utc(2026, 10, 17, 0, 0),
            )
            .unwrap();
        let periods = periods(&range);

        let expected_len = (end - start).num_days() as usize + 1;
        assert_eq!(periods.len(), expected_len);
        assert_eq!(periods.iter().collect::<HashSet<_>>().len(), expected_len);
        assert_eq!(periods.first().unwrap(), &UsageKeys::daily_period(start));
        assert_eq!(periods.last().unwrap(), &UsageKeys::daily_period(end));
        for pair in periods.windows(2) {
            let a = NaiveDate::parse_from_str(&pair[0], "%Y-%m-%d").unwrap();
            let b = NaiveDate::parse_from_str(&pair[1], "%Y-%m-%d").unwrap();
            assert_eq!(b - a, Duration::days(1));
        }
    }

    #[test]
    fn test_custom_start_after_end_is_invalid() {
        let err = resolver(8)
            .resolve(
                &TimeRangeSpec::Custom {
                    start: date(2026, 3, 2),
                    end: date(2026, 3, 1),
                },
                RangeMode::Total,
                utc(2026, 10, 17, 0, 0),
            )
            .unwrap_err();
        assert!(matches!(err, UsageError::InvalidRange { .. }));
    }

    #[test]
    fn test_custom_span_limit() {
        let now = utc(2026, 10, 17, 0, 0);
        let start = date(2025, 1, 1);

        // 365 days inclusive succeeds
        let ok = resolver(8).resolve(
            &TimeRangeSpec::Custom {
                start,
                end: start + Duration::days(364),
            },
            RangeMode::Series,
            now,
        );
        assert_eq!(ok.unwrap().period_count(), 365);

        // 366 days inclusive fails
        let err = resolver(8)
            .resolve(
                &TimeRangeSpec::Custom {
                    start,
                    end: start + Duration::days(365),
                },
                RangeMode::Series,
                now,
            )
            .unwrap_err();
        assert!(matches!(
            err,
            UsageError::RangeTooLarge {
                days: 366,
                max: MAX_CUSTOM_RANGE_DAYS
            }
        ));
    }
}
