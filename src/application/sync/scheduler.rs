//! Market-hour-aware scheduling for reconciliation passes.

use chrono::{DateTime, Datelike, FixedOffset, NaiveDate, NaiveTime, Utc, Weekday};
use std::time::Duration;

/// Phase of the US equity market week, from the Eastern-time clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarketPhase {
    /// 09:30-16:00 ET, Monday through Friday.
    MarketHours,
    /// Weekday outside market hours.
    AfterHours,
    Weekend,
}

impl MarketPhase {
    /// Reconciliation cadence for this phase.
    pub fn cadence(&self) -> Duration {
        match self {
            MarketPhase::MarketHours => Duration::from_secs(5 * 60),
            MarketPhase::AfterHours => Duration::from_secs(30 * 60),
            MarketPhase::Weekend => Duration::from_secs(2 * 60 * 60),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MarketPhase::MarketHours => "market_hours",
            MarketPhase::AfterHours => "after_hours",
            MarketPhase::Weekend => "weekend",
        }
    }
}

/// Classify an instant into a market phase.
pub fn market_phase(now: DateTime<Utc>) -> MarketPhase {
    let eastern = now.with_timezone(&eastern_offset(now));
    if matches!(eastern.weekday(), Weekday::Sat | Weekday::Sun) {
        return MarketPhase::Weekend;
    }
    let open = NaiveTime::from_hms_opt(9, 30, 0).unwrap_or_default();
    let close = NaiveTime::from_hms_opt(16, 0, 0).unwrap_or_default();
    let time = eastern.time();
    if time >= open && time <= close {
        MarketPhase::MarketHours
    } else {
        MarketPhase::AfterHours
    }
}

/// US Eastern offset for the instant: EDT (-4) from the second Sunday of
/// March through the first Sunday of November, EST (-5) otherwise.
fn eastern_offset(now: DateTime<Utc>) -> FixedOffset {
    let date = now.date_naive();
    let year = date.year();
    let dst_start = nth_weekday(year, 3, Weekday::Sun, 2);
    let dst_end = nth_weekday(year, 11, Weekday::Sun, 1);
    let in_dst = date >= dst_start && date < dst_end;
    let hours = if in_dst { -4 } else { -5 };
    FixedOffset::east_opt(hours * 3600).unwrap_or_else(|| FixedOffset::east_opt(0).unwrap())
}

fn nth_weekday(year: i32, month: u32, weekday: Weekday, nth: u32) -> NaiveDate {
    let first = NaiveDate::from_ymd_opt(year, month, 1).unwrap_or_default();
    let offset = (7 + weekday.num_days_from_monday() as i64
        - first.weekday().num_days_from_monday() as i64)
        % 7;
    first + chrono::Duration::days(offset + 7 * (nth as i64 - 1))
}
