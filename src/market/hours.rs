//! NYSE trading-calendar rules.
//!
//! Every time-dependent decision in the system runs in the market zone;
//! naive local times never cross this module's boundary.

use std::collections::HashSet;

use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveTime, TimeZone, Utc, Weekday};
use chrono_tz::America::New_York;
use chrono_tz::Tz;
use lazy_static::lazy_static;
use serde::Serialize;

pub const MARKET_TZ: Tz = New_York;

lazy_static! {
    /// NYSE full-closure holidays, 2024-2026. Update annually.
    static ref MARKET_HOLIDAYS: HashSet<NaiveDate> = {
        let days = [
            // 2024
            (2024, 1, 1), (2024, 1, 15), (2024, 2, 19), (2024, 3, 29),
            (2024, 5, 27), (2024, 6, 19), (2024, 7, 4), (2024, 9, 2),
            (2024, 11, 28), (2024, 12, 25),
            // 2025
            (2025, 1, 1), (2025, 1, 20), (2025, 2, 17), (2025, 4, 18),
            (2025, 5, 26), (2025, 6, 19), (2025, 7, 4), (2025, 9, 1),
            (2025, 11, 27), (2025, 12, 25),
            // 2026 (Jul 4 falls on a Saturday; observed Jul 3)
            (2026, 1, 1), (2026, 1, 19), (2026, 2, 16), (2026, 4, 3),
            (2026, 5, 25), (2026, 6, 19), (2026, 7, 3), (2026, 9, 7),
            (2026, 11, 26), (2026, 12, 25),
        ];
        days.iter()
            .map(|&(y, m, d)| NaiveDate::from_ymd_opt(y, m, d).unwrap())
            .collect()
    };

    /// Half days (1 PM ET close).
    static ref HALF_DAYS: HashSet<NaiveDate> = {
        let days = [
            (2024, 7, 3), (2024, 11, 29), (2024, 12, 24),
            (2025, 7, 3), (2025, 11, 28), (2025, 12, 24),
            (2026, 7, 2), (2026, 11, 27), (2026, 12, 24),
        ];
        days.iter()
            .map(|&(y, m, d)| NaiveDate::from_ymd_opt(y, m, d).unwrap())
            .collect()
    };
}

pub fn market_open() -> NaiveTime {
    NaiveTime::from_hms_opt(9, 30, 0).unwrap()
}

pub fn market_close(date: NaiveDate) -> NaiveTime {
    if HALF_DAYS.contains(&date) {
        NaiveTime::from_hms_opt(13, 0, 0).unwrap()
    } else {
        NaiveTime::from_hms_opt(16, 0, 0).unwrap()
    }
}

/// Current wall-clock in the market zone.
pub fn now_et() -> DateTime<Tz> {
    Utc::now().with_timezone(&MARKET_TZ)
}

/// Today's date at the market zone's midnight boundary.
pub fn today_et() -> NaiveDate {
    now_et().date_naive()
}

pub fn is_holiday(date: NaiveDate) -> bool {
    MARKET_HOLIDAYS.contains(&date)
}

pub fn is_half_day(date: NaiveDate) -> bool {
    HALF_DAYS.contains(&date)
}

pub fn is_weekend(date: NaiveDate) -> bool {
    matches!(date.weekday(), Weekday::Sat | Weekday::Sun)
}

pub fn is_trading_day(date: NaiveDate) -> bool {
    !is_weekend(date) && !is_holiday(date)
}

/// Most recent completed-or-current trading day at or before `now`.
pub fn get_last_trading_day(now: DateTime<Tz>) -> NaiveDate {
    let mut date = now.date_naive();
    // Before today's close, yesterday is the last complete session.
    if now.time() < market_close(date) {
        date -= Duration::days(1);
    }
    for _ in 0..10 {
        if is_trading_day(date) {
            return date;
        }
        date -= Duration::days(1);
    }
    date
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MarketState {
    PreMarket,
    Regular,
    AfterHours,
    Closed,
}

/// Classify a market-zone instant into a session state.
pub fn market_state(now: DateTime<Tz>) -> MarketState {
    let date = now.date_naive();
    if !is_trading_day(date) {
        return MarketState::Closed;
    }
    let t = now.time();
    let pre_open = NaiveTime::from_hms_opt(4, 0, 0).unwrap();
    let post_close = NaiveTime::from_hms_opt(20, 0, 0).unwrap();
    if t >= market_open() && t < market_close(date) {
        MarketState::Regular
    } else if t >= pre_open && t < market_open() {
        MarketState::PreMarket
    } else if t >= market_close(date) && t < post_close {
        MarketState::AfterHours
    } else {
        MarketState::Closed
    }
}

/// Build a market-zone instant from naive parts (test + scheduler helper).
pub fn at_et(date: NaiveDate, time: NaiveTime) -> DateTime<Tz> {
    MARKET_TZ
        .from_local_datetime(&date.and_time(time))
        .single()
        .unwrap_or_else(|| MARKET_TZ.from_utc_datetime(&date.and_time(time)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn weekends_are_not_trading_days() {
        assert!(!is_trading_day(d(2026, 8, 1))); // Saturday
        assert!(!is_trading_day(d(2026, 8, 2))); // Sunday
        assert!(is_trading_day(d(2026, 8, 3))); // Monday
    }

    #[test]
    fn holidays_are_not_trading_days() {
        assert!(!is_trading_day(d(2026, 7, 3))); // Jul 4 observed
        assert!(!is_trading_day(d(2025, 12, 25)));
        assert!(is_trading_day(d(2026, 7, 6)));
    }

    #[test]
    fn half_day_closes_at_one() {
        assert!(is_half_day(d(2026, 11, 27)));
        assert_eq!(
            market_close(d(2026, 11, 27)),
            NaiveTime::from_hms_opt(13, 0, 0).unwrap()
        );
        assert_eq!(
            market_close(d(2026, 11, 30)),
            NaiveTime::from_hms_opt(16, 0, 0).unwrap()
        );
    }

    #[test]
    fn market_state_classification() {
        let date = d(2026, 8, 3); // Monday
        let t = |h, m| at_et(date, NaiveTime::from_hms_opt(h, m, 0).unwrap());
        assert_eq!(market_state(t(5, 0)), MarketState::PreMarket);
        assert_eq!(market_state(t(10, 0)), MarketState::Regular);
        assert_eq!(market_state(t(17, 0)), MarketState::AfterHours);
        assert_eq!(market_state(t(22, 30)), MarketState::Closed);
        // Weekend is closed all day.
        assert_eq!(
            market_state(at_et(d(2026, 8, 1), NaiveTime::from_hms_opt(12, 0, 0).unwrap())),
            MarketState::Closed
        );
    }

    #[test]
    fn last_trading_day_skips_weekend() {
        // Saturday noon -> Friday.
        let now = at_et(d(2026, 8, 1), NaiveTime::from_hms_opt(12, 0, 0).unwrap());
        assert_eq!(get_last_trading_day(now), d(2026, 7, 31));
        // Monday pre-close -> Friday.
        let now = at_et(d(2026, 8, 3), NaiveTime::from_hms_opt(10, 0, 0).unwrap());
        assert_eq!(get_last_trading_day(now), d(2026, 7, 31));
        // Monday post-close -> Monday.
        let now = at_et(d(2026, 8, 3), NaiveTime::from_hms_opt(17, 0, 0).unwrap());
        assert_eq!(get_last_trading_day(now), d(2026, 8, 3));
    }
}
