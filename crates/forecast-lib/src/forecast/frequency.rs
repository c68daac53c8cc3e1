//! Sampling frequency inference for forecast horizons

use chrono::{Datelike, Duration, Months, NaiveDateTime};
use std::fmt;

/// Regular spacing between consecutive observations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Frequency {
    /// Constant gap (hourly, daily, weekly, ...)
    Every(Duration),
    /// Same day-of-month and time in consecutive months
    Monthly,
}

impl Frequency {
    pub fn daily() -> Self {
        Frequency::Every(Duration::days(1))
    }

    /// Timestamp `n` steps after `from`
    pub fn advance(&self, from: NaiveDateTime, n: u32) -> Option<NaiveDateTime> {
        match self {
            Frequency::Every(step) => step
                .checked_mul(i32::try_from(n).ok()?)
                .and_then(|offset| from.checked_add_signed(offset)),
            Frequency::Monthly => from.checked_add_months(Months::new(n)),
        }
    }

    /// `n` timestamps strictly after `last`, one step apart
    pub fn future_timestamps(&self, last: NaiveDateTime, n: usize) -> Vec<NaiveDateTime> {
        (1..=n)
            .map_while(|i| u32::try_from(i).ok().and_then(|i| self.advance(last, i)))
            .collect()
    }
}

impl fmt::Display for Frequency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Frequency::Every(step) if step.num_seconds() % 86_400 == 0 => {
                write!(f, "{}D", step.num_days())
            }
            Frequency::Every(step) if step.num_seconds() % 3_600 == 0 => {
                write!(f, "{}h", step.num_hours())
            }
            Frequency::Every(step) => write!(f, "{}s", step.num_seconds()),
            Frequency::Monthly => f.write_str("MS"),
        }
    }
}

fn is_month_step(a: &NaiveDateTime, b: &NaiveDateTime) -> bool {
    let months_a = a.year() * 12 + a.month0() as i32;
    let months_b = b.year() * 12 + b.month0() as i32;
    months_b - months_a == 1 && a.day() == b.day() && a.time() == b.time()
}

/// Infer the spacing of sorted, distinct timestamps
///
/// Returns `None` for fewer than two points or irregular spacing.
pub fn infer_frequency(timestamps: &[NaiveDateTime]) -> Option<Frequency> {
    if timestamps.len() < 2 {
        return None;
    }

    let first_gap = timestamps[1] - timestamps[0];
    if first_gap > Duration::zero() && timestamps.windows(2).all(|w| w[1] - w[0] == first_gap) {
        return Some(Frequency::Every(first_gap));
    }

    if timestamps.windows(2).all(|w| is_month_step(&w[0], &w[1])) {
        return Some(Frequency::Monthly);
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn at(y: i32, m: u32, d: u32, h: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d)
            .unwrap()
            .and_hms_opt(h, 0, 0)
            .unwrap()
    }

    #[test]
    fn test_infer_daily() {
        let ts: Vec<_> = (1..=5).map(|d| at(2023, 1, d, 0)).collect();
        assert_eq!(infer_frequency(&ts), Some(Frequency::daily()));
    }

    #[test]
    fn test_infer_hourly() {
        let ts: Vec<_> = (0..4).map(|h| at(2023, 1, 1, h)).collect();
        assert_eq!(infer_frequency(&ts), Some(Frequency::Every(Duration::hours(1))));
    }

    #[test]
    fn test_infer_monthly() {
        let ts = vec![at(2023, 1, 1, 0), at(2023, 2, 1, 0), at(2023, 3, 1, 0)];
        assert_eq!(infer_frequency(&ts), Some(Frequency::Monthly));
    }

    #[test]
    fn test_irregular_is_none() {
        let ts = vec![at(2023, 1, 1, 0), at(2023, 1, 2, 0), at(2023, 1, 5, 0)];
        assert_eq!(infer_frequency(&ts), None);
        assert_eq!(infer_frequency(&ts[..1]), None);
    }

    #[test]
    fn test_future_timestamps_continue_from_last() {
        let last = at(2023, 1, 10, 0);
        let future = Frequency::daily().future_timestamps(last, 3);
        assert_eq!(future, vec![at(2023, 1, 11, 0), at(2023, 1, 12, 0), at(2023, 1, 13, 0)]);
        assert!(Frequency::Monthly.future_timestamps(last, 0).is_empty());
    }
}
