//! Reference-instant resolution in the exchange timezone.
//!
//! Accepted references:
//! - none: today in the exchange zone, pinned to the anchor time
//! - `YYYY-MM-DD`: that date, pinned to the anchor time
//! - `YYYY-MM-DDTHH:MM[:SS[.f]]`: exchange-local wall time
//! - the same with `Z` or an offset: converted to exchange-local
//!
//! Wall times that fall in a DST gap move forward one hour; ambiguous wall
//! times take the earlier instant.

use crate::config::MarketSettings;
use crate::models::MarketWindow;
use crate::{Error, Result};
use chrono::{DateTime, Duration, LocalResult, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;

const OFFSET_FORMATS: &[&str] = &["%Y-%m-%dT%H:%M:%S%.f%z", "%Y-%m-%dT%H:%M%z"];
const NAIVE_FORMATS: &[&str] = &["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M"];

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WindowResolver {
    tz: Tz,
    anchor: NaiveTime,
}

impl Default for WindowResolver {
    fn default() -> Self {
        Self {
            tz: chrono_tz::America::New_York,
            anchor: NaiveTime::from_hms_opt(9, 45, 0).unwrap_or(NaiveTime::MIN),
        }
    }
}

impl WindowResolver {
    pub fn new(tz: Tz, anchor: NaiveTime) -> Self {
        Self { tz, anchor }
    }

    pub fn from_settings(settings: &MarketSettings) -> Result<Self> {
        Ok(Self::new(settings.timezone()?, settings.anchor()?))
    }

    pub fn timezone(&self) -> Tz {
        self.tz
    }

    /// Resolve the window end for `reference`
    pub fn resolve_end(&self, reference: Option<&str>) -> Result<DateTime<Tz>> {
        self.resolve_end_at(reference, Utc::now())
    }

    /// Same as [`resolve_end`](Self::resolve_end) with an explicit "now"
    pub fn resolve_end_at(&self, reference: Option<&str>, now: DateTime<Utc>) -> Result<DateTime<Tz>> {
        let Some(raw) = reference.map(str::trim) else {
            let today = now.with_timezone(&self.tz).date_naive();
            return self.localize(today.and_time(self.anchor));
        };

        if !raw.contains('T') {
            let date = NaiveDate::parse_from_str(raw, "%Y-%m-%d")
                .map_err(|e| Error::invalid(format!("date {:?}: {}", raw, e)))?;
            return self.localize(date.and_time(self.anchor));
        }

        if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
            return Ok(dt.with_timezone(&self.tz));
        }
        for format in OFFSET_FORMATS {
            if let Ok(dt) = DateTime::parse_from_str(raw, format) {
                return Ok(dt.with_timezone(&self.tz));
            }
        }
        for format in NAIVE_FORMATS {
            if let Ok(naive) = NaiveDateTime::parse_from_str(raw, format) {
                return self.localize(naive);
            }
        }

        Err(Error::invalid(format!("unrecognised date/time {:?}", raw)))
    }

    /// Window of `lookback_days` ending at the resolved reference
    pub fn window(&self, reference: Option<&str>, lookback_days: i64) -> Result<MarketWindow> {
        self.window_at(reference, lookback_days, Utc::now())
    }

    pub fn window_at(
        &self,
        reference: Option<&str>,
        lookback_days: i64,
        now: DateTime<Utc>,
    ) -> Result<MarketWindow> {
        let days = u32::try_from(lookback_days)
            .map_err(|_| Error::invalid(format!("lookback days must be >= 0, got {}", lookback_days)))?;
        let end = self.resolve_end_at(reference, now)?;
        Ok(MarketWindow::ending_at(end, days))
    }

    fn localize(&self, naive: NaiveDateTime) -> Result<DateTime<Tz>> {
        match self.tz.from_local_datetime(&naive) {
            LocalResult::Single(dt) => Ok(dt),
            LocalResult::Ambiguous(earliest, _) => Ok(earliest),
            LocalResult::None => self
                .tz
                .from_local_datetime(&(naive + Duration::hours(1)))
                .earliest()
                .ok_or_else(|| Error::invalid(format!("{} does not exist in {}", naive, self.tz))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono_tz::America::New_York;

    fn resolver() -> WindowResolver {
        WindowResolver::default()
    }

    #[test]
    fn test_date_only_pins_anchor_time() {
        let end = resolver().resolve_end(Some("2024-03-01")).unwrap();
        assert_eq!(end, New_York.with_ymd_and_hms(2024, 3, 1, 9, 45, 0).unwrap());
        assert_eq!(end.to_rfc3339(), "2024-03-01T09:45:00-05:00");
    }

    #[test]
    fn test_offset_reference_is_converted() {
        let end = resolver().resolve_end(Some("2024-03-01T14:30:00+00:00")).unwrap();
        assert_eq!(end.to_rfc3339(), "2024-03-01T09:30:00-05:00");
        assert_eq!(
            end.with_timezone(&Utc),
            Utc.with_ymd_and_hms(2024, 3, 1, 14, 30, 0).unwrap()
        );
    }

    #[test]
    fn test_zulu_reference() {
        let end = resolver().resolve_end(Some("2024-07-01T13:30:00Z")).unwrap();
        assert_eq!(end.to_rfc3339(), "2024-07-01T09:30:00-04:00");
    }

    #[test]
    fn test_naive_time_is_exchange_local() {
        let end = resolver().resolve_end(Some("2024-07-01T10:00:00")).unwrap();
        assert_eq!(end.to_rfc3339(), "2024-07-01T10:00:00-04:00");

        let short = resolver().resolve_end(Some("2024-07-01T10:00")).unwrap();
        assert_eq!(short, end);
    }

    #[test]
    fn test_no_reference_uses_today_at_anchor() {
        let now = Utc.with_ymd_and_hms(2024, 3, 5, 20, 0, 0).unwrap();
        let end = resolver().resolve_end_at(None, now).unwrap();
        assert_eq!(end.to_rfc3339(), "2024-03-05T09:45:00-05:00");
    }

    #[test]
    fn test_no_reference_uses_exchange_date_not_utc_date() {
        // 02:00 UTC on the 6th is still the 5th in New York
        let now = Utc.with_ymd_and_hms(2024, 3, 6, 2, 0, 0).unwrap();
        let end = resolver().resolve_end_at(None, now).unwrap();
        assert_eq!(end.date_naive(), NaiveDate::from_ymd_opt(2024, 3, 5).unwrap());
    }

    #[test]
    fn test_dst_gap_moves_forward() {
        let end = resolver().resolve_end(Some("2024-03-10T02:30:00")).unwrap();
        assert_eq!(end.to_rfc3339(), "2024-03-10T03:30:00-04:00");
    }

    #[test]
    fn test_repeated_hour_takes_earlier_instant() {
        let end = resolver().resolve_end(Some("2024-11-03T01:30:00")).unwrap();
        assert_eq!(end.to_rfc3339(), "2024-11-03T01:30:00-04:00");
        assert_eq!(
            end.with_timezone(&Utc),
            Utc.with_ymd_and_hms(2024, 11, 3, 5, 30, 0).unwrap()
        );
    }

    #[test]
    fn test_invalid_reference() {
        assert!(matches!(
            resolver().resolve_end(Some("03/01/2024")),
            Err(Error::InvalidArgument(_))
        ));
        assert!(matches!(
            resolver().resolve_end(Some("2024-03-01Tnoon")),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_window_bounds() {
        let window = resolver().window(Some("2024-03-01"), 30).unwrap();
        assert_eq!(window.end.to_rfc3339(), "2024-03-01T09:45:00-05:00");
        assert_eq!(window.start.to_rfc3339(), "2024-01-31T09:45:00-05:00");
        assert!(window.start <= window.end);
    }

    #[test]
    fn test_zero_lookback() {
        let window = resolver().window(Some("2024-03-01"), 0).unwrap();
        assert_eq!(window.start, window.end);
    }

    #[test]
    fn test_negative_lookback_rejected() {
        assert!(matches!(
            resolver().window(Some("2024-03-01"), -1),
            Err(Error::InvalidArgument(_))
        ));
    }
}
