// Money/date normalization for extracted statement cells.
//
// Statement amounts use the Indonesian convention: `.` separates thousands,
// `,` is the decimal separator ("1.234,50" == 1234.50). Timestamps come as
// "dd-mm-YYYY HH:MM" and are stored at minute precision so that two
// extractions of the same row always agree on the identity key.

use chrono::{NaiveDateTime, Timelike};

/// Parse a locale-formatted amount cell into a decimal value.
///
/// Malformed input yields `0.0` rather than an error: the ingestion loop
/// must not abort a whole batch for one bad cell, and the classifier's
/// `amount > 0` gate filters unusable rows downstream.
pub fn parse_amount(raw: &str) -> f64 {
    let canonical = raw.trim().replace('.', "").replace(',', ".");
    canonical.parse::<f64>().unwrap_or(0.0)
}

/// Parse a "dd-mm-YYYY HH:MM" timestamp cell, truncated to minute precision.
///
/// On parse failure falls back to `now` (seconds zeroed). The fallback is a
/// known weak point inherited from the source data pipeline: it can
/// misattribute a transaction's date and defeat the duplicate key, which is
/// why `now` is injected by the caller instead of read from the wall clock
/// here.
pub fn parse_timestamp(raw: &str, now: NaiveDateTime) -> NaiveDateTime {
    match NaiveDateTime::parse_from_str(raw.trim(), "%d-%m-%Y %H:%M") {
        Ok(dt) => dt,
        Err(_) => truncate_seconds(now),
    }
}

/// Zero out the seconds (and sub-second) component.
pub fn truncate_seconds(dt: NaiveDateTime) -> NaiveDateTime {
    dt.with_second(0)
        .and_then(|d| d.with_nanosecond(0))
        .unwrap_or(dt)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn fixed_now() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, 15)
            .unwrap()
            .and_hms_opt(9, 30, 42)
            .unwrap()
    }

    #[test]
    fn test_parse_amount_thousands_and_decimal() {
        assert_eq!(parse_amount("1.234,50"), 1234.50);
        assert_eq!(parse_amount("150.000"), 150000.0);
        assert_eq!(parse_amount("2.500.000,75"), 2500000.75);
    }

    #[test]
    fn test_parse_amount_plain_integer() {
        assert_eq!(parse_amount("50000"), 50000.0);
    }

    #[test]
    fn test_parse_amount_malformed_yields_zero() {
        assert_eq!(parse_amount("JUMLAH"), 0.0);
        assert_eq!(parse_amount(""), 0.0);
        assert_eq!(parse_amount("Rp abc"), 0.0);
    }

    #[test]
    fn test_parse_timestamp_minute_precision() {
        let dt = parse_timestamp("05-01-2024 14:37", fixed_now());
        assert_eq!(
            dt,
            NaiveDate::from_ymd_opt(2024, 1, 5)
                .unwrap()
                .and_hms_opt(14, 37, 0)
                .unwrap()
        );
        assert_eq!(dt.second(), 0);
    }

    #[test]
    fn test_parse_timestamp_fallback_zeroes_seconds() {
        let dt = parse_timestamp("not a date", fixed_now());
        assert_eq!(dt.second(), 0);
        assert_eq!(
            dt,
            NaiveDate::from_ymd_opt(2024, 3, 15)
                .unwrap()
                .and_hms_opt(9, 30, 0)
                .unwrap()
        );
    }

    #[test]
    fn test_truncate_seconds() {
        let truncated = truncate_seconds(fixed_now());
        assert_eq!(truncated.second(), 0);
        assert_eq!(truncated.minute(), 30);
    }
}
