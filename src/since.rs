//! Parsing for `--since`: an absolute time or a duration back from now.

use anyhow::{Result, anyhow, bail};
use chrono::{
    DateTime, Local, LocalResult, NaiveDate, NaiveDateTime, NaiveTime, TimeDelta, TimeZone, Utc,
};

/// Resolve a `--since` expression in the local time zone
pub fn parse_since(expr: &str, now: DateTime<Utc>) -> Result<DateTime<Utc>> {
    parse_since_in(expr, now, &Local)
}

/// Resolve a `--since` expression; dates without an offset are read in `tz`.
///
/// Accepted: RFC 3339, `YYYY-MM-DD`, `YYYY-MM-DD HH:MM:SS`, `HH:MM:SS` (today) or a
/// duration such as `90s`, `15m`, `1h30m`.
pub fn parse_since_in<Tz: TimeZone>(
    expr: &str,
    now: DateTime<Utc>,
    tz: &Tz,
) -> Result<DateTime<Utc>> {
    let expr = expr.trim();
    if expr.is_empty() {
        bail!("empty expression");
    }

    if let Ok(ts) = DateTime::parse_from_rfc3339(expr) {
        return Ok(ts.with_timezone(&Utc));
    }

    for layout in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(expr, layout) {
            return in_zone(tz, naive);
        }
    }
    if let Ok(date) = NaiveDate::parse_from_str(expr, "%Y-%m-%d") {
        return in_zone(tz, date.and_time(NaiveTime::default()));
    }
    if let Ok(time) = NaiveTime::parse_from_str(expr, "%H:%M:%S") {
        let today = now.with_timezone(tz).date_naive();
        return in_zone(tz, today.and_time(time));
    }

    let ago = parse_duration(expr)
        .map_err(|e| anyhow!("not a time, and not a duration: {e}"))?;
    Ok(now - ago)
}

fn in_zone<Tz: TimeZone>(tz: &Tz, naive: NaiveDateTime) -> Result<DateTime<Utc>> {
    match tz.from_local_datetime(&naive) {
        LocalResult::Single(ts) => Ok(ts.with_timezone(&Utc)),
        // Repeated hour at a DST change; take the first
        LocalResult::Ambiguous(earliest, _) => Ok(earliest.with_timezone(&Utc)),
        LocalResult::None => bail!("{naive} does not exist in the local time zone"),
    }
}

/// Parse durations like `45s`, `10m`, `1h30m`, `250ms`
pub fn parse_duration(expr: &str) -> Result<TimeDelta> {
    let mut total = TimeDelta::zero();
    let mut rest = expr;

    if rest.is_empty() {
        bail!("empty duration");
    }

    while !rest.is_empty() {
        let digits = rest.find(|c: char| !c.is_ascii_digit()).unwrap_or(rest.len());
        if digits == 0 {
            bail!("expected a number in {expr:?}");
        }
        let value: i64 = rest[..digits].parse()?;
        rest = &rest[digits..];

        let unit_len = rest.find(|c: char| c.is_ascii_digit()).unwrap_or(rest.len());
        let unit = &rest[..unit_len];
        rest = &rest[unit_len..];

        let part = match unit {
            "ms" => TimeDelta::try_milliseconds(value),
            "s" => TimeDelta::try_seconds(value),
            "m" => TimeDelta::try_minutes(value),
            "h" => TimeDelta::try_hours(value),
            "d" => TimeDelta::try_days(value),
            "" => bail!("missing unit in {expr:?}"),
            other => bail!("unknown unit {other:?} in {expr:?}"),
        }
        .ok_or_else(|| anyhow!("duration {expr:?} is too large"))?;

        total = total
            .checked_add(&part)
            .ok_or_else(|| anyhow!("duration {expr:?} is too large"))?;
    }

    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::FixedOffset;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 30, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_durations() {
        assert_eq!(parse_duration("45s").unwrap(), TimeDelta::seconds(45));
        assert_eq!(parse_duration("1h30m").unwrap(), TimeDelta::minutes(90));
        assert_eq!(parse_duration("250ms").unwrap(), TimeDelta::milliseconds(250));
        assert_eq!(parse_duration("2d").unwrap(), TimeDelta::hours(48));
    }

    #[test]
    fn test_duration_errors() {
        assert!(parse_duration("").is_err());
        assert!(parse_duration("10").is_err());
        assert!(parse_duration("h").is_err());
        assert!(parse_duration("5 minutes").is_err());
        assert!(parse_duration("3w").is_err());
    }

    #[test]
    fn test_duration_is_relative_to_now() {
        let since = parse_since_in("1h", now(), &Utc).unwrap();
        assert_eq!(since, Utc.with_ymd_and_hms(2024, 3, 30, 11, 0, 0).unwrap());
    }

    #[test]
    fn test_absolute_times() {
        assert_eq!(
            parse_since_in("2023-03-30T08:15:00Z", now(), &Utc).unwrap(),
            Utc.with_ymd_and_hms(2023, 3, 30, 8, 15, 0).unwrap()
        );
        assert_eq!(
            parse_since_in("2023-03-30", now(), &Utc).unwrap(),
            Utc.with_ymd_and_hms(2023, 3, 30, 0, 0, 0).unwrap()
        );
        assert_eq!(
            parse_since_in("2023-03-30 10:00:00", now(), &Utc).unwrap(),
            Utc.with_ymd_and_hms(2023, 3, 30, 10, 0, 0).unwrap()
        );
        assert_eq!(
            parse_since_in("09:30:00", now(), &Utc).unwrap(),
            Utc.with_ymd_and_hms(2024, 3, 30, 9, 30, 0).unwrap()
        );
    }

    #[test]
    fn test_local_dates_use_zone() {
        let cet = FixedOffset::east_opt(3600).unwrap();
        assert_eq!(
            parse_since_in("2023-03-30", now(), &cet).unwrap(),
            Utc.with_ymd_and_hms(2023, 3, 29, 23, 0, 0).unwrap()
        );
    }

    #[test]
    fn test_garbage_is_rejected() {
        let err = parse_since_in("yesterday", now(), &Utc).unwrap_err();
        assert!(err.to_string().contains("not a time"));
    }
}
