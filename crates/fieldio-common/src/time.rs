//! Time handling: filename templates, climatology wrapping and time units.

use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveDateTime, TimeZone, Timelike, Utc};
use serde::{Deserialize, Serialize};

use crate::error::TimeParseError;

/// Parse a time value (RFC 3339, `YYYY-MM-DDTHH:MM:SS`, `YYYY-MM-DD HH:MM:SS`
/// or a bare date). Times without an offset are taken as UTC.
pub fn parse_time(s: &str) -> Result<DateTime<Utc>, TimeParseError> {
    let s = s.trim();

    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.with_timezone(&Utc));
    }

    for fmt in ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M", "%Y-%m-%d %H:%M"] {
        if let Ok(ndt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Ok(Utc.from_utc_datetime(&ndt));
        }
    }

    if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        if let Some(ndt) = date.and_hms_opt(0, 0, 0) {
            return Ok(Utc.from_utc_datetime(&ndt));
        }
    }

    Err(TimeParseError::InvalidFormat(s.to_string()))
}

/// Parse an interval given as integer seconds (`"3600"`) or with a unit
/// suffix (`"30s"`, `"15m"`, `"6h"`, `"1d"`).
pub fn parse_interval(s: &str) -> Result<Duration, TimeParseError> {
    let s = s.trim();
    let invalid = || TimeParseError::InvalidInterval(s.to_string());

    let (digits, scale) = match s.char_indices().last() {
        Some((idx, 's')) => (&s[..idx], 1),
        Some((idx, 'm')) => (&s[..idx], 60),
        Some((idx, 'h')) => (&s[..idx], 3_600),
        Some((idx, 'd')) => (&s[..idx], 86_400),
        Some(_) => (s, 1),
        None => return Err(invalid()),
    };

    let value: i64 = digits.trim().parse().map_err(|_| invalid())?;
    if value < 0 {
        return Err(invalid());
    }
    value
        .checked_mul(scale)
        .map(Duration::seconds)
        .ok_or_else(invalid)
}

/// A closed time range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeRange {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    pub fn contains(&self, dt: &DateTime<Utc>) -> bool {
        dt >= &self.start && dt <= &self.end
    }

    /// Clamp a time into the range.
    pub fn clamp(&self, dt: DateTime<Utc>) -> DateTime<Utc> {
        dt.max(self.start).min(self.end)
    }
}

/// Inclusive range of years a climatology dataset is valid for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidYears {
    pub first: i32,
    pub last: i32,
}

impl ValidYears {
    pub fn new(first: i32, last: i32) -> Self {
        Self { first, last }
    }

    /// Parse `"1980-2014"`, `"1980:2014"`, `"1980,2014"` or `"1980 2014"`.
    pub fn parse(s: &str) -> Option<Self> {
        let mut parts = s
            .split(|c: char| c == '-' || c == ':' || c == ',' || c.is_whitespace())
            .filter(|p| !p.is_empty());
        let first = parts.next()?.parse().ok()?;
        let last = parts.next()?.parse().ok()?;
        if parts.next().is_some() {
            return None;
        }
        Some(Self { first, last })
    }

    /// Number of years in the range.
    pub fn span(&self) -> i32 {
        self.last - self.first + 1
    }

    /// Map any year into the range, periodically with period `span()`.
    ///
    /// Uses euclidean remainder so years before `first` wrap as well.
    pub fn wrap_year(&self, year: i32) -> i32 {
        self.first + (year - self.first).rem_euclid(self.span())
    }

    /// Move a time into the range, keeping month, day and time of day.
    /// February 29th becomes February 28th when the target year is not a
    /// leap year.
    pub fn wrap_time(&self, t: DateTime<Utc>) -> DateTime<Utc> {
        let year = self.wrap_year(t.year());
        if year == t.year() {
            return t;
        }
        t.with_year(year)
            .or_else(|| t.with_day(28).and_then(|d| d.with_year(year)))
            .unwrap_or(t)
    }
}

/// A path template with `%y4 %m2 %d2 %h2 %n2 %s2` date tokens.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FilenameTemplate(String);

impl FilenameTemplate {
    pub fn new(template: impl Into<String>) -> Self {
        Self(template.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Substitute the calendar fields of `t` into the template.
    ///
    /// Unknown tokens are copied through untouched.
    pub fn resolve(&self, t: DateTime<Utc>) -> String {
        let mut out = String::with_capacity(self.0.len() + 8);
        let mut chars = self.0.chars().peekable();

        while let Some(c) = chars.next() {
            if c != '%' {
                out.push(c);
                continue;
            }
            let Some(&kind) = chars.peek() else {
                out.push('%');
                break;
            };
            if kind == '%' {
                chars.next();
                out.push('%');
                continue;
            }

            let mut lookahead = chars.clone();
            lookahead.next();
            let width = lookahead.next();
            let value = match (kind, width) {
                ('y', Some('4')) => Some(format!("{:04}", t.year())),
                ('m', Some('2')) => Some(format!("{:02}", t.month())),
                ('d', Some('2')) => Some(format!("{:02}", t.day())),
                ('h', Some('2')) => Some(format!("{:02}", t.hour())),
                ('n', Some('2')) => Some(format!("{:02}", t.minute())),
                ('s', Some('2')) => Some(format!("{:02}", t.second())),
                _ => None,
            };

            match value {
                Some(v) => {
                    chars.next();
                    chars.next();
                    out.push_str(&v);
                }
                None => out.push('%'),
            }
        }

        out
    }

    /// Whether the template contains any date token.
    pub fn has_tokens(&self) -> bool {
        ["%y4", "%m2", "%d2", "%h2", "%n2", "%s2"]
            .iter()
            .any(|tok| self.0.contains(tok))
    }
}

impl std::fmt::Display for FilenameTemplate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// CF-style time units: `<unit> since <reference time>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeUnits {
    seconds_per_unit: i64,
    epoch: DateTime<Utc>,
}

impl TimeUnits {
    pub fn new(seconds_per_unit: i64, epoch: DateTime<Utc>) -> Self {
        Self {
            seconds_per_unit,
            epoch,
        }
    }

    /// Seconds since the Unix epoch; what fieldio writes for new files.
    pub fn unix_seconds() -> Self {
        Self::new(1, DateTime::<Utc>::UNIX_EPOCH)
    }

    /// Parse e.g. `"hours since 2000-01-01 00:00:00"`.
    pub fn parse(s: &str) -> Result<Self, TimeParseError> {
        let invalid = || TimeParseError::InvalidUnits(s.to_string());
        let (unit, reference) = s.trim().split_once(" since ").ok_or_else(invalid)?;

        let seconds_per_unit = match unit.trim().to_lowercase().as_str() {
            "second" | "seconds" | "s" | "sec" | "secs" => 1,
            "minute" | "minutes" | "min" | "mins" => 60,
            "hour" | "hours" | "h" | "hr" | "hrs" => 3_600,
            "day" | "days" | "d" => 86_400,
            _ => return Err(invalid()),
        };
        let epoch = parse_time(reference).map_err(|_| invalid())?;

        Ok(Self::new(seconds_per_unit, epoch))
    }

    /// Offset of `t` from the reference time, in units.
    pub fn to_offset(&self, t: DateTime<Utc>) -> f64 {
        (t - self.epoch).num_milliseconds() as f64 / 1_000.0 / self.seconds_per_unit as f64
    }

    /// Time at `offset` units after the reference time, rounded to the
    /// nearest millisecond.
    pub fn from_offset(&self, offset: f64) -> DateTime<Utc> {
        let millis = (offset * self.seconds_per_unit as f64 * 1_000.0).round() as i64;
        self.epoch + Duration::milliseconds(millis)
    }
}

impl std::fmt::Display for TimeUnits {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let unit = match self.seconds_per_unit {
            60 => "minutes",
            3_600 => "hours",
            86_400 => "days",
            _ => "seconds",
        };
        write!(f, "{} since {}", unit, self.epoch.format("%Y-%m-%d %H:%M:%S"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(y: i32, m: u32, d: u32, h: u32, n: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, n, 0).unwrap()
    }

    #[test]
    fn test_parse_time_formats() {
        assert_eq!(parse_time("2024-01-15T12:00:00Z").unwrap(), at(2024, 1, 15, 12, 0));
        assert_eq!(parse_time("2024-01-15T12:00:00").unwrap(), at(2024, 1, 15, 12, 0));
        assert_eq!(parse_time("2024-01-15 12:30:00").unwrap(), at(2024, 1, 15, 12, 30));
        assert_eq!(parse_time("2024-01-15").unwrap(), at(2024, 1, 15, 0, 0));
        assert!(parse_time("yesterday").is_err());
    }

    #[test]
    fn test_parse_interval() {
        assert_eq!(parse_interval("3600").unwrap(), Duration::hours(1));
        assert_eq!(parse_interval("6h").unwrap(), Duration::hours(6));
        assert_eq!(parse_interval("15m").unwrap(), Duration::minutes(15));
        assert_eq!(parse_interval("1d").unwrap(), Duration::days(1));
        assert_eq!(parse_interval("0").unwrap(), Duration::zero());
        assert!(parse_interval("").is_err());
        assert!(parse_interval("-5").is_err());
        assert!(parse_interval("6w").is_err());
    }

    #[test]
    fn test_template_resolution() {
        let template = FilenameTemplate::new("data/sst_%y4%m2%d2_%h2%n2.zarr");
        assert_eq!(
            template.resolve(at(2020, 3, 7, 6, 30)),
            "data/sst_20200307_0630.zarr"
        );
        assert!(template.has_tokens());
    }

    #[test]
    fn test_template_passthrough() {
        let template = FilenameTemplate::new("out/100%%_%q1_static.zarr");
        assert_eq!(template.resolve(at(2020, 1, 1, 0, 0)), "out/100%_%q1_static.zarr");
        assert!(!template.has_tokens());
    }

    #[test]
    fn test_climatology_wrap_example() {
        let years = ValidYears::new(1980, 2014);
        assert_eq!(years.span(), 35);
        assert_eq!(years.wrap_year(2020), 1980 + (2020 - 1980) % 35);
        assert_eq!(years.wrap_year(2020), 1985);
    }

    #[test]
    fn test_climatology_wrap_is_total_and_periodic() {
        let years = ValidYears::new(1980, 2014);
        for year in -5000..5000 {
            let wrapped = years.wrap_year(year);
            assert!((1980..=2014).contains(&wrapped), "year {year} -> {wrapped}");
            assert_eq!(wrapped, years.wrap_year(year + years.span()));
        }
        for year in 1980..=2014 {
            assert_eq!(years.wrap_year(year), year);
        }
    }

    #[test]
    fn test_climatology_wrap_leap_day() {
        let years = ValidYears::new(2001, 2003);
        let wrapped = years.wrap_time(at(2004, 2, 29, 12, 0));
        assert_eq!(wrapped, at(2004 - 3, 2, 28, 12, 0));
    }

    #[test]
    fn test_valid_years_parse() {
        assert_eq!(ValidYears::parse("1980-2014"), Some(ValidYears::new(1980, 2014)));
        assert_eq!(ValidYears::parse("1980 2014"), Some(ValidYears::new(1980, 2014)));
        assert_eq!(ValidYears::parse("1980"), None);
    }

    #[test]
    fn test_time_units_roundtrip_offsets() {
        let units = TimeUnits::parse("hours since 2000-01-01 00:00:00").unwrap();
        assert_eq!(units.from_offset(0.0), at(2000, 1, 1, 0, 0));
        assert_eq!(units.from_offset(36.5), at(2000, 1, 2, 12, 30));
        assert!((units.to_offset(at(2000, 1, 2, 0, 0)) - 24.0).abs() < 1e-12);
        assert_eq!(units.to_string(), "hours since 2000-01-01 00:00:00");
        assert!(TimeUnits::parse("fortnights since 2000-01-01").is_err());
    }
}
