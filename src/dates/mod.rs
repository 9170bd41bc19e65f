//! Date interpretation for spreadsheet-sourced item dates.
//!
//! Cells arrive in whatever shape the sheet produced: German `DD.MM.YYYY`,
//! slashed `DD/MM/YYYY`, ISO `YYYY-MM-DD`, or a full timestamp string. All of
//! them are reduced to a plain calendar [`Date`]; anything unreadable becomes
//! `None` ("date absent"), never an error.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use time::format_description::well_known::{Rfc2822, Rfc3339};
use time::macros::format_description;
use time::{Date, Duration, Month, OffsetDateTime, PrimitiveDateTime, UtcOffset};

static AMBIGUOUS_TRIPLE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(\d{1,2})[./](\d{1,2})[./](\d{4})$").expect("valid ambiguous date pattern")
});
static DOTTED: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(\d{1,2})\.(\d{1,2})\.(\d{4})$").expect("valid dotted date pattern")
});
static SLASHED: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(\d{1,2})/(\d{1,2})/(\d{4})$").expect("valid slashed date pattern")
});
static ISO_DATE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(\d{4})-(\d{1,2})-(\d{1,2})$").expect("valid iso date pattern")
});

/// Parse a date cell into a calendar date.
pub fn parse(text: &str) -> Option<Date> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return None;
    }
    let fixed = fix_january(trimmed);
    let candidate = fixed.as_deref().unwrap_or(trimmed);

    if let Some(caps) = DOTTED
        .captures(candidate)
        .or_else(|| SLASHED.captures(candidate))
    {
        return calendar(&caps[3], &caps[2], &caps[1]);
    }
    if let Some(caps) = ISO_DATE.captures(candidate) {
        return calendar(&caps[1], &caps[2], &caps[3]);
    }
    parse_fallback(candidate)
}

/// Rewrites `D.1.YYYY` (day 1..=12) to `01.D.YYYY`.
///
/// The sheet stores month-only dates such as "May 2027" as `05.01.2027`; a
/// genuine January date always has a day above 12 in that data set.
fn fix_january(text: &str) -> Option<String> {
    let caps = AMBIGUOUS_TRIPLE.captures(text)?;
    let day: u8 = caps[1].parse().ok()?;
    let month: u8 = caps[2].parse().ok()?;
    if month == 1 && (1..=12).contains(&day) {
        Some(format!("01.{:02}.{}", day, &caps[3]))
    } else {
        None
    }
}

fn calendar(year: &str, month: &str, day: &str) -> Option<Date> {
    let year: i32 = year.parse().ok()?;
    let month = Month::try_from(month.parse::<u8>().ok()?).ok()?;
    let day: u8 = day.parse().ok()?;
    Date::from_calendar_date(year, month, day).ok()
}

fn parse_fallback(text: &str) -> Option<Date> {
    if let Ok(stamp) = OffsetDateTime::parse(text, &Rfc3339) {
        return Some(local_date(stamp));
    }
    if let Ok(stamp) = OffsetDateTime::parse(text, &Rfc2822) {
        return Some(local_date(stamp));
    }
    if let Ok(stamp) = PrimitiveDateTime::parse(
        text,
        format_description!("[year]-[month]-[day]T[hour]:[minute]:[second]"),
    ) {
        return Some(stamp.date());
    }
    if let Ok(stamp) = PrimitiveDateTime::parse(
        text,
        format_description!("[year]-[month]-[day]T[hour]:[minute]"),
    ) {
        return Some(stamp.date());
    }
    parse_script_date(text)
}

/// `Sun Jan 05 2025 00:00:00 GMT+0100 (Central European Standard Time)`, the
/// shape a spreadsheet date cell takes once it has been stringified by script.
fn parse_script_date(text: &str) -> Option<Date> {
    let without_zone_name = match text.find(" (") {
        Some(idx) => &text[..idx],
        None => text,
    };
    if let Ok(stamp) = OffsetDateTime::parse(
        without_zone_name,
        format_description!(
            "[weekday repr:short] [month repr:short] [day] [year] [hour]:[minute]:[second] GMT[offset_hour sign:mandatory][offset_minute]"
        ),
    ) {
        return Some(local_date(stamp));
    }
    Date::parse(
        without_zone_name,
        format_description!("[weekday repr:short] [month repr:short] [day] [year]"),
    )
    .ok()
}

fn local_date(stamp: OffsetDateTime) -> Date {
    let offset = UtcOffset::current_local_offset().unwrap_or(UtcOffset::UTC);
    stamp.to_offset(offset).date()
}

/// Today's date in the local time zone, or UTC when the offset is unknown.
pub fn today() -> Date {
    OffsetDateTime::now_local()
        .unwrap_or_else(|_| OffsetDateTime::now_utc())
        .date()
}

/// Whole calendar days from `today` to `date`; negative for past dates.
pub fn days_until(date: Date, today: Date) -> i64 {
    (date - today).whole_days()
}

/// [`parse`] followed by [`days_until`].
pub fn days_until_text(text: &str, today: Date) -> Option<i64> {
    parse(text).map(|date| days_until(date, today))
}

/// `DD.MM.YYYY`, or an em dash when the cell holds no readable date.
pub fn format_display(text: &str) -> String {
    match parse(text) {
        Some(date) => format!(
            "{:02}.{:02}.{}",
            date.day(),
            u8::from(date.month()),
            date.year()
        ),
        None => "—".to_string(),
    }
}

/// `YYYY-MM-DD`, or an empty string when the cell holds no readable date.
pub fn format_input(text: &str) -> String {
    parse(text).map(iso).unwrap_or_default()
}

pub fn iso(date: Date) -> String {
    format!(
        "{:04}-{:02}-{:02}",
        date.year(),
        u8::from(date.month()),
        date.day()
    )
}

pub fn relative_label(days: Option<i64>) -> String {
    match days {
        None => String::new(),
        Some(0) => "today".to_string(),
        Some(1) => "tomorrow".to_string(),
        Some(-1) => "yesterday".to_string(),
        Some(n) if n > 0 => format!("in {n} days"),
        Some(n) => format!("{} days ago", n.abs()),
    }
}

/// Lead time between the alert date and the expiration date.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
    strum::EnumIter,
)]
pub enum AlertWindow {
    #[serde(rename = "1day")]
    #[strum(serialize = "1day")]
    OneDay,
    #[serde(rename = "1week")]
    #[strum(serialize = "1week")]
    OneWeek,
    #[serde(rename = "1month")]
    #[strum(serialize = "1month")]
    OneMonth,
    #[serde(rename = "3months")]
    #[strum(serialize = "3months")]
    ThreeMonths,
    #[serde(rename = "6months")]
    #[strum(serialize = "6months")]
    SixMonths,
}

impl AlertWindow {
    pub fn days(self) -> i64 {
        match self {
            AlertWindow::OneDay => 1,
            AlertWindow::OneWeek => 7,
            AlertWindow::OneMonth => 30,
            AlertWindow::ThreeMonths => 90,
            AlertWindow::SixMonths => 180,
        }
    }
}

/// Alert date `window` ahead of the expiration cell, if that cell parses.
pub fn alert_date_for(expiration: &str, window: AlertWindow) -> Option<Date> {
    parse(expiration)?.checked_sub(Duration::days(window.days()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::date;

    #[test]
    fn dotted_dates_round_trip_outside_january() {
        for (text, expected) in [
            ("17.03.2026", date!(2026 - 03 - 17)),
            ("1.12.2030", date!(2030 - 12 - 01)),
            ("29.02.2028", date!(2028 - 02 - 29)),
            ("31/08/2025", date!(2025 - 08 - 31)),
        ] {
            assert_eq!(parse(text), Some(expected), "parsing {text}");
        }
    }

    #[test]
    fn ambiguous_january_dates_become_first_of_month() {
        assert_eq!(parse("05.01.2027"), Some(date!(2027 - 05 - 01)));
        assert_eq!(parse("12/01/2027"), Some(date!(2027 - 12 - 01)));
        assert_eq!(parse("1.1.2027"), Some(date!(2027 - 01 - 01)));
    }

    #[test]
    fn genuine_january_dates_are_left_alone() {
        assert_eq!(parse("15.01.2027"), Some(date!(2027 - 01 - 15)));
        assert_eq!(parse("31/01/2027"), Some(date!(2027 - 01 - 31)));
    }

    #[test]
    fn iso_dates_skip_the_january_rewrite() {
        assert_eq!(parse("2027-01-05"), Some(date!(2027 - 01 - 05)));
        assert_eq!(parse(" 2026-7-4 "), Some(date!(2026 - 07 - 04)));
    }

    #[test]
    fn timestamps_fall_back_to_generic_parsing() {
        assert_eq!(
            parse("2025-06-14T00:00:00"),
            Some(date!(2025 - 06 - 14))
        );
        assert_eq!(parse("Sat Jun 14 2025"), Some(date!(2025 - 06 - 14)));
        assert!(parse("2025-06-14T12:00:00Z").is_some());
        assert!(parse("Sat Jun 14 2025 12:00:00 GMT+0200 (Central European Summer Time)").is_some());
    }

    #[test]
    fn unreadable_cells_are_absent() {
        for text in ["", "   ", "soon", "13.13.2027", "2027-13-01", "05.01/27"] {
            assert_eq!(parse(text), None, "parsing {text:?}");
        }
    }

    #[test]
    fn impossible_calendar_days_are_rejected() {
        // Deliberately stricter than a spreadsheet script, which would roll
        // 31.02.2027 over into 03.03.2027.
        assert_eq!(parse("31.02.2027"), None);
        assert_eq!(parse("29.02.2027"), None);
        assert_eq!(parse("29.02.2028"), Some(date!(2028 - 02 - 29)));
    }

    #[test]
    fn days_until_counts_calendar_days() {
        let today = date!(2026 - 10 - 18);
        assert_eq!(days_until(today, today), 0);
        assert_eq!(days_until(date!(2026 - 10 - 19), today), 1);
        assert_eq!(days_until(date!(2026 - 10 - 17), today), -1);
        assert_eq!(days_until(date!(2027 - 10 - 18), today), 365);
        assert_eq!(days_until_text("nope", today), None);
    }

    #[test]
    fn display_and_input_formats() {
        assert_eq!(format_display("2026-3-7"), "07.03.2026");
        assert_eq!(format_display(""), "—");
        assert_eq!(format_input("07.03.2026"), "2026-03-07");
        assert_eq!(format_input("garbage"), "");
    }

    #[test]
    fn relative_labels() {
        assert_eq!(relative_label(None), "");
        assert_eq!(relative_label(Some(0)), "today");
        assert_eq!(relative_label(Some(1)), "tomorrow");
        assert_eq!(relative_label(Some(-1)), "yesterday");
        assert_eq!(relative_label(Some(12)), "in 12 days");
        assert_eq!(relative_label(Some(-4)), "4 days ago");
    }

    #[test]
    fn alert_windows_subtract_from_expiration() {
        let window: AlertWindow = "1week".parse().expect("known window");
        assert_eq!(window, AlertWindow::OneWeek);
        assert_eq!(
            alert_date_for("2026-11-08", window),
            Some(date!(2026 - 11 - 01))
        );
        assert_eq!(
            alert_date_for("2026-03-01", AlertWindow::OneMonth),
            Some(date!(2026 - 01 - 30))
        );
        assert_eq!(alert_date_for("", AlertWindow::OneDay), None);
    }
}
