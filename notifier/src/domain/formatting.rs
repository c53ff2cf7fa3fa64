//! Locale formatting for personalisation values (en-GB).

use chrono::{DateTime, Utc};
use chrono_tz::Tz;

use crate::domain::event::{Hours, Money, Percentage};

/// Fallback timezone used when a recipient has no preference.
pub const DEFAULT_TIMEZONE: Tz = chrono_tz::Europe::London;

/// Failure to parse a rendered amount.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AmountParseError {
    /// The text was empty.
    #[error("amount is empty")]
    Empty,
    /// The text was not a well-formed sterling amount.
    #[error("amount is not a valid sterling value")]
    Malformed,
    /// The amount was too large to represent.
    #[error("amount is out of range")]
    Overflow,
}

/// Render pence as sterling with thousands separators.
///
/// # Examples
/// ```
/// use lease_notifier::domain::formatting::format_currency;
/// use lease_notifier::domain::Money;
///
/// assert_eq!(format_currency(Money::from_pence(123_450)), "£1,234.50");
/// assert_eq!(format_currency(Money::from_pence(0)), "£0.00");
/// ```
pub fn format_currency(amount: Money) -> String {
    let pounds = amount.pence() / 100;
    let pence = amount.pence() % 100;
    format!("£{}.{pence:02}", group_thousands(pounds))
}

fn group_thousands(value: u64) -> String {
    let digits = value.to_string();
    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
    for (index, digit) in digits.chars().enumerate() {
        if index > 0 && (digits.len() - index) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(digit);
    }
    grouped
}

/// Parse an amount rendered by [`format_currency`] (the `£` sign and
/// separators are optional).
///
/// Fractions beyond two decimal places round half up to whole pence.
pub fn parse_amount(text: &str) -> Result<Money, AmountParseError> {
    let trimmed = text.trim();
    let trimmed = trimmed.strip_prefix('£').unwrap_or(trimmed);
    if trimmed.is_empty() {
        return Err(AmountParseError::Empty);
    }
    let (whole, fraction) = trimmed.split_once('.').unwrap_or((trimmed, ""));
    let whole = parse_grouped(whole)?;

    if !fraction.chars().all(|c| c.is_ascii_digit()) {
        return Err(AmountParseError::Malformed);
    }
    let mut fraction_digits = fraction.chars().filter_map(|c| c.to_digit(10));
    let tens = u64::from(fraction_digits.next().unwrap_or(0));
    let units = u64::from(fraction_digits.next().unwrap_or(0));
    let round_up = fraction_digits.next().is_some_and(|digit| digit >= 5);

    whole
        .checked_mul(100)
        .and_then(|pence| pence.checked_add(tens * 10 + units + u64::from(round_up)))
        .map(Money::from_pence)
        .ok_or(AmountParseError::Overflow)
}

fn parse_grouped(whole: &str) -> Result<u64, AmountParseError> {
    if whole.is_empty() {
        return Ok(0);
    }
    let groups: Vec<&str> = whole.split(',').collect();
    let well_grouped = groups.len() == 1
        || groups.iter().enumerate().all(|(index, group)| {
            let len = group.len();
            if index == 0 { (1..=3).contains(&len) } else { len == 3 }
        });
    if !well_grouped {
        return Err(AmountParseError::Malformed);
    }
    let digits: String = groups.concat();
    if !digits.chars().all(|c| c.is_ascii_digit()) {
        return Err(AmountParseError::Malformed);
    }
    digits.parse().map_err(|_| AmountParseError::Overflow)
}

/// Render a percentage to at most one decimal place with a trailing `%`.
///
/// # Examples
/// ```
/// use lease_notifier::domain::formatting::format_percentage;
/// use lease_notifier::domain::Percentage;
///
/// assert_eq!(format_percentage(Percentage::new(75.0).expect("valid")), "75%");
/// assert_eq!(format_percentage(Percentage::new(33.333).expect("valid")), "33.3%");
/// ```
pub fn format_percentage(value: Percentage) -> String {
    format!("{}%", trim_one_decimal(value.value()))
}

/// Render an hour count to at most one decimal place.
pub fn format_hours(value: Hours) -> String {
    trim_one_decimal(value.value())
}

fn trim_one_decimal(value: f64) -> String {
    let rendered = format!("{value:.1}");
    match rendered.strip_suffix(".0") {
        Some(whole) => whole.to_owned(),
        None => rendered,
    }
}

/// Render an instant in the recipient's timezone as
/// `day short-month year, HH:MM` (24-hour clock).
///
/// # Examples
/// ```
/// use chrono::{TimeZone, Utc};
/// use lease_notifier::domain::formatting::{format_uk_date, DEFAULT_TIMEZONE};
///
/// let instant = Utc.with_ymd_and_hms(2026, 7, 4, 16, 5, 0).single().expect("valid");
/// assert_eq!(format_uk_date(instant, DEFAULT_TIMEZONE), "4 Jul 2026, 17:05");
/// ```
pub fn format_uk_date(instant: DateTime<Utc>, timezone: Tz) -> String {
    instant
        .with_timezone(&timezone)
        .format("%-d %b %Y, %H:%M")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rstest::rstest;

    #[rstest]
    #[case(0, "£0.00")]
    #[case(5, "£0.05")]
    #[case(3750, "£37.50")]
    #[case(99_999, "£999.99")]
    #[case(123_450, "£1,234.50")]
    #[case(123_456_789, "£1,234,567.89")]
    fn currency_uses_symbol_and_separators(#[case] pence: u64, #[case] expected: &str) {
        assert_eq!(format_currency(Money::from_pence(pence)), expected);
    }

    #[rstest]
    #[case(0.0)]
    #[case(0.004)]
    #[case(0.005)]
    #[case(12.345)]
    #[case(1234.5)]
    #[case(9876.54)]
    fn currency_round_trips_through_parse(#[case] pounds: f64) {
        let rendered = format_currency(Money::from_pounds(pounds).expect("valid amount"));
        let reparsed = parse_amount(&rendered).expect("parse rendered amount");
        assert_eq!(format_currency(reparsed), rendered);
    }

    #[rstest]
    #[case("£1,234.50", 123_450)]
    #[case("1234.5", 123_450)]
    #[case("0.005", 1)]
    #[case("12", 1200)]
    fn parses_common_amount_shapes(#[case] text: &str, #[case] pence: u64) {
        assert_eq!(parse_amount(text), Ok(Money::from_pence(pence)));
    }

    #[rstest]
    #[case("", AmountParseError::Empty)]
    #[case("£12,34.00", AmountParseError::Malformed)]
    #[case("-3.00", AmountParseError::Malformed)]
    #[case("1.2x", AmountParseError::Malformed)]
    fn rejects_malformed_amounts(#[case] text: &str, #[case] expected: AmountParseError) {
        assert_eq!(parse_amount(text), Err(expected));
    }

    #[rstest]
    #[case(0.0, "0%")]
    #[case(75.0, "75%")]
    #[case(99.95, "100%")]
    #[case(120.26, "120.3%")]
    fn percentages_always_end_with_percent_sign(#[case] value: f64, #[case] expected: &str) {
        let rendered = format_percentage(Percentage::new(value).expect("valid percentage"));
        assert_eq!(rendered, expected);
        assert!(rendered.ends_with('%'));
    }

    #[rstest]
    #[case(chrono_tz::Europe::London, "15 Jan 2026, 09:30")]
    #[case(chrono_tz::Asia::Tokyo, "15 Jan 2026, 18:30")]
    #[case(chrono_tz::America::New_York, "15 Jan 2026, 04:30")]
    fn dates_render_day_month_year_and_24h_time(#[case] timezone: Tz, #[case] expected: &str) {
        let instant = Utc
            .with_ymd_and_hms(2026, 1, 15, 9, 30, 0)
            .single()
            .expect("valid instant");
        assert_eq!(format_uk_date(instant, timezone), expected);
    }

    #[test]
    fn afternoon_times_use_the_24_hour_clock() {
        let instant = Utc
            .with_ymd_and_hms(2026, 12, 31, 23, 59, 0)
            .single()
            .expect("valid instant");
        assert_eq!(format_uk_date(instant, DEFAULT_TIMEZONE), "31 Dec 2026, 23:59");
    }
}
