//! Locale-Aware Field Formatting
//!
//! Shared by the Typst and HTML backends. Formatting is table-driven over a
//! small set of locales; unknown tags fall back to `en-US` conventions.
//! Currency symbol, placement and decimal count come from the currency code
//! (JPY renders with zero decimals).

use crate::layout::FieldFormat;
use crate::value::Value;
use chrono::{DateTime, Utc};

/// Formatting conventions for one locale + currency pairing.
#[derive(Debug, Clone, PartialEq)]
pub struct Locale {
    pub tag: String,
    pub decimal_sep: char,
    pub group_sep: Option<char>,
    pub currency_symbol: String,
    pub symbol_first: bool,
    pub currency_decimals: u32,
    date_format: &'static str,
    datetime_format: &'static str,
}

impl Locale {
    /// Build conventions from a BCP 47 tag and an ISO 4217 currency code.
    pub fn new(tag: &str, currency: &str) -> Locale {
        let (decimal_sep, group_sep, symbol_first, date_format, datetime_format) =
            match tag.to_ascii_lowercase().as_str() {
                "de-de" | "de" => ('.', Some('.'), true, "%d.%m.%Y", "%d.%m.%Y %H:%M"),
                "fr-fr" | "fr" => (',', Some('\u{202f}'), false, "%d/%m/%Y", "%d/%m/%Y %H:%M"),
                "en-gb" => ('.', Some(','), true, "%d/%m/%Y", "%d/%m/%Y %H:%M"),
                "ja-jp" | "ja" => ('.', Some(','), true, "%Y/%m/%d", "%Y/%m/%d %H:%M"),
                _ => ('.', Some(','), true, "%m/%d/%Y", "%m/%d/%Y %H:%M"),
            };
        // German flips the separators: dot groups, comma decimals.
        let decimal_sep = if matches!(tag.to_ascii_lowercase().as_str(), "de-de" | "de") {
            ','
        } else {
            decimal_sep
        };

        let (currency_symbol, currency_decimals) = match currency.to_ascii_uppercase().as_str() {
            "EUR" => ("\u{20ac}".to_string(), 2),
            "GBP" => ("\u{a3}".to_string(), 2),
            "JPY" => ("\u{a5}".to_string(), 0),
            "USD" => ("$".to_string(), 2),
            other => (other.to_string(), 2),
        };

        Locale {
            tag: tag.to_string(),
            decimal_sep,
            group_sep,
            currency_symbol,
            symbol_first,
            currency_decimals,
            date_format,
            datetime_format,
        }
    }

    pub fn en_us() -> Locale {
        Locale::new("en-US", "USD")
    }
}

impl Default for Locale {
    fn default() -> Self {
        Locale::en_us()
    }
}

/// Format a number with grouped thousands and a fixed decimal count.
pub fn format_number(value: f64, decimals: u32, locale: &Locale) -> String {
    let negative = value < 0.0;
    let rounded = format!("{:.*}", decimals as usize, value.abs());
    let (int_part, frac_part) = match rounded.split_once('.') {
        Some((i, f)) => (i.to_string(), Some(f.to_string())),
        None => (rounded, None),
    };

    let grouped = match locale.group_sep {
        Some(sep) => group_digits(&int_part, sep),
        None => int_part,
    };

    let mut out = String::new();
    if negative {
        out.push('-');
    }
    out.push_str(&grouped);
    if let Some(frac) = frac_part {
        out.push(locale.decimal_sep);
        out.push_str(&frac);
    }
    out
}

fn group_digits(digits: &str, sep: char) -> String {
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    let chars: Vec<char> = digits.chars().collect();
    for (i, c) in chars.iter().enumerate() {
        if i > 0 && (chars.len() - i) % 3 == 0 {
            out.push(sep);
        }
        out.push(*c);
    }
    out
}

/// Format a currency amount with symbol placement from the locale.
pub fn format_currency(value: f64, locale: &Locale) -> String {
    let number = format_number(value, locale.currency_decimals, locale);
    if locale.symbol_first {
        format!("{}{}", locale.currency_symbol, number)
    } else {
        format!("{}\u{a0}{}", number, locale.currency_symbol)
    }
}

/// Format a ratio as a percentage (`0.125` → `12.5%`).
pub fn format_percent(value: f64, decimals: u32, locale: &Locale) -> String {
    format!("{}%", format_number(value * 100.0, decimals, locale))
}

pub fn format_date(value: &DateTime<Utc>, locale: &Locale) -> String {
    value.format(locale.date_format).to_string()
}

pub fn format_datetime(value: &DateTime<Utc>, locale: &Locale) -> String {
    value.format(locale.datetime_format).to_string()
}

/// Apply a field format to a value. Values that cannot carry the requested
/// format (a string under `currency`, a number under `date`) fall back to
/// their display form rather than failing the render.
pub fn format_value(
    value: &Value,
    format: Option<FieldFormat>,
    decimal_places: Option<u32>,
    locale: &Locale,
) -> String {
    let Some(format) = format else {
        return value.to_string();
    };

    match format {
        FieldFormat::Currency => match value.as_f64() {
            Some(n) => format_currency(n, locale),
            None => value.to_string(),
        },
        FieldFormat::Number => match value.as_f64() {
            Some(n) => format_number(n, decimal_places.unwrap_or(2), locale),
            None => value.to_string(),
        },
        FieldFormat::Percent => match value.as_f64() {
            Some(n) => format_percent(n, decimal_places.unwrap_or(1), locale),
            None => value.to_string(),
        },
        FieldFormat::Date => match value {
            Value::DateTime(dt) => format_date(dt, locale),
            other => other.to_string(),
        },
        FieldFormat::Datetime => match value {
            Value::DateTime(dt) => format_datetime(dt, locale),
            other => other.to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_us_currency() {
        let locale = Locale::new("en-US", "USD");
        assert_eq!(format_currency(1234.56, &locale), "$1,234.56");
        assert_eq!(format_currency(-99.5, &locale), "$-99.50");
    }

    #[test]
    fn test_german_currency() {
        let locale = Locale::new("de-DE", "EUR");
        assert_eq!(format_currency(1234.56, &locale), "\u{20ac}1.234,56");
    }

    #[test]
    fn test_french_symbol_after() {
        let locale = Locale::new("fr-FR", "EUR");
        assert_eq!(
            format_currency(1234.5, &locale),
            "1\u{202f}234,50\u{a0}\u{20ac}"
        );
    }

    #[test]
    fn test_jpy_zero_decimals() {
        let locale = Locale::new("ja-JP", "JPY");
        assert_eq!(format_currency(1234.56, &locale), "\u{a5}1,235");
    }

    #[test]
    fn test_number_grouping() {
        let locale = Locale::en_us();
        assert_eq!(format_number(0.0, 2, &locale), "0.00");
        assert_eq!(format_number(999.0, 0, &locale), "999");
        assert_eq!(format_number(1000.0, 0, &locale), "1,000");
        assert_eq!(format_number(1234567.891, 2, &locale), "1,234,567.89");
    }

    #[test]
    fn test_percent() {
        let locale = Locale::en_us();
        assert_eq!(format_percent(0.125, 1, &locale), "12.5%");
        assert_eq!(format_percent(1.0, 0, &locale), "100%");
    }

    #[test]
    fn test_dates_per_locale() {
        let dt = Utc.with_ymd_and_hms(2024, 3, 9, 14, 30, 0).single().expect("valid date");
        assert_eq!(format_date(&dt, &Locale::new("en-US", "USD")), "03/09/2024");
        assert_eq!(format_date(&dt, &Locale::new("de-DE", "EUR")), "09.03.2024");
        assert_eq!(format_date(&dt, &Locale::new("ja-JP", "JPY")), "2024/03/09");
        assert_eq!(
            format_datetime(&dt, &Locale::new("en-GB", "GBP")),
            "09/03/2024 14:30"
        );
    }

    #[test]
    fn test_format_value_fallbacks() {
        let locale = Locale::en_us();
        assert_eq!(
            format_value(&Value::from("n/a"), Some(FieldFormat::Currency), None, &locale),
            "n/a"
        );
        assert_eq!(
            format_value(&Value::Float(12.345), Some(FieldFormat::Number), Some(1), &locale),
            "12.3"
        );
        assert_eq!(format_value(&Value::Int(7), None, None, &locale), "7");
    }
}
