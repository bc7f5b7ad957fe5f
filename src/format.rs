//! Normalization and formatting helpers shared by every transformer.
//!
//! Excel serial dates, calendar date parsing, CPF grouping, BR-locale money
//! and `H:MM` time quantities. Everything here is pure; transformers and the
//! validator call these instead of re-implementing them.

use std::sync::LazyLock;

use chrono::{Datelike, Duration, NaiveDate};
use regex::Regex;
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::Serialize;

use crate::types::CellValue;

/// Literal placeholders meaning "no date applies".
const DATE_SENTINELS: [&str; 3] = ["00/00/0000", "00-00-0000", "0000-00-00"];

static TIME_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(\d+):(\d{1,2})(?::(\d{1,2})(?:\.\d+)?)?").expect("valid time pattern")
});

// ---------------------------------------------------------------------------
// Dates
// ---------------------------------------------------------------------------

fn excel_epoch() -> Option<NaiveDate> {
    NaiveDate::from_ymd_opt(1899, 12, 30)
}

/// Converts an Excel serial day number to a calendar date.
///
/// Serial 0 is 1899-12-30. Fractions (time of day) are dropped. Serials below
/// 1, NaN and infinities are invalid.
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub fn serial_to_date(serial: f64) -> Option<NaiveDate> {
    if !serial.is_finite() || serial < 1.0 {
        return None;
    }
    excel_epoch()?.checked_add_signed(Duration::try_days(serial.floor() as i64)?)
}

/// Inverse of [`serial_to_date`] for whole days.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn date_to_serial(date: NaiveDate) -> f64 {
    excel_epoch().map_or(0.0, |epoch| (date - epoch).num_days() as f64)
}

/// `dd/mm/yyyy`
#[must_use]
pub fn format_date_br(date: NaiveDate) -> String {
    date.format("%d/%m/%Y").to_string()
}

/// `mm/yyyy`
#[must_use]
pub fn format_month_br(date: NaiveDate) -> String {
    format!("{:02}/{}", date.month(), date.year())
}

/// `yyyy-mm-dd`
#[must_use]
pub fn format_iso(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

/// Outcome of reading a date-bearing cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DateParse {
    Blank,
    /// One of the `00/00/0000` placeholders.
    NotApplicable,
    Valid(NaiveDate),
    /// Right shape, but not a calendar day (e.g. `31/02/2024`).
    Impossible,
    /// Neither `dd/mm/yyyy` nor `yyyy-mm-dd` nor a usable serial.
    Malformed,
}

impl DateParse {
    #[must_use]
    pub const fn date(self) -> Option<NaiveDate> {
        match self {
            Self::Valid(d) => Some(d),
            _ => None,
        }
    }
}

fn all_digits(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit())
}

fn ymd(y: &str, m: &str, d: &str) -> DateParse {
    match (y.parse::<i32>(), m.parse::<u32>(), d.parse::<u32>()) {
        (Ok(y), Ok(m), Ok(d)) => {
            NaiveDate::from_ymd_opt(y, m, d).map_or(DateParse::Impossible, DateParse::Valid)
        }
        _ => DateParse::Malformed,
    }
}

/// Parses `dd/mm/yyyy` or `yyyy-mm-dd` (an ISO time suffix is ignored).
#[must_use]
pub fn parse_date_text(raw: &str) -> DateParse {
    let s = raw.trim();
    if s.is_empty() {
        return DateParse::Blank;
    }
    if DATE_SENTINELS.contains(&s) {
        return DateParse::NotApplicable;
    }

    let parts: Vec<&str> = s.split('/').collect();
    if let [d, m, y] = parts.as_slice() {
        if d.len() <= 2 && m.len() <= 2 && y.len() == 4 && [d, m, y].iter().all(|p| all_digits(p)) {
            return ymd(y, m, d);
        }
        return DateParse::Malformed;
    }

    let date_part = s.split_once('T').map_or(s, |(date, _)| date);
    let parts: Vec<&str> = date_part.split('-').collect();
    if let [y, m, d] = parts.as_slice() {
        if y.len() == 4 && m.len() == 2 && d.len() == 2 && [y, m, d].iter().all(|p| all_digits(p)) {
            return ymd(y, m, d);
        }
    }
    DateParse::Malformed
}

/// Parses a date cell: numbers are Excel serials, text goes through
/// [`parse_date_text`].
#[must_use]
pub fn parse_date_cell(cell: &CellValue) -> DateParse {
    match cell {
        CellValue::Empty => DateParse::Blank,
        CellValue::Number(n) => serial_to_date(*n).map_or(DateParse::Malformed, DateParse::Valid),
        CellValue::Text(s) => parse_date_text(s),
        CellValue::Bool(_) => DateParse::Malformed,
    }
}

/// Renders a date cell as `dd/mm/yyyy` when it parses, otherwise as its
/// trimmed text. Placeholders come back verbatim.
#[must_use]
pub fn date_cell_display(cell: &CellValue) -> String {
    match parse_date_cell(cell) {
        DateParse::Valid(d) => format_date_br(d),
        _ => cell.display(),
    }
}

/// Parses a payroll competence into the first day of its month.
///
/// Accepts `mm/yyyy`, `dd/mm/yyyy`, `yyyy-mm-dd` and `yyyy-mm`.
#[must_use]
pub fn parse_competence(raw: &str) -> Option<NaiveDate> {
    let s = raw.trim();
    let slash: Vec<&str> = s.split('/').collect();
    if let [m, y] = slash.as_slice() {
        if m.len() <= 2 && y.len() == 4 && all_digits(m) && all_digits(y) {
            return NaiveDate::from_ymd_opt(y.parse().ok()?, m.parse().ok()?, 1);
        }
        return None;
    }
    if let [y, m] = s.split('-').collect::<Vec<_>>().as_slice() {
        if y.len() == 4 && m.len() == 2 && all_digits(y) && all_digits(m) {
            return NaiveDate::from_ymd_opt(y.parse().ok()?, m.parse().ok()?, 1);
        }
        return None;
    }
    parse_date_text(s)
        .date()
        .and_then(|d| NaiveDate::from_ymd_opt(d.year(), d.month(), 1))
}

/// Normalizes a competence cell to `mm/yyyy`.
#[must_use]
pub fn competence_label(cell: &CellValue) -> Option<String> {
    let first_day = match cell {
        CellValue::Number(n) => serial_to_date(*n)?,
        CellValue::Text(s) => parse_competence(s)?,
        CellValue::Empty | CellValue::Bool(_) => return None,
    };
    Some(format_month_br(first_day))
}

// ---------------------------------------------------------------------------
// Identifiers
// ---------------------------------------------------------------------------

/// Keeps ASCII digits only.
#[must_use]
pub fn digits_only(raw: &str) -> String {
    raw.chars().filter(char::is_ascii_digit).collect()
}

/// Digits of `raw` as a number, or `None` when there are none.
#[must_use]
pub fn parse_code(raw: &str) -> Option<u64> {
    digits_only(raw).parse().ok()
}

/// Left-pads a CPF to 11 digits and groups it as `###.###.###-##`.
///
/// Blank input stays blank.
#[must_use]
pub fn format_cpf(raw: &str) -> String {
    let digits = digits_only(raw);
    if digits.is_empty() {
        return String::new();
    }
    let padded = format!("{digits:0>11}");
    let d = &padded[..11];
    format!("{}.{}.{}-{}", &d[0..3], &d[3..6], &d[6..9], &d[9..11])
}

/// Zero-padded four digit company code.
#[must_use]
pub fn format_company(code: u32) -> String {
    format!("{code:04}")
}

// ---------------------------------------------------------------------------
// Money
// ---------------------------------------------------------------------------

/// Parses a locale-ambiguous money string.
///
/// With both `,` and `.` the dot groups thousands and the comma is decimal.
/// A lone comma is decimal. Several dots are thousands separators; a single
/// dot is decimal. Currency symbols and spaces are ignored.
#[must_use]
pub fn parse_money(raw: &str) -> Option<Decimal> {
    let cleaned: String = raw
        .chars()
        .filter(|c| c.is_ascii_digit() || matches!(c, ',' | '.' | '-'))
        .collect();
    if cleaned.is_empty() {
        return None;
    }

    let has_comma = cleaned.contains(',');
    let dots = cleaned.matches('.').count();
    let normalized = if has_comma {
        cleaned.replace('.', "").replacen(',', ".", 1)
    } else if dots > 1 {
        cleaned.replace('.', "")
    } else {
        cleaned
    };

    normalized.parse::<Decimal>().ok()
}

/// Formats a value as BR currency with two decimals, half away from zero:
/// `1.234,56`.
#[must_use]
pub fn format_currency_br(value: Decimal) -> String {
    let rounded = value.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero);
    let fixed = format!("{:.2}", rounded.abs());
    let (int_part, frac_part) = fixed.split_once('.').unwrap_or((fixed.as_str(), "00"));

    let mut grouped = String::with_capacity(int_part.len() + int_part.len() / 3);
    for (i, ch) in int_part.chars().enumerate() {
        if i > 0 && (int_part.len() - i) % 3 == 0 {
            grouped.push('.');
        }
        grouped.push(ch);
    }

    let sign = if rounded.is_sign_negative() && !rounded.is_zero() { "-" } else { "" };
    format!("{sign}{grouped},{frac_part}")
}

/// A money cell: the parsed value, if any, plus the original text.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct Money {
    pub value: Option<Decimal>,
    pub raw: String,
}

impl Money {
    pub fn from_cell(cell: &CellValue) -> Self {
        let raw = cell.display();
        let value = match cell {
            CellValue::Number(n) => Decimal::from_f64(*n),
            CellValue::Text(s) => parse_money(s),
            _ => None,
        };
        Self { value, raw }
    }

    pub fn from_text(raw: &str) -> Self {
        Self {
            value: parse_money(raw),
            raw: raw.trim().to_string(),
        }
    }

    #[must_use]
    pub fn is_blank(&self) -> bool {
        self.raw.is_empty()
    }

    /// BR-formatted value, or the original text when it did not parse.
    #[must_use]
    pub fn display(&self) -> String {
        self.value.map_or_else(|| self.raw.clone(), format_currency_br)
    }
}

// ---------------------------------------------------------------------------
// Time quantities
// ---------------------------------------------------------------------------

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn round_minutes(minutes: f64) -> u32 {
    if minutes.is_finite() && minutes > 0.0 {
        minutes.round() as u32
    } else {
        0
    }
}

/// Parses a time quantity into whole minutes.
///
/// Numbers are Excel fractional days. Text may be `H:MM[:SS]` (seconds are
/// dropped) or decimal hours with either decimal mark. Anything else is zero.
#[must_use]
pub fn parse_minutes(cell: &CellValue) -> u32 {
    match cell {
        CellValue::Number(n) => round_minutes(n * 24.0 * 60.0),
        CellValue::Text(s) => parse_minutes_text(s),
        CellValue::Empty | CellValue::Bool(_) => 0,
    }
}

/// Text half of [`parse_minutes`].
#[must_use]
pub fn parse_minutes_text(raw: &str) -> u32 {
    let s = raw.trim();
    if let Some(caps) = TIME_RE.captures(s) {
        let hours: u32 = caps[1].parse().unwrap_or(0);
        let minutes: u32 = caps[2].parse().unwrap_or(0);
        return hours.saturating_mul(60).saturating_add(minutes);
    }
    s.replace(',', ".")
        .parse::<f64>()
        .map_or(0, |hours| round_minutes(hours * 60.0))
}

/// Returns `true` when `raw` contains an `H:MM` quantity anywhere.
#[must_use]
pub fn contains_time(raw: &str) -> bool {
    TIME_RE.is_match(raw)
}

/// Renders minutes as `H:MM`; hours are unpadded and may exceed 24.
#[must_use]
pub fn format_minutes(minutes: u32) -> String {
    format!("{}:{:02}", minutes / 60, minutes % 60)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rust_decimal_macros::dec;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn serial_epoch_and_known_days() {
        assert_eq!(serial_to_date(1.0), Some(date(1899, 12, 31)));
        assert_eq!(serial_to_date(45352.0), Some(date(2024, 3, 1)));
        assert_eq!(serial_to_date(45352.75), Some(date(2024, 3, 1)));
    }

    #[test]
    fn serial_rejects_zero_negative_and_nan() {
        assert_eq!(serial_to_date(0.0), None);
        assert_eq!(serial_to_date(-3.0), None);
        assert_eq!(serial_to_date(f64::NAN), None);
        assert_eq!(serial_to_date(f64::INFINITY), None);
    }

    #[test]
    fn serial_round_trips_through_formatting() {
        for serial in [1.0, 60.0, 61.0, 36526.0, 45352.0, 45717.0, 2_958_465.0] {
            let d = serial_to_date(serial).unwrap();
            assert_eq!(date_to_serial(d), serial);
            let text = format_date_br(d);
            assert_eq!(parse_date_text(&text), DateParse::Valid(d));
            assert_eq!(parse_date_cell(&CellValue::Number(serial)), DateParse::Valid(d));
        }
    }

    #[test]
    fn date_text_shapes() {
        assert_eq!(parse_date_text("01/03/2024"), DateParse::Valid(date(2024, 3, 1)));
        assert_eq!(parse_date_text("1/3/2024"), DateParse::Valid(date(2024, 3, 1)));
        assert_eq!(parse_date_text("2024-03-01"), DateParse::Valid(date(2024, 3, 1)));
        assert_eq!(parse_date_text("2024-03-01T00:00:00"), DateParse::Valid(date(2024, 3, 1)));
        assert_eq!(parse_date_text("31/02/2024"), DateParse::Impossible);
        assert_eq!(parse_date_text("00/00/0000"), DateParse::NotApplicable);
        assert_eq!(parse_date_text("ontem"), DateParse::Malformed);
        assert_eq!(parse_date_text("2024/03/01"), DateParse::Malformed);
        assert_eq!(parse_date_text("  "), DateParse::Blank);
    }

    #[test]
    fn competence_labels() {
        assert_eq!(competence_label(&CellValue::from("03/2024")).as_deref(), Some("03/2024"));
        assert_eq!(competence_label(&CellValue::from("15/03/2024")).as_deref(), Some("03/2024"));
        assert_eq!(competence_label(&CellValue::from("2024-03-15")).as_deref(), Some("03/2024"));
        assert_eq!(competence_label(&CellValue::from("2024-03")).as_deref(), Some("03/2024"));
        assert_eq!(competence_label(&CellValue::Number(45352.0)).as_deref(), Some("03/2024"));
        assert_eq!(competence_label(&CellValue::from("13/2024")), None);
        assert_eq!(competence_label(&CellValue::Empty), None);
    }

    #[test]
    fn cpf_is_padded_and_grouped() {
        assert_eq!(format_cpf("12345678901"), "123.456.789-01");
        assert_eq!(format_cpf("123.456.789-01"), "123.456.789-01");
        assert_eq!(format_cpf("123"), "000.000.001-23");
        assert_eq!(format_cpf(""), "");
    }

    #[test]
    fn money_parsing_rules() {
        assert_eq!(parse_money("1.234,56"), Some(dec!(1234.56)));
        assert_eq!(parse_money("150,00"), Some(dec!(150)));
        assert_eq!(parse_money("1.234.567"), Some(dec!(1234567)));
        assert_eq!(parse_money("12.5"), Some(dec!(12.5)));
        assert_eq!(parse_money("R$ 2.500,10"), Some(dec!(2500.1)));
        assert_eq!(parse_money("-10,5"), Some(dec!(-10.5)));
        assert_eq!(parse_money("abc"), None);
        assert_eq!(parse_money(""), None);
    }

    #[test]
    fn money_parse_is_stable_on_its_own_output() {
        for input in ["1.234,56", "0,01", "150", "999.999,99", "-42,10", "12.5", "1.000.000"] {
            let first = parse_money(input).unwrap();
            let again = parse_money(&format_currency_br(first)).unwrap();
            assert_eq!(first, again, "{input}");
        }
    }

    #[test]
    fn money_sums_stay_exact() {
        let total: Decimal = ["0,10", "0,20", "1.000,05"].iter().filter_map(|s| parse_money(s)).sum();
        assert_eq!(total, dec!(1000.35));
        assert_eq!(format_currency_br(total), "1.000,35");
    }

    #[test]
    fn currency_formatting() {
        assert_eq!(format_currency_br(dec!(1234.5)), "1.234,50");
        assert_eq!(format_currency_br(Decimal::ZERO), "0,00");
        assert_eq!(format_currency_br(dec!(-0.001)), "0,00");
        assert_eq!(format_currency_br(dec!(1000000)), "1.000.000,00");
        assert_eq!(format_currency_br(dec!(-75.256)), "-75,26");
        assert_eq!(format_currency_br(dec!(2.005)), "2,01");
    }

    #[test]
    fn numeric_money_cells_convert_to_decimal() {
        let money = Money::from_cell(&CellValue::Number(1234.56));
        assert_eq!(money.value, Some(dec!(1234.56)));
        assert_eq!(money.display(), "1.234,56");
    }

    #[test]
    fn unparsed_money_keeps_raw_text() {
        let money = Money::from_cell(&CellValue::from("n/d"));
        assert_eq!(money.value, None);
        assert_eq!(money.display(), "n/d");
    }

    #[test]
    fn minutes_from_all_three_encodings() {
        assert_eq!(parse_minutes(&CellValue::from("8:00")), 480);
        assert_eq!(parse_minutes(&CellValue::from("1:35:59")), 95);
        assert_eq!(parse_minutes(&CellValue::from("1,5")), 90);
        assert_eq!(parse_minutes(&CellValue::from("2.25")), 135);
        assert_eq!(parse_minutes(&CellValue::Number(1.0 / 3.0)), 480);
        assert_eq!(parse_minutes(&CellValue::from("n/a")), 0);
        assert_eq!(parse_minutes(&CellValue::Empty), 0);
    }

    #[test]
    fn minutes_display() {
        assert_eq!(format_minutes(0), "0:00");
        assert_eq!(format_minutes(95), "1:35");
        assert_eq!(format_minutes(1500), "25:00");
    }
}
