//! Multi-locale date resolution.
//!
//! A [`DateResolver`] runs an ordered list of [`DateStrategy`]s and stops at the
//! first one that yields a date. When none does, the raw value is handed back
//! untouched as [`Value::Text`]: an unparsed date is a pass-through, never an
//! error.

use std::collections::HashMap;
use std::sync::LazyLock;

use chrono::{Duration, NaiveDate, NaiveDateTime, NaiveTime};
use regex::Regex;

use crate::ledger::ingest::model::{Cell, Value};

/// Serial day numbers at or above this bound are not spreadsheet dates.
pub const SERIAL_DATE_LIMIT: i64 = 2_958_466;

/// Placeholder some exports write when a row has no transaction date.
pub fn placeholder_date() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(1900, 1, 1)
        .unwrap_or_default()
        .and_time(NaiveTime::MIN)
}

fn serial_epoch() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(1899, 12, 30)
        .unwrap_or_default()
        .and_time(NaiveTime::MIN)
}

/// Converts a spreadsheet serial (days since 1899-12-30, fractional part =
/// time of day) into a date-time.
pub fn serial_to_datetime(serial: f64) -> Option<NaiveDateTime> {
    if !serial.is_finite() || serial < 0.0 || serial >= SERIAL_DATE_LIMIT as f64 {
        return None;
    }
    let millis = (serial * 86_400_000.0).round() as i64;
    serial_epoch().checked_add_signed(Duration::milliseconds(millis))
}

/// True when the value is a resolved date other than the 1900-01-01 filler.
pub fn is_valid_transaction_date(value: &Value) -> bool {
    matches!(value, Value::Date(date) if *date != placeholder_date())
}

/// Month spellings across the supported locales (English, French, German,
/// Spanish, Kinyarwanda), keyed by their upper-case form.
const MONTH_NAMES: [(&str, &[&str]); 12] = [
    ("01", &["JAN", "JANUARY", "JANVIER", "JANV", "JANUAR", "JÄNNER", "ENERO", "ENE", "MUTARAMA"]),
    ("02", &["FEB", "FEBRUARY", "FÉVRIER", "FEVRIER", "FÉV", "FEV", "FÉVR", "FEVR", "FEBRUAR", "FEBRERO", "GASHYANTARE"]),
    ("03", &["MAR", "MARCH", "MARS", "MÄRZ", "MARZ", "MARZO", "WERURWE"]),
    ("04", &["APR", "APRIL", "AVRIL", "AVR", "ABRIL", "ABR", "MATA"]),
    ("05", &["MAY", "MAI", "MAYO", "GICURASI"]),
    ("06", &["JUN", "JUNE", "JUIN", "JUNI", "JUNIO", "KAMENA"]),
    ("07", &["JUL", "JULY", "JUILLET", "JUIL", "JULI", "JULIO", "NYAKANGA"]),
    ("08", &["AUG", "AUGUST", "AOÛT", "AOUT", "AOU", "AGOSTO", "AGO", "KANAMA"]),
    ("09", &["SEP", "SEPT", "SEPTEMBER", "SEPTEMBRE", "SEPTIEMBRE", "SETIEMBRE", "NZERI", "NZELI"]),
    ("10", &["OCT", "OCTOBER", "OCTOBRE", "OKTOBER", "OKT", "OCTUBRE", "UKWAKIRA"]),
    ("11", &["NOV", "NOVEMBER", "NOVEMBRE", "NOVIEMBRE", "UGUSHYINGO"]),
    ("12", &["DEC", "DECEMBER", "DÉCEMBRE", "DECEMBRE", "DÉC", "DEZEMBER", "DEZ", "DICIEMBRE", "DIC", "UKUBOZA"]),
];

struct MonthTable {
    pattern: Regex,
    numbers: HashMap<String, &'static str>,
}

static MONTHS: LazyLock<MonthTable> = LazyLock::new(|| {
    let mut numbers = HashMap::new();
    let mut names: Vec<&str> = Vec::new();
    for (number, spellings) in MONTH_NAMES {
        for name in spellings {
            numbers.insert(name.to_string(), number);
            names.push(name);
        }
    }
    // Longest first so that alternation prefers full names.
    names.sort_by(|lhs, rhs| rhs.chars().count().cmp(&lhs.chars().count()));
    let alternation = names
        .iter()
        .map(|name| regex::escape(name))
        .collect::<Vec<_>>()
        .join("|");
    let pattern = Regex::new(&format!(r"(?i)\b(?:{alternation})\b"))
        .expect("month alternation is a valid pattern");
    MonthTable { pattern, numbers }
});

/// Replaces every recognised month name with its two-digit number in a single
/// case-insensitive pass.
pub fn substitute_month_names(raw: &str) -> String {
    let table = &*MONTHS;
    table
        .pattern
        .replace_all(raw, |caps: &regex::Captures<'_>| {
            let matched = &caps[0];
            table
                .numbers
                .get(&matched.to_uppercase())
                .map(|number| number.to_string())
                .unwrap_or_else(|| matched.to_string())
        })
        .into_owned()
}

/// One way of turning a raw cell into a date.
pub trait DateStrategy: Send + Sync {
    fn resolve(&self, cell: &Cell) -> Option<NaiveDateTime>;
}

/// Integers and digit strings below [`SERIAL_DATE_LIMIT`] are serial dates.
#[derive(Debug, Default)]
pub struct SerialDate;

impl DateStrategy for SerialDate {
    fn resolve(&self, cell: &Cell) -> Option<NaiveDateTime> {
        let days = match cell {
            Cell::Int(value) => *value,
            Cell::Float(value) if value.is_finite() => value.trunc() as i64,
            Cell::Text(value) => {
                let trimmed = value.trim();
                if trimmed.is_empty() || !trimmed.chars().all(|c| c.is_ascii_digit()) {
                    return None;
                }
                trimmed.parse::<i64>().ok()?
            }
            _ => return None,
        };
        if (0..SERIAL_DATE_LIMIT).contains(&days) {
            serial_to_datetime(days as f64)
        } else {
            None
        }
    }
}

/// Month-name substitution followed by the configured `strftime` patterns,
/// tried in priority order.
#[derive(Debug, Clone)]
pub struct PatternList {
    formats: Vec<String>,
}

impl PatternList {
    pub fn new(formats: Vec<String>) -> Self {
        let formats = formats
            .into_iter()
            .map(|f| f.trim().to_string())
            .filter(|f| !f.is_empty())
            .collect();
        Self { formats }
    }

    fn parse(&self, text: &str) -> Option<NaiveDateTime> {
        let text = text.trim();
        self.formats.iter().find_map(|format| {
            NaiveDateTime::parse_from_str(text, format)
                .ok()
                .or_else(|| {
                    NaiveDate::parse_from_str(text, format)
                        .ok()
                        .map(|date| date.and_time(NaiveTime::MIN))
                })
        })
    }
}

impl DateStrategy for PatternList {
    fn resolve(&self, cell: &Cell) -> Option<NaiveDateTime> {
        match cell {
            Cell::Text(raw) => self.parse(&substitute_month_names(raw)),
            _ => None,
        }
    }
}

/// Ordered date strategies shared by every worker.
pub struct DateResolver {
    strategies: Vec<Box<dyn DateStrategy>>,
}

impl std::fmt::Debug for DateResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DateResolver")
            .field("strategies", &self.strategies.len())
            .finish()
    }
}

impl DateResolver {
    /// Serial dates first, then the given patterns.
    pub fn new(formats: Vec<String>) -> Self {
        Self {
            strategies: vec![Box::new(SerialDate), Box::new(PatternList::new(formats))],
        }
    }

    /// Resolves a raw cell: a date, the untouched raw text, or null.
    pub fn resolve_cell(&self, cell: &Cell) -> Value {
        match cell {
            Cell::Empty => Value::Null,
            Cell::DateTime(value) => Value::Date(*value),
            Cell::Text(raw) if is_null_token(raw) => Value::Null,
            other => self
                .strategies
                .iter()
                .find_map(|strategy| strategy.resolve(other))
                .map(Value::Date)
                .unwrap_or_else(|| Value::Text(other.to_text())),
        }
    }

    /// Resolves an already-typed value; dates are returned unchanged.
    pub fn resolve_value(&self, value: &Value) -> Value {
        match value {
            Value::Null => Value::Null,
            Value::Date(date) => Value::Date(*date),
            Value::Float(number) => self.resolve_cell(&Cell::Float(*number)),
            Value::Text(text) => self.resolve_cell(&Cell::Text(text.clone())),
        }
    }
}

fn is_null_token(raw: &str) -> bool {
    matches!(raw.trim(), "" | "NaN" | "NaT" | "nan")
}
