//! Column type inference for delimited text
//!
//! Each column starts untyped and is refined value by value:
//!
//! ```text
//! INTEGER --> LONG --> DECIMAL --+
//!                                +--> CHARACTER --> TEXT (size > 1000)
//! DATETIME ----------------------+
//! ```
//!
//! Integers with a leading zero ("007") are text, so a column holding "007"
//! and "7" ends up CHARACTER. A column is DATETIME only while every
//! non-empty value parses as a date.

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use limonero_common::types::{Attribute, AttributeType};
use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

/// Records examined by schema inference
pub const INFERENCE_LINES: usize = 1000;

pub const MAX_ATTRIBUTE_NAME_LEN: usize = 100;

/// CHARACTER columns longer than this become TEXT
pub const TEXT_THRESHOLD: usize = 1000;

const MIN_DATE_LEN: usize = 5;

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%Y/%m/%d", "%d/%m/%Y", "%m/%d/%Y", "%d-%m-%Y", "%d.%m.%Y", "%Y%m%d"];

const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%Y/%m/%d %H:%M:%S",
    "%d/%m/%Y %H:%M:%S",
    "%d/%m/%Y %H:%M",
    "%m/%d/%Y %H:%M:%S",
];

/// Whether a tolerant parser accepts `value` as a date or timestamp
pub fn looks_like_date(value: &str) -> bool {
    let value = value.trim();
    if value.len() <= MIN_DATE_LEN {
        return false;
    }
    DATE_FORMATS.iter().any(|f| NaiveDate::parse_from_str(value, f).is_ok())
        || DATETIME_FORMATS.iter().any(|f| NaiveDateTime::parse_from_str(value, f).is_ok())
        || DateTime::parse_from_rfc3339(value).is_ok()
        || DateTime::parse_from_rfc2822(value).is_ok()
}

/// Turn a header cell into an attribute name
pub fn slugify(raw: &str) -> String {
    let stripped: String = raw.trim().nfd().filter(|c| !is_combining_mark(*c)).collect();
    let words: Vec<&str> = stripped.split_whitespace().collect();
    words.join("_").chars().take(MAX_ATTRIBUTE_NAME_LEN).collect()
}

/// Attribute names for a header row: slugified, `attr<i>` when empty,
/// suffixed when repeated
pub fn header_names<'a>(header: impl IntoIterator<Item = &'a str>) -> Vec<String> {
    let mut names: Vec<String> = Vec::new();
    for (i, cell) in header.into_iter().enumerate() {
        let mut name = slugify(cell);
        if name.is_empty() {
            name = synthetic_name(i);
        }
        if names.contains(&name) {
            let base = name.clone();
            let mut n = 1;
            while names.contains(&name) {
                name = format!("{}_{}", base, n);
                n += 1;
            }
        }
        names.push(name);
    }
    names
}

pub fn synthetic_name(index: usize) -> String {
    format!("attr{}", index)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kind {
    Unknown,
    Integer,
    Long,
    Decimal,
    DateTime,
    Character,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Observed {
    Integer { digits: usize },
    Long { digits: usize },
    Decimal { digits: usize, scale: usize },
    Date,
    Text,
}

fn classify(value: &str) -> Observed {
    let unsigned = value.strip_prefix(['-', '+']).unwrap_or(value);
    let (integral, fraction) = match unsigned.split_once('.') {
        Some((i, f)) => (i, Some(f)),
        None => (unsigned, None),
    };

    let all_digits = |s: &str| s.bytes().all(|b| b.is_ascii_digit());
    let numeric = !unsigned.is_empty()
        && all_digits(integral)
        && fraction.is_none_or(all_digits)
        && !(integral.is_empty() && fraction.is_none_or(str::is_empty));

    if numeric {
        match fraction {
            None if integral.len() > 1 && integral.starts_with('0') => return Observed::Text,
            None => {
                let digits = integral.len();
                return match value.parse::<i64>() {
                    Ok(v) if v > i32::MIN as i64 && v < i32::MAX as i64 => Observed::Integer { digits },
                    Ok(_) => Observed::Long { digits },
                    Err(_) => Observed::Decimal { digits, scale: 0 },
                };
            }
            Some(fraction) => {
                return Observed::Decimal {
                    digits: integral.len().max(1),
                    scale: fraction.len(),
                }
            }
        }
    }

    if looks_like_date(value) {
        Observed::Date
    } else {
        Observed::Text
    }
}

/// Running type of one column
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnStats {
    name: String,
    kind: Kind,
    nullable: bool,
    max_len: usize,
    max_digits: usize,
    max_scale: usize,
}

impl ColumnStats {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: Kind::Unknown,
            nullable: false,
            max_len: 0,
            max_digits: 0,
            max_scale: 0,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// A row without this column
    pub fn observe_missing(&mut self) {
        self.nullable = true;
    }

    pub fn observe(&mut self, raw: &str) {
        let value = raw.trim();
        if value.is_empty() {
            self.nullable = true;
            return;
        }
        self.max_len = self.max_len.max(value.chars().count());

        if self.kind == Kind::Character {
            return;
        }

        let observed = classify(value);
        match observed {
            Observed::Integer { digits } | Observed::Long { digits } => {
                self.max_digits = self.max_digits.max(digits);
            }
            Observed::Decimal { digits, scale } => {
                self.max_digits = self.max_digits.max(digits);
                self.max_scale = self.max_scale.max(scale);
            }
            Observed::Date | Observed::Text => {}
        }

        self.kind = match (self.kind, observed) {
            (_, Observed::Text) => Kind::Character,
            (Kind::Unknown, Observed::Integer { .. }) => Kind::Integer,
            (Kind::Unknown, Observed::Long { .. }) => Kind::Long,
            (Kind::Unknown, Observed::Decimal { .. }) => Kind::Decimal,
            (Kind::Unknown, Observed::Date) => Kind::DateTime,
            (Kind::DateTime, Observed::Date) => Kind::DateTime,
            (Kind::DateTime, _) | (_, Observed::Date) => Kind::Character,
            (Kind::Integer, Observed::Integer { .. }) => Kind::Integer,
            (Kind::Integer | Kind::Long, Observed::Integer { .. } | Observed::Long { .. }) => Kind::Long,
            (Kind::Integer | Kind::Long | Kind::Decimal, _) => Kind::Decimal,
            (Kind::Character, _) => Kind::Character,
        };
    }

    pub fn into_attribute(self) -> Attribute {
        let size = (self.max_len > 0).then_some(self.max_len as i32);
        let attribute = match self.kind {
            Kind::Integer => Attribute::new(self.name, AttributeType::Integer),
            Kind::Long => Attribute::new(self.name, AttributeType::Long),
            Kind::Decimal => Attribute::new(self.name, AttributeType::Decimal).with_precision(
                Some((self.max_digits + self.max_scale) as i32),
                Some(self.max_scale as i32),
            ),
            Kind::DateTime => Attribute::new(self.name, AttributeType::DateTime),
            Kind::Character if self.max_len > TEXT_THRESHOLD => Attribute::new(self.name, AttributeType::Text),
            Kind::Character => Attribute::new(self.name, AttributeType::Character).with_size(size),
            Kind::Unknown => Attribute::new(self.name, AttributeType::Character),
        };
        attribute.with_nullable(self.nullable || self.kind == Kind::Unknown)
    }
}
