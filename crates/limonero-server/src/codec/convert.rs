//! Value coercion driven by declared attribute types

use super::Cell;
use bigdecimal::BigDecimal;
use limonero_common::types::AttributeType;
use serde_json::Value;
use std::str::FromStr;

fn is_numeric(attribute_type: AttributeType) -> bool {
    matches!(
        attribute_type,
        AttributeType::Decimal
            | AttributeType::Double
            | AttributeType::Float
            | AttributeType::Integer
            | AttributeType::Long
    )
}

/// Convert one text token.
///
/// Numeric types fall back to the trimmed text when the token does not
/// parse; an empty token of a numeric type is `Null`.
pub fn coerce_text(raw: &str, attribute_type: AttributeType) -> Cell {
    let trimmed = raw.trim();
    if trimmed.is_empty() && is_numeric(attribute_type) {
        return Cell::Null;
    }

    let converted = match attribute_type {
        AttributeType::Decimal => BigDecimal::from_str(trimmed).ok().map(Cell::Decimal),
        AttributeType::Double | AttributeType::Float => trimmed.parse::<f64>().ok().map(Cell::Float),
        AttributeType::Integer | AttributeType::Long => trimmed.parse::<i64>().ok().map(Cell::Integer),
        _ => None,
    };

    converted.unwrap_or_else(|| Cell::Text(trimmed.to_string()))
}

/// Convert a JSON value, honouring the declared type where it applies
pub fn coerce_json(value: Value, attribute_type: AttributeType) -> Cell {
    match value {
        Value::Null => Cell::Null,
        Value::String(s) => coerce_text(&s, attribute_type),
        Value::Number(n) => match attribute_type {
            AttributeType::Integer | AttributeType::Long => match n.as_i64() {
                Some(i) => Cell::Integer(i),
                None => n.as_f64().map(Cell::Float).unwrap_or(Cell::Null),
            },
            AttributeType::Double | AttributeType::Float => n.as_f64().map(Cell::Float).unwrap_or(Cell::Null),
            AttributeType::Decimal => BigDecimal::from_str(&n.to_string())
                .map(Cell::Decimal)
                .unwrap_or_else(|_| Cell::Text(n.to_string())),
            AttributeType::Character | AttributeType::Text => Cell::Text(n.to_string()),
            _ => cell_from_json(Value::Number(n)),
        },
        other => cell_from_json(other),
    }
}

/// Convert a JSON value without type information
pub fn cell_from_json(value: Value) -> Cell {
    match value {
        Value::Null => Cell::Null,
        Value::Bool(b) => Cell::Bool(b),
        Value::Number(n) => match n.as_i64() {
            Some(i) => Cell::Integer(i),
            None => n.as_f64().map(Cell::Float).unwrap_or(Cell::Null),
        },
        Value::String(s) => Cell::Text(s),
        Value::Array(items) => Cell::List(items.into_iter().map(cell_from_json).collect()),
        object @ Value::Object(_) => Cell::Text(object.to_string()),
    }
}
