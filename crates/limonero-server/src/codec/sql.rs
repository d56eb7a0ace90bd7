//! Query-backed sources (MySQL, Hive)
//!
//! The backend does the work: `query_columns` describes the statement
//! without fetching rows and `query_rows` runs it with a row limit.

use super::convert::{cell_from_json, coerce_json};
use super::{Cell, Codec, CodecResult, Row, SourceInput};
use crate::backend::{ColumnDescription, SqlRow};
use async_trait::async_trait;
use limonero_common::types::{Attribute, AttributeType};
use tracing::{debug, instrument};

#[derive(Debug, Clone, Copy, Default)]
pub struct SqlCodec;

/// Catalog type of a SQL column type name such as `INT`, `DECIMAL(10,2)`
/// or `bigint unsigned`
pub fn sql_attribute_type(raw_type: &str) -> AttributeType {
    let family = raw_type
        .split(|c: char| c.is_whitespace() || c == '(')
        .next()
        .unwrap_or_default()
        .to_ascii_uppercase();
    match family.as_str() {
        "INT" | "INTEGER" | "TINYINT" | "SMALLINT" | "MEDIUMINT" | "YEAR" | "BOOLEAN" | "BOOL" => {
            AttributeType::Integer
        }
        "BIGINT" => AttributeType::Long,
        "DECIMAL" | "NEWDECIMAL" | "NUMERIC" => AttributeType::Decimal,
        "FLOAT" => AttributeType::Float,
        "DOUBLE" | "REAL" => AttributeType::Double,
        "DATE" => AttributeType::Date,
        "DATETIME" => AttributeType::DateTime,
        "TIME" => AttributeType::Time,
        "TIMESTAMP" => AttributeType::Timestamp,
        "BINARY" | "VARBINARY" | "BLOB" => AttributeType::Binary,
        "ARRAY" => AttributeType::Vector,
        _ => AttributeType::Character,
    }
}

fn attribute(column: ColumnDescription) -> Attribute {
    Attribute::new(column.name, sql_attribute_type(&column.raw_type))
        .with_size(column.size)
        .with_precision(column.precision, column.scale)
        .with_nullable(column.nullable)
}

fn to_row(row: SqlRow, declared: &[Attribute]) -> Row {
    if declared.is_empty() {
        return Row(row.into_iter().map(|(name, value)| (name, cell_from_json(value))).collect());
    }
    let mut row = row;
    Row(declared
        .iter()
        .map(|attribute| {
            let cell = match row.iter().position(|(name, _)| *name == attribute.name) {
                Some(index) => coerce_json(row.swap_remove(index).1, attribute.attribute_type),
                None => Cell::Null,
            };
            (attribute.name.clone(), cell)
        })
        .collect())
}

#[async_trait]
impl Codec for SqlCodec {
    fn name(&self) -> &'static str {
        "sql"
    }

    #[instrument(skip(self, input))]
    async fn sample(&self, input: &SourceInput, limit: usize) -> CodecResult<Vec<Row>> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let rows = input.backend.query_rows(input.require_command()?, limit).await?;
        debug!(rows = rows.len(), "Fetched query sample");
        Ok(rows
            .into_iter()
            .take(limit)
            .map(|row| to_row(row, &input.attributes))
            .collect())
    }

    #[instrument(skip(self, input))]
    async fn infer(&self, input: &SourceInput) -> CodecResult<Vec<Attribute>> {
        let columns = input.backend.query_columns(input.require_command()?).await?;
        Ok(columns.into_iter().map(attribute).collect())
    }
}
