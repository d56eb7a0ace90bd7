//! JSON-lines codec: one object per line

use super::convert::{cell_from_json, coerce_json};
use super::input::{with_decoded_text, BlockingReader};
use super::{Cell, Codec, CodecError, CodecResult, Row, SourceInput};
use async_trait::async_trait;
use limonero_common::types::Attribute;
use serde_json::{Map, Value};
use std::io::{BufRead, BufReader};
use tracing::instrument;

#[derive(Debug, Clone, Copy, Default)]
pub struct JsonLinesCodec;

fn to_row(mut object: Map<String, Value>, declared: &[Attribute]) -> Row {
    if declared.is_empty() {
        return Row(object.into_iter().map(|(k, v)| (k, cell_from_json(v))).collect());
    }
    Row(declared
        .iter()
        .map(|attribute| {
            let cell = match object.remove(&attribute.name) {
                Some(value) => coerce_json(value, attribute.attribute_type),
                None => Cell::Null,
            };
            (attribute.name.clone(), cell)
        })
        .collect())
}

fn sample_rows(input: BlockingReader, declared: &[Attribute], limit: usize) -> CodecResult<Vec<Row>> {
    let mut rows = Vec::new();
    if limit == 0 {
        return Ok(rows);
    }

    for (number, line) in BufReader::new(input).lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let object = match serde_json::from_str::<Value>(&line) {
            Ok(Value::Object(object)) => object,
            Ok(_) => {
                return Err(CodecError::MalformedJson(format!(
                    "line {}: expected an object",
                    number + 1
                )))
            }
            Err(e) => return Err(CodecError::MalformedJson(format!("line {}: {}", number + 1, e))),
        };
        rows.push(to_row(object, declared));
        if rows.len() >= limit {
            break;
        }
    }
    Ok(rows)
}

#[async_trait]
impl Codec for JsonLinesCodec {
    fn name(&self) -> &'static str {
        "jsonl"
    }

    #[instrument(skip(self, input), fields(path = ?input.path))]
    async fn sample(&self, input: &SourceInput, limit: usize) -> CodecResult<Vec<Row>> {
        let path = input.require_path()?;
        let declared = input.attributes.clone();
        with_decoded_text(&input.backend, path, input.options.encoding.as_deref(), move |text| {
            sample_rows(text, &declared, limit)
        })
        .await
    }

    async fn infer(&self, _input: &SourceInput) -> CodecResult<Vec<Attribute>> {
        Err(CodecError::InvalidArgument(
            "schema inference is not supported for JSON data sources".to_string(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::tests::local_input;
    use limonero_common::types::AttributeType;
    use std::io::Cursor;

    fn text(data: &str) -> BlockingReader {
        Box::new(Cursor::new(data.as_bytes().to_vec()))
    }

    #[test]
    fn test_keys_keep_document_order() {
        let rows = sample_rows(text("{\"z\": 1, \"a\": \"x\"}\n\n{\"z\": 2}\n"), &[], 10).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(serde_json::to_string(&rows[0]).unwrap(), r#"{"z":1,"a":"x"}"#);
        assert_eq!(rows[1].len(), 1);
    }

    #[test]
    fn test_declared_attributes_drive_coercion() {
        let declared = vec![
            Attribute::new("id", AttributeType::Integer),
            Attribute::new("price", AttributeType::Decimal),
            Attribute::new("missing", AttributeType::Character),
        ];
        let rows = sample_rows(text(r#"{"price": "10.50", "id": "7", "extra": true}"#), &declared, 10).unwrap();
        assert_eq!(
            serde_json::to_string(&rows[0]).unwrap(),
            r#"{"id":7,"price":"10.50","missing":null}"#
        );
    }

    #[test]
    fn test_limit_and_malformed_lines() {
        let data = "{\"a\":1}\n{\"a\":2}\nnot json\n";
        assert_eq!(sample_rows(text(data), &[], 2).unwrap().len(), 2);

        let err = sample_rows(text(data), &[], 10).unwrap_err();
        assert!(matches!(err, CodecError::MalformedJson(ref m) if m.starts_with("line 3")));
        assert!(matches!(
            sample_rows(text("[1,2]\n"), &[], 10),
            Err(CodecError::MalformedJson(_))
        ));
    }

    #[tokio::test]
    async fn test_infer_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let input = local_input(&dir, "events.json", b"{\"a\":1}\n");
        assert!(matches!(
            JsonLinesCodec.infer(&input).await,
            Err(CodecError::InvalidArgument(_))
        ));
        assert_eq!(JsonLinesCodec.sample(&input, 5).await.unwrap().len(), 1);
    }
}
