//! Delimited text codec

use super::convert::coerce_text;
use super::infer::{header_names, synthetic_name, ColumnStats, INFERENCE_LINES};
use super::input::{with_decoded_text, BlockingReader};
use super::{Cell, Codec, CodecError, CodecResult, ParseOptions, RecordTerminator, Row, SourceInput};
use ::csv::{ErrorKind, ReaderBuilder, StringRecord, Terminator};
use async_trait::async_trait;
use limonero_common::types::{Attribute, AttributeType};
use tracing::{debug, instrument};

#[derive(Debug, Clone, Copy, Default)]
pub struct CsvCodec;

fn reader(input: BlockingReader, options: &ParseOptions) -> ::csv::Reader<BlockingReader> {
    let terminator = match options.terminator {
        RecordTerminator::Newline => Terminator::CRLF,
        RecordTerminator::Byte(byte) => Terminator::Any(byte),
    };
    ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .delimiter(options.delimiter)
        .quote(options.quote)
        .terminator(terminator)
        .from_reader(input)
}

/// Feed well-formed records to `visit` until it returns `false`.
///
/// Malformed records are skipped; I/O failures abort the read. When
/// multiline fields are disabled, records spanning several lines are
/// skipped too.
fn for_each_record(
    input: BlockingReader,
    options: &ParseOptions,
    mut visit: impl FnMut(StringRecord) -> CodecResult<bool>,
) -> CodecResult<()> {
    let mut reader = reader(input, options);
    let mut record = StringRecord::new();
    loop {
        match reader.read_record(&mut record) {
            Ok(false) => return Ok(()),
            Ok(true) => {}
            Err(e) => match e.into_kind() {
                ErrorKind::Io(io) => return Err(io.into()),
                other => {
                    debug!(error = ?other, "Skipping malformed record");
                    continue;
                }
            },
        }
        if !options.multiline && record.iter().any(|f| f.contains(['\n', '\r'])) {
            debug!("Skipping multiline record");
            continue;
        }
        if !visit(record.clone())? {
            return Ok(());
        }
    }
}

fn sample_rows(
    input: BlockingReader,
    options: &ParseOptions,
    declared: &[Attribute],
    limit: usize,
) -> CodecResult<Vec<Row>> {
    let mut columns: Vec<(String, AttributeType)> = declared
        .iter()
        .map(|a| (a.name.clone(), a.attribute_type))
        .collect();
    let mut header_pending = options.has_header;
    let mut rows = Vec::new();

    if limit == 0 {
        return Ok(rows);
    }

    for_each_record(input, options, |record| {
        if header_pending {
            header_pending = false;
            if columns.is_empty() {
                columns = header_names(record.iter())
                    .into_iter()
                    .map(|name| (name, AttributeType::Text))
                    .collect();
            }
            return Ok(true);
        }

        if declared.is_empty() && !options.has_header {
            while columns.len() < record.len() {
                columns.push((synthetic_name(columns.len()), AttributeType::Text));
            }
        }
        if record.len() > columns.len() {
            debug!(fields = record.len(), columns = columns.len(), "Skipping record wider than schema");
            return Ok(true);
        }

        let row = columns
            .iter()
            .enumerate()
            .map(|(i, (name, attribute_type))| {
                let cell = match record.get(i) {
                    Some(raw) if !options.is_missing(raw) => coerce_text(raw, *attribute_type),
                    _ => Cell::Null,
                };
                (name.clone(), cell)
            })
            .collect();
        rows.push(Row(row));
        Ok(rows.len() < limit)
    })?;

    Ok(rows)
}

fn infer_attributes(input: BlockingReader, options: &ParseOptions) -> CodecResult<Vec<Attribute>> {
    let mut columns: Vec<ColumnStats> = Vec::new();
    let mut header_pending = options.has_header;
    let mut seen = 0usize;

    for_each_record(input, options, |record| {
        if header_pending {
            header_pending = false;
            columns = header_names(record.iter()).into_iter().map(ColumnStats::new).collect();
            return Ok(true);
        }

        if !options.has_header {
            while columns.len() < record.len() {
                let mut stats = ColumnStats::new(synthetic_name(columns.len()));
                // Earlier rows had no value for this column
                if seen > 0 {
                    stats.observe_missing();
                }
                columns.push(stats);
            }
        }
        if record.len() > columns.len() {
            return Ok(true);
        }

        for (i, stats) in columns.iter_mut().enumerate() {
            match record.get(i) {
                Some(raw) if !options.is_missing(raw) => stats.observe(raw),
                Some(_) => stats.observe(""),
                None => stats.observe_missing(),
            }
        }
        seen += 1;
        Ok(seen < INFERENCE_LINES)
    })?;

    Ok(columns.into_iter().map(ColumnStats::into_attribute).collect())
}

#[async_trait]
impl Codec for CsvCodec {
    fn name(&self) -> &'static str {
        "csv"
    }

    #[instrument(skip(self, input), fields(path = ?input.path))]
    async fn sample(&self, input: &SourceInput, limit: usize) -> CodecResult<Vec<Row>> {
        let path = input.require_path()?;
        let options = input.options.clone();
        let declared = input.attributes.clone();
        with_decoded_text(&input.backend, path, input.options.encoding.as_deref(), move |text| {
            sample_rows(text, &options, &declared, limit)
        })
        .await
    }

    #[instrument(skip(self, input), fields(path = ?input.path))]
    async fn infer(&self, input: &SourceInput) -> CodecResult<Vec<Attribute>> {
        let path = input.require_path()?;
        let options = input.options.clone();
        with_decoded_text(&input.backend, path, input.options.encoding.as_deref(), move |text| {
            infer_attributes(text, &options)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::tests::local_input;
    use bigdecimal::BigDecimal;
    use std::io::Cursor;
    use std::str::FromStr;

    const PEOPLE: &str = "id,name,salary\n1,Bob,12.30\n2,Alice,999999999999\n";

    fn text(data: &str) -> BlockingReader {
        Box::new(Cursor::new(data.as_bytes().to_vec()))
    }

    fn with_header() -> ParseOptions {
        ParseOptions {
            has_header: true,
            ..ParseOptions::default()
        }
    }

    #[test]
    fn test_infer_people() {
        let attributes = infer_attributes(text(PEOPLE), &with_header()).unwrap();
        let names: Vec<_> = attributes.iter().map(|a| a.name.as_str()).collect();
        assert_eq!(names, vec!["id", "name", "salary"]);

        assert_eq!(attributes[0].attribute_type, AttributeType::Integer);
        assert_eq!(attributes[1].attribute_type, AttributeType::Character);
        assert_eq!(attributes[1].size, Some(5));
        assert_eq!(attributes[2].attribute_type, AttributeType::Decimal);
        assert!(attributes[2].precision.unwrap() >= 14);
        assert_eq!(attributes[2].scale, Some(2));
        assert!(!attributes[2].nullable);
    }

    #[test]
    fn test_infer_without_header_synthesizes_names() {
        let attributes = infer_attributes(text("1,a\n2,b,3\n"), &ParseOptions::default()).unwrap();
        let names: Vec<_> = attributes.iter().map(|a| a.name.as_str()).collect();
        assert_eq!(names, vec!["attr0", "attr1", "attr2"]);
        assert!(attributes[2].nullable);
        assert!(!attributes[0].nullable);
    }

    #[test]
    fn test_missing_tokens_are_empty() {
        let options = ParseOptions {
            missing: vec!["NA".to_string()],
            ..with_header()
        };
        let attributes = infer_attributes(text("n\n1\nNA\n3\n"), &options).unwrap();
        assert_eq!(attributes[0].attribute_type, AttributeType::Integer);
        assert!(attributes[0].nullable);
    }

    #[test]
    fn test_infer_reads_bounded_prefix() {
        let mut data = String::from("v\n");
        for i in 0..INFERENCE_LINES {
            data.push_str(&format!("{}\n", i));
        }
        data.push_str("not a number\n");
        let attributes = infer_attributes(text(&data), &with_header()).unwrap();
        assert_eq!(attributes[0].attribute_type, AttributeType::Integer);
    }

    #[test]
    fn test_sample_with_declared_types() {
        let declared = vec![
            Attribute::new("id", AttributeType::Integer),
            Attribute::new("name", AttributeType::Character),
            Attribute::new("salary", AttributeType::Decimal),
        ];
        let rows = sample_rows(text(PEOPLE), &with_header(), &declared, 10).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].get("id"), Some(&Cell::Integer(1)));
        assert_eq!(rows[1].get("name"), Some(&Cell::Text("Alice".to_string())));
        assert_eq!(
            rows[1].get("salary"),
            Some(&Cell::Decimal(BigDecimal::from_str("999999999999").unwrap()))
        );
    }

    #[test]
    fn test_sample_respects_limit() {
        let rows = sample_rows(text(PEOPLE), &with_header(), &[], 1).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get("name"), Some(&Cell::Text("Bob".to_string())));
        assert!(sample_rows(text(PEOPLE), &with_header(), &[], 0).unwrap().is_empty());
    }

    #[test]
    fn test_sample_pads_short_and_skips_wide_records() {
        let declared = vec![
            Attribute::new("a", AttributeType::Integer),
            Attribute::new("b", AttributeType::Integer),
        ];
        let rows = sample_rows(text("1\n1,2,3\n4,\n"), &ParseOptions::default(), &declared, 10).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].get("b"), Some(&Cell::Null));
        assert_eq!(rows[1].get("a"), Some(&Cell::Integer(4)));
        assert_eq!(rows[1].get("b"), Some(&Cell::Null));
    }

    #[test]
    fn test_multiline_records() {
        let data = "a,b\n1,\"two\nlines\"\n3,x\n";
        let rows = sample_rows(text(data), &with_header(), &[], 10).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get("a"), Some(&Cell::Text("3".to_string())));

        let options = ParseOptions {
            multiline: true,
            ..with_header()
        };
        let rows = sample_rows(text(data), &options, &[], 10).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].get("b"), Some(&Cell::Text("two\nlines".to_string())));
    }

    #[test]
    fn test_custom_delimiters() {
        let options = ParseOptions {
            delimiter: b';',
            quote: b'\'',
            terminator: RecordTerminator::Byte(b'|'),
            ..with_header()
        };
        let rows = sample_rows(text("a;b|'x;y';2|"), &options, &[], 10).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get("a"), Some(&Cell::Text("x;y".to_string())));
    }

    #[tokio::test]
    async fn test_codec_reads_gzip_from_backend() {
        use flate2::write::GzEncoder;
        use flate2::Compression;
        use std::io::Write;

        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(PEOPLE.as_bytes()).unwrap();
        let dir = tempfile::tempdir().unwrap();
        let mut input = local_input(&dir, "people.csv.gz", &encoder.finish().unwrap());
        input.options.has_header = true;

        let attributes = CsvCodec.infer(&input).await.unwrap();
        assert_eq!(attributes.len(), 3);
        let rows = CsvCodec.sample(&input, 5).await.unwrap();
        assert_eq!(rows.len(), 2);
    }

    #[tokio::test]
    async fn test_missing_file_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let mut input = local_input(&dir, "present.csv", b"a\n");
        input.path = Some(dir.path().join("absent.csv").display().to_string());
        let err = CsvCodec.sample(&input, 5).await.unwrap_err();
        assert!(matches!(err, CodecError::Backend(crate::backend::BackendError::NotFound(_))));
    }
}
