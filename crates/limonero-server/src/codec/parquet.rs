//! Parquet codec
//!
//! Files are read through ranged backend reads, so only the footer and the
//! row groups a request needs leave the storage. Schema inference reads the
//! footer only. Sampling decodes just the first `limit` rows.

use super::{Cell, Codec, CodecError, CodecResult, Row, SourceInput};
use crate::backend::Backend;
use ::parquet::arrow::arrow_reader::ArrowReaderOptions;
use ::parquet::arrow::async_reader::AsyncFileReader;
use ::parquet::arrow::ParquetRecordBatchStreamBuilder;
use ::parquet::errors::{ParquetError, Result as ParquetResult};
use ::parquet::file::metadata::{ParquetMetaData, ParquetMetaDataReader};
use arrow::array::{Array, ArrayRef, AsArray};
use arrow::compute::cast;
use arrow::datatypes::{DataType, Field, Float64Type, Int64Type, Schema, UInt64Type};
use arrow::record_batch::RecordBatch;
use arrow::util::display::{ArrayFormatter, FormatOptions};
use async_trait::async_trait;
use bigdecimal::BigDecimal;
use bytes::Bytes;
use futures::future::BoxFuture;
use futures::TryStreamExt;
use limonero_common::types::{Attribute, AttributeType};
use std::ops::Range;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, instrument};

const MAX_BATCH_SIZE: usize = 1024;

/// Bytes fetched from the end of the file on the first footer read
const FOOTER_PREFETCH: usize = 64 * 1024;

#[derive(Debug, Clone, Copy, Default)]
pub struct ParquetCodec;

/// Catalog type of an Arrow column
pub fn attribute_type(data_type: &DataType) -> Option<AttributeType> {
    let attribute_type = match data_type {
        DataType::Utf8 | DataType::Utf8View => AttributeType::Character,
        DataType::LargeUtf8 => AttributeType::Text,
        DataType::Boolean
        | DataType::Int8
        | DataType::Int16
        | DataType::Int32
        | DataType::UInt8
        | DataType::UInt16 => AttributeType::Integer,
        DataType::Int64 | DataType::UInt32 | DataType::UInt64 => AttributeType::Long,
        DataType::Float16 | DataType::Float32 => AttributeType::Float,
        DataType::Float64 => AttributeType::Double,
        DataType::Timestamp(_, _) => AttributeType::DateTime,
        DataType::Date32 | DataType::Date64 => AttributeType::Date,
        DataType::Time32(_) | DataType::Time64(_) => AttributeType::Time,
        DataType::Decimal128(_, _) | DataType::Decimal256(_, _) => AttributeType::Decimal,
        DataType::Binary | DataType::LargeBinary | DataType::BinaryView | DataType::FixedSizeBinary(_) => {
            AttributeType::Binary
        }
        DataType::List(_) | DataType::LargeList(_) | DataType::FixedSizeList(_, _) => AttributeType::Vector,
        _ => return None,
    };
    Some(attribute_type)
}

fn attribute(field: &Field) -> CodecResult<Attribute> {
    let attribute_type = attribute_type(field.data_type()).ok_or_else(|| {
        CodecError::UnsupportedColumnType(format!("{} ({})", field.name(), field.data_type()))
    })?;
    let attribute = Attribute::new(field.name().clone(), attribute_type).with_nullable(field.is_nullable());
    Ok(match field.data_type() {
        DataType::Decimal128(precision, scale) | DataType::Decimal256(precision, scale) => {
            attribute.with_precision(Some(*precision as i32), Some(*scale as i32))
        }
        _ => attribute,
    })
}

fn attributes(schema: &Schema) -> CodecResult<Vec<Attribute>> {
    schema.fields().iter().map(|field| attribute(field)).collect()
}

fn formatted(array: &ArrayRef) -> CodecResult<Vec<String>> {
    let options = FormatOptions::default();
    let formatter = ArrayFormatter::try_new(array.as_ref(), &options)?;
    Ok((0..array.len()).map(|i| formatter.value(i).to_string()).collect())
}

fn with_nulls(array: &ArrayRef, values: impl Iterator<Item = Cell>) -> Vec<Cell> {
    values
        .enumerate()
        .map(|(i, cell)| if array.is_null(i) { Cell::Null } else { cell })
        .collect()
}

/// Convert a whole column into cells
fn column_cells(array: &ArrayRef) -> CodecResult<Vec<Cell>> {
    let cells = match array.data_type() {
        DataType::Boolean => {
            let values = array.as_boolean();
            with_nulls(array, (0..array.len()).map(|i| Cell::Bool(values.value(i))))
        }
        DataType::Int8
        | DataType::Int16
        | DataType::Int32
        | DataType::Int64
        | DataType::UInt8
        | DataType::UInt16
        | DataType::UInt32 => {
            let widened = cast(array, &DataType::Int64)?;
            let values = widened.as_primitive::<Int64Type>();
            with_nulls(array, values.values().iter().map(|v| Cell::Integer(*v)))
        }
        DataType::UInt64 => {
            let values = array.as_primitive::<UInt64Type>();
            with_nulls(
                array,
                values.values().iter().map(|v| match i64::try_from(*v) {
                    Ok(v) => Cell::Integer(v),
                    Err(_) => Cell::Decimal(BigDecimal::from(*v)),
                }),
            )
        }
        DataType::Float16 | DataType::Float32 | DataType::Float64 => {
            let widened = cast(array, &DataType::Float64)?;
            let values = widened.as_primitive::<Float64Type>();
            with_nulls(array, values.values().iter().map(|v| Cell::Float(*v)))
        }
        DataType::Utf8 | DataType::LargeUtf8 | DataType::Utf8View => {
            let text = cast(array, &DataType::Utf8)?;
            let values = text.as_string::<i32>();
            with_nulls(array, (0..array.len()).map(|i| Cell::Text(values.value(i).to_string())))
        }
        DataType::Decimal128(_, _) | DataType::Decimal256(_, _) => with_nulls(
            array,
            formatted(array)?.into_iter().map(|s| match BigDecimal::from_str(&s) {
                Ok(d) => Cell::Decimal(d),
                Err(_) => Cell::Text(s),
            }),
        ),
        DataType::List(_) => {
            let lists = array.as_list::<i32>();
            let items = (0..array.len())
                .map(|i| column_cells(&lists.value(i)).map(Cell::List))
                .collect::<CodecResult<Vec<_>>>()?;
            with_nulls(array, items.into_iter())
        }
        DataType::LargeList(_) => {
            let lists = array.as_list::<i64>();
            let items = (0..array.len())
                .map(|i| column_cells(&lists.value(i)).map(Cell::List))
                .collect::<CodecResult<Vec<_>>>()?;
            with_nulls(array, items.into_iter())
        }
        DataType::FixedSizeList(_, _) => {
            let lists = array.as_fixed_size_list();
            let items = (0..array.len())
                .map(|i| column_cells(&lists.value(i)).map(Cell::List))
                .collect::<CodecResult<Vec<_>>>()?;
            with_nulls(array, items.into_iter())
        }
        _ => with_nulls(array, formatted(array)?.into_iter().map(Cell::Text)),
    };
    Ok(cells)
}

/// Random access to a backend file through ranged reads
struct BackendFileReader {
    backend: Arc<dyn Backend>,
    path: String,
    size: u64,
}

impl BackendFileReader {
    async fn open(input: &SourceInput) -> CodecResult<Self> {
        let path = input.require_path()?.to_string();
        let size = input.backend.size(&path).await?;
        Ok(Self {
            backend: input.backend.clone(),
            path,
            size,
        })
    }
}

impl AsyncFileReader for BackendFileReader {
    fn get_bytes(&mut self, range: Range<u64>) -> BoxFuture<'_, ParquetResult<Bytes>> {
        Box::pin(async move {
            debug!(path = %self.path, start = range.start, end = range.end, "Parquet range read");
            self.backend
                .read_range(&self.path, range.start, range.end - range.start)
                .await
                .map_err(|e| ParquetError::External(Box::new(e)))
        })
    }

    fn get_metadata<'a>(
        &'a mut self,
        _options: Option<&'a ArrowReaderOptions>,
    ) -> BoxFuture<'a, ParquetResult<Arc<ParquetMetaData>>> {
        Box::pin(async move {
            let size = self.size;
            let metadata = ParquetMetaDataReader::new()
                .with_prefetch_hint(Some(FOOTER_PREFETCH))
                .load_and_finish(self, size)
                .await?;
            Ok(Arc::new(metadata))
        })
    }
}

async fn stream_builder(input: &SourceInput) -> CodecResult<ParquetRecordBatchStreamBuilder<BackendFileReader>> {
    let reader = BackendFileReader::open(input).await?;
    Ok(ParquetRecordBatchStreamBuilder::new(reader).await?)
}

/// Append the rows of `batch` until `rows` holds `limit` entries
fn push_rows(batch: &RecordBatch, rows: &mut Vec<Row>, limit: usize) -> CodecResult<()> {
    let schema = batch.schema();
    let mut columns = batch
        .columns()
        .iter()
        .map(|column| column_cells(column).map(Vec::into_iter))
        .collect::<CodecResult<Vec<_>>>()?;

    for _ in 0..batch.num_rows() {
        if rows.len() >= limit {
            break;
        }
        let row = schema
            .fields()
            .iter()
            .zip(columns.iter_mut())
            .map(|(field, cells)| (field.name().clone(), cells.next().unwrap_or(Cell::Null)))
            .collect();
        rows.push(Row(row));
    }
    Ok(())
}

#[async_trait]
impl Codec for ParquetCodec {
    fn name(&self) -> &'static str {
        "parquet"
    }

    #[instrument(skip(self, input), fields(path = ?input.path))]
    async fn sample(&self, input: &SourceInput, limit: usize) -> CodecResult<Vec<Row>> {
        let builder = stream_builder(input).await?;
        attributes(builder.schema())?;

        let mut rows = Vec::new();
        if limit == 0 {
            return Ok(rows);
        }

        let mut batches = builder
            .with_limit(limit)
            .with_batch_size(limit.min(MAX_BATCH_SIZE))
            .build()?;
        while let Some(batch) = batches.try_next().await? {
            push_rows(&batch, &mut rows, limit)?;
            if rows.len() >= limit {
                break;
            }
        }
        Ok(rows)
    }

    #[instrument(skip(self, input), fields(path = ?input.path))]
    async fn infer(&self, input: &SourceInput) -> CodecResult<Vec<Attribute>> {
        let builder = stream_builder(input).await?;
        attributes(builder.schema())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{BackendResult, ByteReader};
    use crate::codec::tests::local_input;
    use ::parquet::arrow::ArrowWriter;
    use ::parquet::file::properties::WriterProperties;
    use arrow::array::{
        Decimal128Array, Int32Array, Int64Array, ListArray, StringArray, StructArray, TimestampSecondArray,
    };
    use arrow::datatypes::{Int32Type, TimeUnit};
    use std::sync::atomic::{AtomicU64, Ordering};

    fn parquet_bytes(batch: RecordBatch) -> Vec<u8> {
        let mut buffer = Vec::new();
        let mut writer = ArrowWriter::try_new(&mut buffer, batch.schema(), None).unwrap();
        writer.write(&batch).unwrap();
        writer.close().unwrap();
        buffer
    }

    fn events() -> RecordBatch {
        let schema = Arc::new(Schema::new(vec![
            Field::new("id", DataType::Int64, false),
            Field::new("name", DataType::Utf8, true),
            Field::new("ts", DataType::Timestamp(TimeUnit::Second, None), true),
        ]));
        RecordBatch::try_new(
            schema,
            vec![
                Arc::new(Int64Array::from(vec![1, 2, 3, 4, 5])),
                Arc::new(StringArray::from(vec![Some("a"), None, Some("c"), Some("d"), Some("e")])),
                Arc::new(TimestampSecondArray::from(vec![
                    1_704_067_200,
                    1_704_153_600,
                    1_704_240_000,
                    1_704_326_400,
                    1_704_412_800,
                ])),
            ],
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_infer_reads_footer_schema() {
        let dir = tempfile::tempdir().unwrap();
        let input = local_input(&dir, "events.parquet", &parquet_bytes(events()));

        let attributes = ParquetCodec.infer(&input).await.unwrap();
        let types: Vec<_> = attributes.iter().map(|a| (a.name.as_str(), a.attribute_type)).collect();
        assert_eq!(
            types,
            vec![
                ("id", AttributeType::Long),
                ("name", AttributeType::Character),
                ("ts", AttributeType::DateTime),
            ]
        );
        assert!(!attributes[0].nullable);
        assert!(attributes[1].nullable);
    }

    #[tokio::test]
    async fn test_sample_first_rows() {
        let dir = tempfile::tempdir().unwrap();
        let input = local_input(&dir, "events.parquet", &parquet_bytes(events()));

        let rows = ParquetCodec.sample(&input, 3).await.unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0].get("id"), Some(&Cell::Integer(1)));
        assert_eq!(rows[1].get("name"), Some(&Cell::Null));
        assert_eq!(rows[2].get("name"), Some(&Cell::Text("c".to_string())));
        assert_eq!(rows[0].get("ts"), Some(&Cell::Text("2024-01-01T00:00:00".to_string())));

        assert_eq!(ParquetCodec.sample(&input, 50).await.unwrap().len(), 5);
    }

    /// Ranged reads only; tallies the bytes it serves
    struct RangeOnly {
        inner: Arc<dyn Backend>,
        served: AtomicU64,
    }

    #[async_trait]
    impl Backend for RangeOnly {
        fn kind(&self) -> &'static str {
            "range-only"
        }

        async fn open_read(&self, _path: &str) -> BackendResult<ByteReader> {
            Err(self.unsupported("open_read"))
        }

        async fn size(&self, path: &str) -> BackendResult<u64> {
            self.inner.size(path).await
        }

        async fn read_range(&self, path: &str, offset: u64, length: u64) -> BackendResult<Bytes> {
            let bytes = self.inner.read_range(path, offset, length).await?;
            self.served.fetch_add(bytes.len() as u64, Ordering::SeqCst);
            Ok(bytes)
        }
    }

    fn many_row_groups() -> Vec<u8> {
        let ids: Vec<i64> = (0..20_000).collect();
        let labels: Vec<String> = ids.iter().map(|i| format!("event-{:08}-{}", i, i * 7919)).collect();
        let batch = RecordBatch::try_from_iter(vec![
            ("id", Arc::new(Int64Array::from(ids)) as ArrayRef),
            ("label", Arc::new(StringArray::from(labels)) as ArrayRef),
        ])
        .unwrap();

        let props = WriterProperties::builder().set_max_row_group_size(1_000).build();
        let mut buffer = Vec::new();
        let mut writer = ArrowWriter::try_new(&mut buffer, batch.schema(), Some(props)).unwrap();
        writer.write(&batch).unwrap();
        writer.close().unwrap();
        buffer
    }

    #[tokio::test]
    async fn test_reads_are_bounded() {
        let dir = tempfile::tempdir().unwrap();
        let bytes = many_row_groups();
        let size = bytes.len() as u64;
        let local = local_input(&dir, "big.parquet", &bytes);
        let backend = Arc::new(RangeOnly {
            inner: local.backend.clone(),
            served: AtomicU64::new(0),
        });
        let input = SourceInput {
            backend: backend.clone(),
            ..local
        };

        let attributes = ParquetCodec.infer(&input).await.unwrap();
        assert_eq!(attributes.len(), 2);
        let after_infer = backend.served.load(Ordering::SeqCst);
        assert!(after_infer < size / 4, "infer read {} of {} bytes", after_infer, size);

        let rows = ParquetCodec.sample(&input, 3).await.unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[2].get("id"), Some(&Cell::Integer(2)));
        let sampled = backend.served.load(Ordering::SeqCst) - after_infer;
        assert!(sampled < size / 2, "sample read {} of {} bytes", sampled, size);
    }

    #[test]
    fn test_decimal_and_list_cells() {
        let decimals: ArrayRef = Arc::new(
            Decimal128Array::from(vec![Some(1230), None])
                .with_precision_and_scale(10, 2)
                .unwrap(),
        );
        assert_eq!(
            column_cells(&decimals).unwrap(),
            vec![Cell::Decimal(BigDecimal::from_str("12.30").unwrap()), Cell::Null]
        );

        let lists: ArrayRef = Arc::new(ListArray::from_iter_primitive::<Int32Type, _, _>(vec![
            Some(vec![Some(1), None]),
            None,
        ]));
        assert_eq!(
            column_cells(&lists).unwrap(),
            vec![Cell::List(vec![Cell::Integer(1), Cell::Null]), Cell::Null]
        );
    }

    #[test]
    fn test_type_table() {
        assert_eq!(attribute_type(&DataType::LargeUtf8), Some(AttributeType::Text));
        assert_eq!(attribute_type(&DataType::Boolean), Some(AttributeType::Integer));
        assert_eq!(attribute_type(&DataType::UInt64), Some(AttributeType::Long));
        assert_eq!(attribute_type(&DataType::Float32), Some(AttributeType::Float));
        assert_eq!(attribute_type(&DataType::Float64), Some(AttributeType::Double));
        assert_eq!(attribute_type(&DataType::Date32), Some(AttributeType::Date));
        assert_eq!(attribute_type(&DataType::Time64(TimeUnit::Microsecond)), Some(AttributeType::Time));
        assert_eq!(attribute_type(&DataType::Binary), Some(AttributeType::Binary));
        assert_eq!(attribute_type(&DataType::Null), None);

        let decimal = attribute(&Field::new("price", DataType::Decimal128(12, 3), true)).unwrap();
        assert_eq!(decimal.attribute_type, AttributeType::Decimal);
        assert_eq!((decimal.precision, decimal.scale), (Some(12), Some(3)));
    }

    #[tokio::test]
    async fn test_unsupported_column_type() {
        let nested: ArrayRef = Arc::new(StructArray::from(vec![(
            Arc::new(Field::new("x", DataType::Int32, false)),
            Arc::new(Int32Array::from(vec![1])) as ArrayRef,
        )]));
        let batch = RecordBatch::try_from_iter(vec![("point", nested)]).unwrap();
        let dir = tempfile::tempdir().unwrap();
        let input = local_input(&dir, "nested.parquet", &parquet_bytes(batch));

        let err = ParquetCodec.infer(&input).await.unwrap_err();
        assert!(matches!(err, CodecError::UnsupportedColumnType(_)));
        assert_eq!(err.cause(), Some("unsupported_column_type"));
    }

    #[tokio::test]
    async fn test_garbage_is_bad_input() {
        let dir = tempfile::tempdir().unwrap();
        let input = local_input(&dir, "broken.parquet", b"definitely not parquet");
        let err = ParquetCodec.infer(&input).await.unwrap_err();
        assert_eq!(err.cause(), Some("parquet"));
    }
}
