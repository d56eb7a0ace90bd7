//! Shapefile attribute tables (dBase `.dbf` companions)
//!
//! Only the attribute table is read; geometry in the `.shp` file is ignored.

use super::convert::coerce_text;
use super::input::{open_blocking, resolve_encoding};
use super::{Cell, Codec, CodecError, CodecResult, Row, SourceInput};
use async_trait::async_trait;
use bigdecimal::BigDecimal;
use encoding_rs::Encoding;
use limonero_common::types::{Attribute, AttributeType};
use std::io::{BufReader, ErrorKind, Read};
use tracing::{debug, instrument};

const HEADER_LEN: usize = 32;
const DESCRIPTOR_LEN: usize = 32;
const DESCRIPTOR_TERMINATOR: u8 = 0x0D;
const END_OF_FILE: u8 = 0x1A;
const DELETED: u8 = b'*';
const FIELD_NAME_LEN: usize = 11;

#[derive(Debug, Clone, Copy, Default)]
pub struct DbfCodec;

/// `.dbf` file sitting next to a shapefile
pub fn companion_path(path: &str) -> String {
    match path.rsplit_once('.') {
        Some((stem, extension)) if !extension.contains('/') => format!("{}.dbf", stem),
        _ => format!("{}.dbf", path),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Field {
    name: String,
    kind: u8,
    length: usize,
    decimals: u8,
}

impl Field {
    fn attribute_type(&self) -> AttributeType {
        match self.kind {
            b'C' => AttributeType::Character,
            b'N' | b'F' => AttributeType::Float,
            b'B' | b'O' => AttributeType::Double,
            b'D' => AttributeType::DateTime,
            b'I' => AttributeType::Integer,
            b'L' => AttributeType::Long,
            b'M' => AttributeType::Text,
            b'Y' => AttributeType::Decimal,
            _ => AttributeType::Character,
        }
    }

    fn attribute(&self) -> Attribute {
        let scale = matches!(self.kind, b'N' | b'F' | b'Y' | b'B' | b'O').then_some(self.decimals as i32);
        Attribute::new(self.name.clone(), self.attribute_type())
            .with_size(Some(self.length as i32))
            .with_precision(None, scale)
            .with_nullable(true)
    }

    fn decode(&self, raw: &[u8], encoding: &'static Encoding) -> Cell {
        match self.kind {
            b'L' => match raw.first() {
                Some(b'T' | b't' | b'Y' | b'y') => Cell::Bool(true),
                Some(b'F' | b'f' | b'N' | b'n') => Cell::Bool(false),
                _ => Cell::Null,
            },
            b'I' => match <[u8; 4]>::try_from(raw) {
                Ok(bytes) => Cell::Integer(i32::from_le_bytes(bytes) as i64),
                Err(_) => Cell::Null,
            },
            b'B' | b'O' => match <[u8; 8]>::try_from(raw) {
                Ok(bytes) => Cell::Float(f64::from_le_bytes(bytes)),
                Err(_) => Cell::Null,
            },
            b'Y' => match <[u8; 8]>::try_from(raw) {
                Ok(bytes) => Cell::Decimal(BigDecimal::new(i64::from_le_bytes(bytes).into(), 4)),
                Err(_) => Cell::Null,
            },
            b'D' => {
                let text = String::from_utf8_lossy(raw);
                let text = text.trim();
                match text.len() {
                    0 => Cell::Null,
                    8 if text.bytes().all(|b| b.is_ascii_digit()) => {
                        Cell::Text(format!("{}-{}-{}", &text[..4], &text[4..6], &text[6..]))
                    }
                    _ => Cell::Text(text.to_string()),
                }
            }
            _ => {
                let (text, _) = encoding.decode_without_bom_handling(raw);
                let text = text.trim_end_matches('\0');
                if text.trim().is_empty() && self.kind != b'C' {
                    Cell::Null
                } else {
                    coerce_text(text, self.attribute_type())
                }
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Header {
    records: u32,
    record_len: usize,
    fields: Vec<Field>,
}

fn read_exact<R: Read>(reader: &mut R, buf: &mut [u8], what: &str) -> CodecResult<()> {
    reader.read_exact(buf).map_err(|e| match e.kind() {
        ErrorKind::UnexpectedEof => CodecError::MalformedDbf(format!("truncated {}", what)),
        _ => e.into(),
    })
}

fn read_header<R: Read>(reader: &mut R) -> CodecResult<Header> {
    let mut header = [0u8; HEADER_LEN];
    read_exact(reader, &mut header, "header")?;
    let records = u32::from_le_bytes([header[4], header[5], header[6], header[7]]);
    let header_len = u16::from_le_bytes([header[8], header[9]]) as usize;
    let record_len = u16::from_le_bytes([header[10], header[11]]) as usize;

    let mut fields = Vec::new();
    let mut consumed = HEADER_LEN;
    loop {
        let mut first = [0u8; 1];
        read_exact(reader, &mut first, "field descriptors")?;
        consumed += 1;
        if first[0] == DESCRIPTOR_TERMINATOR {
            break;
        }

        let mut descriptor = [0u8; DESCRIPTOR_LEN];
        descriptor[0] = first[0];
        read_exact(reader, &mut descriptor[1..], "field descriptors")?;
        consumed += DESCRIPTOR_LEN - 1;

        let name_bytes = &descriptor[..FIELD_NAME_LEN];
        let name_end = name_bytes.iter().position(|b| *b == 0).unwrap_or(FIELD_NAME_LEN);
        fields.push(Field {
            name: String::from_utf8_lossy(&name_bytes[..name_end]).trim().to_string(),
            kind: descriptor[11].to_ascii_uppercase(),
            length: descriptor[16] as usize,
            decimals: descriptor[17],
        });
    }

    if header_len < consumed {
        return Err(CodecError::MalformedDbf(format!(
            "header length {} is shorter than its {} descriptor bytes",
            header_len, consumed
        )));
    }
    let field_bytes: usize = fields.iter().map(|f| f.length).sum();
    if record_len < field_bytes + 1 {
        return Err(CodecError::MalformedDbf(format!(
            "record length {} cannot hold {} field bytes",
            record_len, field_bytes
        )));
    }

    // Skip anything between the descriptors and the first record
    let mut padding = vec![0u8; header_len - consumed];
    read_exact(reader, &mut padding, "header")?;

    Ok(Header {
        records,
        record_len,
        fields,
    })
}

fn read_rows<R: Read>(
    reader: &mut R,
    header: &Header,
    encoding: &'static Encoding,
    limit: usize,
) -> CodecResult<Vec<Row>> {
    let mut rows = Vec::new();
    let mut record = vec![0u8; header.record_len];

    for _ in 0..header.records {
        if rows.len() >= limit {
            break;
        }
        match reader.read_exact(&mut record) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => break,
            Err(e) => return Err(e.into()),
        }
        match record[0] {
            END_OF_FILE => break,
            DELETED => continue,
            _ => {}
        }

        let mut offset = 1;
        let row = header
            .fields
            .iter()
            .map(|field| {
                let raw = &record[offset..offset + field.length];
                offset += field.length;
                (field.name.clone(), field.decode(raw, encoding))
            })
            .collect();
        rows.push(Row(row));
    }
    Ok(rows)
}

#[async_trait]
impl Codec for DbfCodec {
    fn name(&self) -> &'static str {
        "dbf"
    }

    #[instrument(skip(self, input), fields(path = ?input.path))]
    async fn sample(&self, input: &SourceInput, limit: usize) -> CodecResult<Vec<Row>> {
        let path = companion_path(input.require_path()?);
        let encoding = resolve_encoding(input.options.encoding.as_deref())?;
        let bridge = open_blocking(&input.backend, &path).await?;

        tokio::task::spawn_blocking(move || {
            let mut reader = BufReader::new(bridge);
            let header = read_header(&mut reader)?;
            debug!(records = header.records, fields = header.fields.len(), "Read DBF header");
            read_rows(&mut reader, &header, encoding, limit)
        })
        .await?
    }

    #[instrument(skip(self, input), fields(path = ?input.path))]
    async fn infer(&self, input: &SourceInput) -> CodecResult<Vec<Attribute>> {
        let path = companion_path(input.require_path()?);
        let bridge = open_blocking(&input.backend, &path).await?;

        tokio::task::spawn_blocking(move || {
            let header = read_header(&mut BufReader::new(bridge))?;
            Ok(header.fields.iter().map(Field::attribute).collect())
        })
        .await?
    }
}
