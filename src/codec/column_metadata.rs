// Copyright (c) 2025 ADBC Drivers Contributors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Column metadata parsing for the `.metadata` sidecar object.
//!
//! The sidecar is a record whose field 1 repeats once per column. Each column
//! payload is itself a record:
//!
//! | Field | Attribute | Encoding |
//! |---|---|---|
//! | 1 | catalog | text |
//! | 4 | name | text |
//! | 5 | label | text |
//! | 6 | type | text |
//! | 7 | precision | varint |
//! | 8 | scale | varint |
//! | 9 | nullability | varint, 1 = NOT_NULL, 2 = NULLABLE, else UNKNOWN |
//! | 10 | case sensitive | varint, 0/1 |
//!
//! Unknown field numbers (schema and table name included) are skipped.

use crate::codec::compact::{CompactBinaryDecoder, Field};
use crate::error::{Result, ResultsErrorHelper};
use crate::types::{ColumnDescriptor, Nullability};
use bytes::Bytes;
use tracing::trace;

const METADATA_COLUMN: u32 = 1;

const COLUMN_CATALOG: u32 = 1;
const COLUMN_NAME: u32 = 4;
const COLUMN_LABEL: u32 = 5;
const COLUMN_TYPE: u32 = 6;
const COLUMN_PRECISION: u32 = 7;
const COLUMN_SCALE: u32 = 8;
const COLUMN_NULLABLE: u32 = 9;
const COLUMN_CASE_SENSITIVE: u32 = 10;

/// Decode the column list from a metadata blob.
pub fn parse_column_metadata(blob: impl Into<Bytes>) -> Result<Vec<ColumnDescriptor>> {
    let fields = CompactBinaryDecoder::decode(blob)?;

    let columns = fields
        .iter()
        .filter(|field| field.number == METADATA_COLUMN)
        .map(|field| parse_column(&field.decode_nested()?))
        .collect::<Result<Vec<_>>>()?;

    trace!("Parsed {} column descriptors", columns.len());
    Ok(columns)
}

fn parse_column(fields: &[Field]) -> Result<ColumnDescriptor> {
    let mut column = ColumnDescriptor::default();
    let mut label = None;

    for field in fields {
        match field.number {
            COLUMN_CATALOG => column.catalog = Some(field.as_utf8()?),
            COLUMN_NAME => column.name = field.as_utf8()?,
            COLUMN_LABEL => label = Some(field.as_utf8()?),
            COLUMN_TYPE => column.declared_type = field.as_utf8()?,
            COLUMN_PRECISION => column.precision = as_i64(field, "precision")?,
            COLUMN_SCALE => column.scale = as_i64(field, "scale")?,
            COLUMN_NULLABLE => column.nullability = Nullability::from_code(field.as_u64()?),
            COLUMN_CASE_SENSITIVE => column.case_sensitive = field.as_u64()? != 0,
            _ => {}
        }
    }

    column.label = label.unwrap_or_else(|| column.name.clone());
    Ok(column)
}

fn as_i64(field: &Field, attribute: &str) -> Result<i64> {
    let value = field.as_u64()?;
    i64::try_from(value).map_err(|_| {
        ResultsErrorHelper::data().message(format!("Column {} {} out of range", attribute, value))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::compact::test_encoding::{bytes_field, int_field};

    fn encode_column(name: &str, type_name: &str, nullable: u64) -> Vec<u8> {
        let mut col = Vec::new();
        bytes_field(&mut col, COLUMN_CATALOG, b"hive");
        bytes_field(&mut col, 2, b"default");
        bytes_field(&mut col, 3, b"events");
        bytes_field(&mut col, COLUMN_NAME, name.as_bytes());
        bytes_field(&mut col, COLUMN_LABEL, name.to_uppercase().as_bytes());
        bytes_field(&mut col, COLUMN_TYPE, type_name.as_bytes());
        int_field(&mut col, COLUMN_PRECISION, 10);
        int_field(&mut col, COLUMN_SCALE, 2);
        int_field(&mut col, COLUMN_NULLABLE, nullable);
        int_field(&mut col, COLUMN_CASE_SENSITIVE, 1);
        col
    }

    #[test]
    fn test_parse_columns_in_order() {
        let mut blob = Vec::new();
        bytes_field(&mut blob, METADATA_COLUMN, &encode_column("id", "integer", 1));
        bytes_field(&mut blob, METADATA_COLUMN, &encode_column("name", "varchar", 2));

        let columns = parse_column_metadata(blob).unwrap();
        assert_eq!(columns.len(), 2);

        assert_eq!(columns[0].catalog.as_deref(), Some("hive"));
        assert_eq!(columns[0].name, "id");
        assert_eq!(columns[0].label, "ID");
        assert_eq!(columns[0].declared_type, "integer");
        assert_eq!(columns[0].precision, 10);
        assert_eq!(columns[0].scale, 2);
        assert_eq!(columns[0].nullability, Nullability::NotNull);
        assert!(columns[0].case_sensitive);

        assert_eq!(columns[1].name, "name");
        assert_eq!(columns[1].nullability, Nullability::Nullable);
    }

    #[test]
    fn test_unknown_fields_ignored() {
        let mut col = Vec::new();
        bytes_field(&mut col, COLUMN_NAME, b"ts");
        bytes_field(&mut col, 42, b"future attribute");
        int_field(&mut col, 43, 7);
        int_field(&mut col, COLUMN_NULLABLE, 0);

        let mut blob = Vec::new();
        int_field(&mut blob, 2, 1);
        bytes_field(&mut blob, METADATA_COLUMN, &col);

        let columns = parse_column_metadata(blob).unwrap();
        assert_eq!(columns.len(), 1);
        assert_eq!(columns[0].name, "ts");
        assert_eq!(columns[0].label, "ts");
        assert_eq!(columns[0].nullability, Nullability::Unknown);
        assert!(!columns[0].case_sensitive);
    }

    #[test]
    fn test_column_field_must_be_nested() {
        let mut blob = Vec::new();
        int_field(&mut blob, METADATA_COLUMN, 5);
        assert!(parse_column_metadata(blob).is_err());
    }

    #[test]
    fn test_text_attribute_with_integer_encoding_rejected() {
        let mut col = Vec::new();
        int_field(&mut col, COLUMN_TYPE, 12);
        let mut blob = Vec::new();
        bytes_field(&mut blob, METADATA_COLUMN, &col);
        assert!(parse_column_metadata(blob).is_err());
    }

    #[test]
    fn test_precision_above_i64_range_rejected() {
        let mut col = Vec::new();
        bytes_field(&mut col, COLUMN_NAME, b"amount");
        int_field(&mut col, COLUMN_PRECISION, u64::MAX);
        let mut blob = Vec::new();
        bytes_field(&mut blob, METADATA_COLUMN, &col);

        let err = parse_column_metadata(blob).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Data);
        assert!(err.message().contains("precision"));
    }

    #[test]
    fn test_scale_at_i64_max_accepted() {
        let mut col = Vec::new();
        int_field(&mut col, COLUMN_SCALE, i64::MAX as u64);
        let mut blob = Vec::new();
        bytes_field(&mut blob, METADATA_COLUMN, &col);

        let columns = parse_column_metadata(blob).unwrap();
        assert_eq!(columns[0].scale, i64::MAX);
    }
}
