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

//! Decoder for the tag/length-prefixed binary encoding used by result
//! metadata files (a subset of the protobuf wire format).
//!
//! Each field starts with a tag: the low 3 bits select the wire type, the
//! remaining bits the field number. Two wire types are understood:
//!
//! | Wire type | Payload |
//! |---|---|
//! | 0 | unsigned varint, 7 bits per byte, least significant group first |
//! | 2 | varint length followed by that many raw bytes |
//!
//! Anything else is a fatal parse error. Length-delimited payloads are kept
//! opaque; callers decide whether they are text, nested records, or bytes.

use crate::error::{Result, ResultsErrorHelper};
use bytes::{Buf, Bytes};

const WIRE_TYPE_VARINT: u8 = 0;
const WIRE_TYPE_LENGTH_DELIMITED: u8 = 2;

/// A u64 varint never needs more than 10 bytes.
const MAX_VARINT_BYTES: usize = 10;

/// Payload of a decoded field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldValue {
    Varint(u64),
    Bytes(Bytes),
}

/// One decoded field, in input order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Field {
    pub number: u32,
    pub value: FieldValue,
}

impl Field {
    pub fn as_u64(&self) -> Result<u64> {
        match &self.value {
            FieldValue::Varint(v) => Ok(*v),
            FieldValue::Bytes(_) => Err(ResultsErrorHelper::data().message(format!(
                "Field {} is length-delimited, expected an integer",
                self.number
            ))),
        }
    }

    pub fn as_bytes(&self) -> Result<&Bytes> {
        match &self.value {
            FieldValue::Bytes(b) => Ok(b),
            FieldValue::Varint(_) => Err(ResultsErrorHelper::data().message(format!(
                "Field {} is an integer, expected a length-delimited payload",
                self.number
            ))),
        }
    }

    pub fn as_utf8(&self) -> Result<String> {
        let bytes = self.as_bytes()?;
        String::from_utf8(bytes.to_vec()).map_err(|e| {
            ResultsErrorHelper::data()
                .message(format!("Field {} is not valid UTF-8: {}", self.number, e))
        })
    }

    /// Decode a length-delimited payload as a nested record.
    pub fn decode_nested(&self) -> Result<Vec<Field>> {
        CompactBinaryDecoder::decode(self.as_bytes()?.clone())
    }
}

/// Sequential decoder; no lookahead beyond the current field.
pub struct CompactBinaryDecoder {
    buf: Bytes,
}

impl CompactBinaryDecoder {
    pub fn new(buf: impl Into<Bytes>) -> Self {
        Self { buf: buf.into() }
    }

    /// Decode every field of `buf`, preserving order and repeats.
    pub fn decode(buf: impl Into<Bytes>) -> Result<Vec<Field>> {
        let mut decoder = Self::new(buf);
        let mut fields = Vec::new();
        while let Some(field) = decoder.next_field()? {
            fields.push(field);
        }
        Ok(fields)
    }

    /// Read the next field, or `None` at a clean end of input.
    pub fn next_field(&mut self) -> Result<Option<Field>> {
        if !self.buf.has_remaining() {
            return Ok(None);
        }

        let tag = self.read_varint()?;
        let wire_type = (tag & 0x07) as u8;
        let number = u32::try_from(tag >> 3).map_err(|_| {
            ResultsErrorHelper::data().message(format!("Field number out of range in tag {}", tag))
        })?;

        let value = match wire_type {
            WIRE_TYPE_VARINT => FieldValue::Varint(self.read_varint()?),
            WIRE_TYPE_LENGTH_DELIMITED => {
                let len = self.read_varint()?;
                let len = usize::try_from(len)
                    .ok()
                    .filter(|len| *len <= self.buf.remaining())
                    .ok_or_else(|| {
                        ResultsErrorHelper::data().message(format!(
                            "Field {} declares {} bytes but only {} remain",
                            number,
                            len,
                            self.buf.remaining()
                        ))
                    })?;
                FieldValue::Bytes(self.buf.split_to(len))
            }
            other => {
                return Err(ResultsErrorHelper::data().message(format!(
                    "Unsupported wire type {} for field {}",
                    other, number
                )));
            }
        };

        Ok(Some(Field { number, value }))
    }

    fn read_varint(&mut self) -> Result<u64> {
        let mut value = 0u64;

        for i in 0..MAX_VARINT_BYTES {
            if !self.buf.has_remaining() {
                return Err(ResultsErrorHelper::data().message("Incomplete varint"));
            }

            let byte = self.buf.get_u8();
            value |= ((byte & 0x7F) as u64) << (i * 7);

            if byte & 0x80 == 0 {
                return Ok(value);
            }
        }

        Err(ResultsErrorHelper::data().message("Varint too long"))
    }
}

#[cfg(test)]
pub(crate) mod test_encoding {
    //! Minimal encoder used to build fixtures.

    pub fn varint(buf: &mut Vec<u8>, mut value: u64) {
        while value >= 0x80 {
            buf.push((value as u8 & 0x7F) | 0x80);
            value >>= 7;
        }
        buf.push(value as u8);
    }

    pub fn int_field(buf: &mut Vec<u8>, number: u32, value: u64) {
        varint(buf, (number as u64) << 3);
        varint(buf, value);
    }

    pub fn bytes_field(buf: &mut Vec<u8>, number: u32, payload: &[u8]) {
        varint(buf, ((number as u64) << 3) | 2);
        varint(buf, payload.len() as u64);
        buf.extend_from_slice(payload);
    }
}

#[cfg(test)]
mod tests {
    use super::test_encoding::*;
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn test_decode_text_field() {
        let mut buf = Vec::new();
        bytes_field(&mut buf, 6, b"varchar");

        let fields = CompactBinaryDecoder::decode(buf).unwrap();
        assert_eq!(fields.len(), 1);
        assert_eq!(fields[0].number, 6);
        assert_eq!(fields[0].as_bytes().unwrap().as_ref(), b"varchar");
        assert_eq!(fields[0].as_utf8().unwrap(), "varchar");
    }

    #[test]
    fn test_decode_multibyte_varint() {
        let mut buf = Vec::new();
        int_field(&mut buf, 7, 300);
        int_field(&mut buf, 8, u64::MAX);

        let fields = CompactBinaryDecoder::decode(buf).unwrap();
        assert_eq!(fields[0].as_u64().unwrap(), 300);
        assert_eq!(fields[1].as_u64().unwrap(), u64::MAX);
    }

    #[test]
    fn test_repeated_fields_preserved_in_order() {
        let mut buf = Vec::new();
        bytes_field(&mut buf, 1, b"a");
        int_field(&mut buf, 2, 5);
        bytes_field(&mut buf, 1, b"b");

        let fields = CompactBinaryDecoder::decode(buf).unwrap();
        let numbers: Vec<u32> = fields.iter().map(|f| f.number).collect();
        assert_eq!(numbers, vec![1, 2, 1]);
        assert_eq!(fields[2].as_utf8().unwrap(), "b");
    }

    #[test]
    fn test_nested_record() {
        let mut inner = Vec::new();
        bytes_field(&mut inner, 4, b"id");
        int_field(&mut inner, 9, 1);
        let mut outer = Vec::new();
        bytes_field(&mut outer, 1, &inner);

        let fields = CompactBinaryDecoder::decode(outer).unwrap();
        let nested = fields[0].decode_nested().unwrap();
        assert_eq!(nested.len(), 2);
        assert_eq!(nested[0].as_utf8().unwrap(), "id");
        assert_eq!(nested[1].as_u64().unwrap(), 1);
    }

    #[test]
    fn test_unsupported_wire_type_is_fatal() {
        // field 3, wire type 5 (fixed32)
        let buf: Vec<u8> = vec![(3 << 3) | 5, 0, 0, 0, 0];
        let err = CompactBinaryDecoder::decode(buf).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Data);
        assert!(err.message().contains("wire type 5"));
    }

    #[test]
    fn test_truncated_payload_is_error() {
        let mut buf = Vec::new();
        bytes_field(&mut buf, 5, b"label");
        buf.truncate(buf.len() - 2);
        assert!(CompactBinaryDecoder::decode(buf).is_err());

        // Continuation bit set on the last byte.
        let buf: Vec<u8> = vec![7 << 3, 0x80];
        assert!(CompactBinaryDecoder::decode(buf).is_err());
    }

    #[test]
    fn test_empty_input_has_no_fields() {
        assert!(CompactBinaryDecoder::decode(Vec::new()).unwrap().is_empty());
    }

    #[test]
    fn test_type_mismatch_accessors() {
        let mut buf = Vec::new();
        int_field(&mut buf, 7, 3);
        let fields = CompactBinaryDecoder::decode(buf).unwrap();
        assert!(fields[0].as_bytes().is_err());
        assert!(fields[0].decode_nested().is_err());
    }
}
