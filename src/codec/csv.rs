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

//! Reader for the quoted CSV dialect of result files.
//!
//! Every row has exactly the declared number of fields. A field is either
//! empty and unquoted (NULL) or a double-quoted string in which `""` stands
//! for one quote character. Fields are separated by `,` and every row,
//! including the last, ends with a single `\n`.
//!
//! ```text
//! "id","name"\n
//! "1",\n
//! "2","say ""hi"""\n
//! ```

use crate::error::{Result, ResultsErrorHelper};
use crate::types::RawRow;
use std::io::BufRead;

const QUOTE: u8 = b'"';
const DELIMITER: u8 = b',';
const NEWLINE: u8 = b'\n';

/// Pulls fixed-width rows out of a byte stream.
pub struct CsvRowReader<R> {
    reader: R,
    columns: usize,
    rows_read: u64,
}

impl<R: BufRead> CsvRowReader<R> {
    pub fn new(reader: R, columns: usize) -> Self {
        Self {
            reader,
            columns,
            rows_read: 0,
        }
    }

    pub fn columns(&self) -> usize {
        self.columns
    }

    /// Number of rows returned so far.
    pub fn rows_read(&self) -> u64 {
        self.rows_read
    }

    /// Read the next row.
    ///
    /// Returns `Ok(None)` when the input ends cleanly between rows and a
    /// `Data` error when a row is malformed or truncated.
    pub fn next_row(&mut self) -> Result<Option<RawRow>> {
        if self.columns == 0 || self.peek()?.is_none() {
            return Ok(None);
        }

        let line = self.rows_read + 1;
        let mut row = Vec::with_capacity(self.columns);

        for index in 0..self.columns {
            let value = match self.peek()? {
                Some(QUOTE) => {
                    self.consume(1);
                    Some(self.read_quoted(line)?)
                }
                _ => None,
            };
            row.push(value);

            let expected = if index + 1 == self.columns {
                NEWLINE
            } else {
                DELIMITER
            };
            match self.peek()? {
                Some(b) if b == expected => self.consume(1),
                Some(b) => {
                    return Err(ResultsErrorHelper::data().message(format!(
                        "Row {}: unexpected byte {:?} after field {} of {}",
                        line,
                        b as char,
                        index + 1,
                        self.columns
                    )));
                }
                None => {
                    return Err(ResultsErrorHelper::data().message(format!(
                        "Row {}: input ended after field {} of {}",
                        line,
                        index + 1,
                        self.columns
                    )));
                }
            }
        }

        self.rows_read += 1;
        Ok(Some(row))
    }

    /// Read a quoted field body; the opening quote is already consumed.
    fn read_quoted(&mut self, line: u64) -> Result<String> {
        let mut value = Vec::new();

        loop {
            let buf = self.reader.fill_buf()?;
            if buf.is_empty() {
                return Err(ResultsErrorHelper::data()
                    .message(format!("Row {}: unterminated quoted field", line)));
            }

            match buf.iter().position(|&b| b == QUOTE) {
                Some(pos) => {
                    value.extend_from_slice(&buf[..pos]);
                    self.consume(pos + 1);
                    // A doubled quote is an escaped quote; anything else closes the field.
                    if self.peek()? == Some(QUOTE) {
                        value.push(QUOTE);
                        self.consume(1);
                    } else {
                        break;
                    }
                }
                None => {
                    let len = buf.len();
                    value.extend_from_slice(buf);
                    self.consume(len);
                }
            }
        }

        String::from_utf8(value).map_err(|e| {
            ResultsErrorHelper::data().message(format!("Row {}: field is not valid UTF-8: {}", line, e))
        })
    }

    fn peek(&mut self) -> Result<Option<u8>> {
        Ok(self.reader.fill_buf()?.first().copied())
    }

    fn consume(&mut self, amount: usize) {
        self.reader.consume(amount);
    }
}

/// Encode a row in the same dialect. Used to build fixtures.
#[cfg(test)]
pub(crate) fn encode_row(row: &[Option<&str>]) -> String {
    let mut out = String::new();
    for (i, field) in row.iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        if let Some(value) = field {
            out.push('"');
            out.push_str(&value.replace('"', "\"\""));
            out.push('"');
        }
    }
    out.push('\n');
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use std::io::{BufReader, Cursor};

    fn reader(input: &str, columns: usize) -> CsvRowReader<Cursor<Vec<u8>>> {
        CsvRowReader::new(Cursor::new(input.as_bytes().to_vec()), columns)
    }

    fn owned(row: &[Option<&str>]) -> RawRow {
        row.iter().map(|v| v.map(str::to_string)).collect()
    }

    #[test]
    fn test_round_trip_with_nulls_and_quotes() {
        let rows: Vec<Vec<Option<&str>>> = vec![
            vec![Some("1"), None, Some("plain")],
            vec![Some("say \"hi\""), Some(""), None],
            vec![None, None, None],
            vec![Some("multi\nline, with comma"), Some("\"\""), Some("x")],
        ];
        let input: String = rows.iter().map(|r| encode_row(r)).collect();

        let mut csv = reader(&input, 3);
        for expected in &rows {
            assert_eq!(csv.next_row().unwrap(), Some(owned(expected)));
        }
        assert_eq!(csv.next_row().unwrap(), None);
        assert_eq!(csv.rows_read(), 4);
    }

    #[test]
    fn test_empty_quoted_is_not_null() {
        let mut csv = reader("\"\",\n", 2);
        assert_eq!(
            csv.next_row().unwrap(),
            Some(vec![Some(String::new()), None])
        );
    }

    #[test]
    fn test_short_row_is_data_error() {
        let mut csv = reader("\"1\",\"2\"\n", 3);
        let err = csv.next_row().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Data);
    }

    #[test]
    fn test_long_row_is_data_error() {
        let mut csv = reader("\"1\",\"2\",\"3\"\n", 2);
        assert!(csv.next_row().is_err());
    }

    #[test]
    fn test_unterminated_quote_is_data_error() {
        let mut csv = reader("\"1\",\"never closed\n", 2);
        let err = csv.next_row().unwrap_err();
        assert!(err.message().contains("unterminated"));
    }

    #[test]
    fn test_missing_final_newline_is_data_error() {
        let mut csv = reader("\"1\",\"2\"", 2);
        assert!(csv.next_row().is_err());
    }

    #[test]
    fn test_empty_input_has_no_rows() {
        let mut csv = reader("", 4);
        assert_eq!(csv.next_row().unwrap(), None);
    }

    #[test]
    fn test_small_buffer_splits_quoted_fields() {
        let input = encode_row(&[Some("a fairly long value \"quoted\""), Some("tail")]);
        let buffered = BufReader::with_capacity(3, Cursor::new(input.into_bytes()));
        let mut csv = CsvRowReader::new(buffered, 2);

        assert_eq!(
            csv.next_row().unwrap(),
            Some(owned(&[Some("a fairly long value \"quoted\""), Some("tail")]))
        );
        assert_eq!(csv.next_row().unwrap(), None);
    }
}
