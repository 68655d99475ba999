use super::{Codec, Layout, RawTable};
use crate::error::EngineError;
use crate::frame::Frame;
use crate::options::Options;
use serde_json::Value;
use std::path::Path;

/// CSV via the `csv` crate.
///
/// Options: `header` (default false), `sep`/`delimiter` (default `,`), `quote`
/// (default `"`), `nullValue` (default empty string).
#[derive(Debug, Clone, Copy, Default)]
pub struct CsvCodec;

struct CsvOptions<'a> {
    header: bool,
    delimiter: u8,
    quote: u8,
    null_value: &'a str,
}

impl<'a> CsvOptions<'a> {
    fn parse(options: &'a Options) -> Result<Self, EngineError> {
        Ok(Self {
            header: options.get_bool("header")?.unwrap_or(false),
            delimiter: options.get_byte(&["sep", "delimiter"])?.unwrap_or(b','),
            quote: options.get_byte(&["quote"])?.unwrap_or(b'"'),
            null_value: options.get("nullValue").unwrap_or(""),
        })
    }
}

impl Codec for CsvCodec {
    fn decode(&self, text: &str, options: &Options, path: &Path) -> Result<RawTable, EngineError> {
        let opts = CsvOptions::parse(options)?;
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .delimiter(opts.delimiter)
            .quote(opts.quote)
            .from_reader(text.as_bytes());

        let mut columns: Option<Vec<String>> = None;
        let mut rows = Vec::new();
        for record in reader.records() {
            let record = record.map_err(|e| EngineError::Decode {
                path: path.to_path_buf(),
                message: e.to_string(),
            })?;
            if opts.header && columns.is_none() {
                columns = Some(header_columns(&record));
                continue;
            }
            rows.push(
                record
                    .iter()
                    .map(|field| {
                        if field == opts.null_value {
                            Value::Null
                        } else {
                            Value::String(field.to_string())
                        }
                    })
                    .collect::<Vec<_>>(),
            );
        }

        let columns = columns.unwrap_or_else(|| {
            let width = rows.iter().map(Vec::len).max().unwrap_or(0);
            (0..width).map(|i| format!("_c{i}")).collect()
        });
        Ok(RawTable {
            columns,
            rows,
            layout: Layout::Positional,
            textual: true,
        })
    }

    fn encode(&self, frame: &Frame, options: &Options) -> Result<String, EngineError> {
        let opts = CsvOptions::parse(options)?;
        let mut writer = csv::WriterBuilder::new()
            .delimiter(opts.delimiter)
            .quote(opts.quote)
            .from_writer(Vec::new());
        let encode_err = |e: csv::Error| EngineError::Encode {
            message: e.to_string(),
        };

        if opts.header {
            writer
                .write_record(frame.column_names())
                .map_err(encode_err)?;
        }
        for row in frame.rows() {
            writer
                .write_record(row.iter().map(|v| match v {
                    Value::Null => opts.null_value.to_string(),
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                }))
                .map_err(encode_err)?;
        }

        let bytes = writer.into_inner().map_err(|e| EngineError::Encode {
            message: e.to_string(),
        })?;
        String::from_utf8(bytes).map_err(|e| EngineError::Encode {
            message: e.to_string(),
        })
    }
}

/// Column names from a header record. Blank names become `_c<i>`; names that
/// repeat (case-insensitively) all get their position appended.
fn header_columns(record: &csv::StringRecord) -> Vec<String> {
    let names: Vec<String> = record
        .iter()
        .enumerate()
        .map(|(i, c)| match c.trim() {
            "" => format!("_c{i}"),
            name => name.to_string(),
        })
        .collect();
    names
        .iter()
        .enumerate()
        .map(|(i, name)| {
            let repeats = names
                .iter()
                .filter(|other| other.eq_ignore_ascii_case(name))
                .count();
            if repeats > 1 {
                format!("{name}{i}")
            } else {
                name.clone()
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::format::materialize;
    use crate::schema::{DataType, Schema};
    use serde_json::json;
    use std::path::PathBuf;

    #[test]
    fn test_decode_with_header_and_nulls() {
        let text = "id,name,city\n1,Alice,\n2,\"Smith, Bob\",Rome\n";
        let options = Options::new().with("header", "true");
        let table = CsvCodec.decode(text, &options, Path::new("x.csv")).unwrap();
        assert_eq!(table.columns, vec!["id", "name", "city"]);
        assert_eq!(table.rows[0], vec![json!("1"), json!("Alice"), Value::Null]);
        assert_eq!(table.rows[1][1], json!("Smith, Bob"));
    }

    #[test]
    fn test_repeated_header_names_keep_every_column() {
        let options = Options::new().with("header", "true");
        let table = CsvCodec
            .decode("a,A,b,\n1,2,3,4\n", &options, Path::new("x.csv"))
            .unwrap();
        assert_eq!(table.columns, vec!["a0", "A1", "b", "_c3"]);

        let frame = materialize(vec![(PathBuf::from("x.csv"), table)], None, &options).unwrap();
        assert_eq!(frame.column_names(), vec!["a0", "A1", "b", "_c3"]);
        assert_eq!(
            frame.rows()[0],
            vec![json!("1"), json!("2"), json!("3"), json!("4")]
        );
    }

    #[test]
    fn test_decode_without_header_and_custom_separator() {
        let options = Options::new().with("sep", ";").with("nullValue", "NA");
        let table = CsvCodec
            .decode("a;NA\nb;c;d\n", &options, Path::new("x.csv"))
            .unwrap();
        assert_eq!(table.columns, vec!["_c0", "_c1", "_c2"]);
        assert_eq!(table.rows[0], vec![json!("a"), Value::Null]);
        assert_eq!(table.rows[1].len(), 3);
    }

    #[test]
    fn test_encode_quotes_and_header() {
        let frame = Frame::new(
            Schema::of(&[("id", DataType::Integer), ("name", DataType::String)]),
            vec![
                vec![json!(1), json!("Smith, Bob")],
                vec![json!(2), Value::Null],
            ],
        )
        .unwrap();
        let text = CsvCodec
            .encode(&frame, &Options::new().with("header", "true"))
            .unwrap();
        assert_eq!(text, "id,name\n1,\"Smith, Bob\"\n2,\n");
    }
}
