//! I/O utilities for reading registry exports.
//!
//! Registry files are semicolon-separated, quoted, headerless, and encoded in
//! a single-byte legacy code page. Everything that opens a source file goes
//! through this module:
//!
//! - **Encoding**: labels resolve through `encoding_rs`, defaulting to
//!   `windows-1252` (a superset of the Latin-1 the registry uses). The byte
//!   stream is transcoded to UTF-8 by `encoding_rs_io` before parsing.
//! - **Reader construction**: `flexible` is on so the merge layer can report
//!   a wrong column count per row instead of failing the whole file.

use std::{
    fs::File,
    io::{BufReader, Read},
    path::Path,
};

use anyhow::{Context, Result, anyhow};
use encoding_rs::{Encoding, WINDOWS_1252};
use encoding_rs_io::DecodeReaderBytesBuilder;

pub const DEFAULT_DELIMITER: u8 = b';';
pub const DEFAULT_ENCODING_LABEL: &str = "windows-1252";

pub fn resolve_encoding(label: Option<&str>) -> Result<&'static Encoding> {
    match label {
        Some(value) => Encoding::for_label(value.trim().as_bytes())
            .ok_or_else(|| anyhow!("Unknown encoding '{value}'")),
        None => Ok(WINDOWS_1252),
    }
}

pub fn open_csv_reader<R>(reader: R, delimiter: u8) -> csv::Reader<R>
where
    R: Read,
{
    let mut builder = csv::ReaderBuilder::new();
    builder
        .has_headers(false)
        .delimiter(delimiter)
        .double_quote(true)
        .flexible(true);
    builder.from_reader(reader)
}

/// Wraps `reader` so the parser sees UTF-8 regardless of the source encoding.
pub fn decoding_reader<R>(reader: R, encoding: &'static Encoding) -> Box<dyn Read + Send>
where
    R: Read + Send + 'static,
{
    Box::new(
        DecodeReaderBytesBuilder::new()
            .encoding(Some(encoding))
            .build(reader),
    )
}

pub fn open_registry_reader(
    path: &Path,
    delimiter: u8,
    encoding: &'static Encoding,
) -> Result<csv::Reader<Box<dyn Read + Send>>> {
    let file = File::open(path).with_context(|| format!("Opening input file {path:?}"))?;
    Ok(open_csv_reader(
        decoding_reader(BufReader::new(file), encoding),
        delimiter,
    ))
}

pub fn printable_delimiter(delimiter: u8) -> String {
    match delimiter {
        b'\t' => "\\t".to_string(),
        other => (other as char).to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_encoding_is_windows_1252() {
        assert_eq!(resolve_encoding(None).unwrap(), WINDOWS_1252);
        assert_eq!(resolve_encoding(Some("latin1")).unwrap(), WINDOWS_1252);
        assert!(resolve_encoding(Some("klingon")).is_err());
    }

    #[test]
    fn latin1_bytes_are_decoded_before_parsing() {
        let bytes: &[u8] = b"\"12345678\";\"S\xc3O JO\xc3O LTDA\"\n";
        let reader = decoding_reader(bytes, WINDOWS_1252);
        let mut csv = open_csv_reader(reader, b';');
        let record = csv.records().next().unwrap().unwrap();
        assert_eq!(&record[1], "SÃO JOÃO LTDA");
    }
}
