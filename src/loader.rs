use calamine::{Data, Reader, Xlsx, open_workbook_from_rs};
use csv::ReaderBuilder;
use std::io::Cursor;
use std::path::Path;
use tracing::debug;

use crate::error::LoadError;
use crate::table::{Dataset, Value, is_missing_token, parse_datetime};

/// Extensions accepted by the upload control.
pub const ACCEPTED_EXTENSIONS: [&str; 2] = [".csv", ".xlsx"];

const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

/// Declared format of an uploaded file, taken from its name.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FileFormat {
    Csv,
    Xlsx,
}

impl FileFormat {
    /// Infer the format from a file name's extension (case-insensitive).
    ///
    /// # Examples
    /// ```
    /// use tablewalk::loader::FileFormat;
    ///
    /// assert_eq!(FileFormat::from_name("Sales.XLSX").unwrap(), FileFormat::Xlsx);
    /// assert!(FileFormat::from_name("notes.txt").is_err());
    /// ```
    pub fn from_name(name: &str) -> Result<Self, LoadError> {
        let extension = Path::new(name)
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.to_lowercase());

        match extension.as_deref() {
            Some("csv") => Ok(FileFormat::Csv),
            Some("xlsx") => Ok(FileFormat::Xlsx),
            Some(ext) => Err(LoadError::UnsupportedFormat(format!(".{}", ext))),
            None => Err(LoadError::UnsupportedFormat(format!("'{}' has no extension", name))),
        }
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            FileFormat::Csv => "text/csv",
            FileFormat::Xlsx => "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
        }
    }
}

/// A file handed over by the upload control.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UploadedFile {
    pub name: String,
    pub content_type: Option<String>,
    pub bytes: Vec<u8>,
}

impl UploadedFile {
    pub fn new(name: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            name: name.into(),
            content_type: None,
            bytes: bytes.into(),
        }
    }

    pub fn format(&self) -> Result<FileFormat, LoadError> {
        FileFormat::from_name(&self.name)
    }

    /// The declared content type, or one derived from the extension.
    pub fn effective_content_type(&self) -> String {
        if let Some(ct) = self.content_type.as_deref().filter(|ct| !ct.is_empty()) {
            return ct.to_string();
        }
        self.format()
            .map(|f| f.content_type())
            .unwrap_or("application/octet-stream")
            .to_string()
    }
}

/// Decode file contents into a dataset.
///
/// This is the single entry point the flow controller uses; it dispatches on
/// the declared format and never touches session state.
///
/// # Arguments
/// * `bytes` - Raw file contents
/// * `format` - Format declared by the file name
///
/// # Returns
/// * `Result<Dataset, LoadError>` - The decoded table or why it could not be read
pub fn load(bytes: &[u8], format: FileFormat) -> Result<Dataset, LoadError> {
    let dataset = match format {
        FileFormat::Csv => load_csv(bytes)?,
        FileFormat::Xlsx => load_xlsx(bytes)?,
    };
    debug!(
        ?format,
        rows = dataset.height(),
        columns = dataset.width(),
        "decoded dataset"
    );
    Ok(dataset)
}

/// Read a file from disk, inferring its format from the extension.
///
/// # Examples
/// ```no_run
/// use tablewalk::loader::load_path;
///
/// match load_path("data.csv") {
///     Ok(ds) => println!("loaded {} rows", ds.height()),
///     Err(e) => eprintln!("Error loading file: {}", e),
/// }
/// ```
pub fn load_path(path: impl AsRef<Path>) -> Result<Dataset, LoadError> {
    let path = path.as_ref();
    let format = FileFormat::from_name(&path.to_string_lossy())?;
    let bytes = std::fs::read(path)?;
    load(&bytes, format)
}

/// Decode comma-separated text with a header row.
///
/// Short rows are padded with missing values. A row with more fields than
/// the header is rejected, as is anything that is not UTF-8.
pub fn load_csv(bytes: &[u8]) -> Result<Dataset, LoadError> {
    let bytes = bytes.strip_prefix(UTF8_BOM).unwrap_or(bytes);

    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(bytes);

    let headers: Vec<String> = reader
        .headers()
        .map_err(csv_error)?
        .iter()
        .map(String::from)
        .collect();

    if headers.is_empty() {
        return Err(LoadError::Empty);
    }
    let width = headers.len();

    let mut rows = Vec::new();
    for result in reader.records() {
        let record = result.map_err(csv_error)?;
        if record.len() > width {
            let line = record.position().map(|p| p.line()).unwrap_or(0);
            return Err(LoadError::Malformed {
                line,
                message: format!("expected {} fields, saw {}", width, record.len()),
            });
        }
        let mut row: Vec<String> = record.iter().map(String::from).collect();
        row.resize(width, String::new());
        rows.push(row);
    }

    Ok(Dataset::from_text_rows(headers, rows)?)
}

fn csv_error(err: csv::Error) -> LoadError {
    match err.kind() {
        csv::ErrorKind::Utf8 { .. } => LoadError::Encoding(err.to_string()),
        _ => LoadError::Csv(err),
    }
}

/// Decode the first worksheet of an Excel workbook. The first row of the
/// used range is the header.
pub fn load_xlsx(bytes: &[u8]) -> Result<Dataset, LoadError> {
    let mut workbook = open_workbook_from_rs::<Xlsx<_>, _>(Cursor::new(bytes))
        .map_err(|e| LoadError::Workbook(e.to_string()))?;

    let sheet_name = workbook
        .sheet_names()
        .first()
        .cloned()
        .ok_or_else(|| LoadError::Workbook("no sheets found in workbook".to_string()))?;

    let range = workbook
        .worksheet_range(&sheet_name)
        .map_err(|e| LoadError::Workbook(e.to_string()))?;

    let mut rows = range.rows();
    let headers: Vec<String> = match rows.next() {
        Some(header_row) => header_row.iter().map(header_text).collect(),
        None => return Err(LoadError::Empty),
    };
    if headers.is_empty() {
        return Err(LoadError::Empty);
    }

    let body: Vec<Vec<Value>> = rows.map(|row| row.iter().map(cell_value).collect()).collect();

    Ok(Dataset::from_cell_rows(headers, body)?)
}

fn header_text(cell: &Data) -> String {
    match cell {
        Data::String(s) => s.clone(),
        Data::Empty | Data::Error(_) => String::new(),
        other => cell_value(other).to_string(),
    }
}

fn cell_value(cell: &Data) -> Value {
    match cell {
        Data::Int(i) => Value::Int(*i),
        Data::Float(f) => Value::Float(*f),
        Data::Bool(b) => Value::Bool(*b),
        Data::String(s) if is_missing_token(s) => Value::Missing,
        Data::String(s) => Value::Text(s.clone()),
        Data::DateTime(dt) => match dt.as_datetime() {
            Some(ndt) => Value::Datetime(ndt),
            None => Value::Float(dt.as_f64()),
        },
        Data::DateTimeIso(s) => match parse_datetime(s) {
            Some(ndt) => Value::Datetime(ndt),
            None => Value::Text(s.clone()),
        },
        Data::DurationIso(s) => Value::Text(s.clone()),
        Data::Error(_) | Data::Empty => Value::Missing,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::ColumnKind;

    fn xlsx_fixture() -> Vec<u8> {
        use rust_xlsxwriter::Workbook;

        let mut workbook = Workbook::new();
        let sheet = workbook.add_worksheet();
        sheet.write_string(0, 0, "name").unwrap();
        sheet.write_string(0, 1, "score").unwrap();
        sheet.write_string(1, 0, "ada").unwrap();
        sheet.write_number(1, 1, 3.0).unwrap();
        sheet.write_string(2, 0, "grace").unwrap();
        sheet.write_number(2, 1, 4.5).unwrap();
        workbook.save_to_buffer().unwrap()
    }

    #[test]
    fn format_comes_from_extension() {
        assert_eq!(FileFormat::from_name("a.csv").unwrap(), FileFormat::Csv);
        assert_eq!(FileFormat::from_name("dir/b.XLSX").unwrap(), FileFormat::Xlsx);
        assert!(matches!(
            FileFormat::from_name("c.xls"),
            Err(LoadError::UnsupportedFormat(_))
        ));
        assert!(matches!(
            FileFormat::from_name("README"),
            Err(LoadError::UnsupportedFormat(_))
        ));
    }

    #[test]
    fn csv_with_header_and_types() {
        let ds = load_csv(b"city,pop,coastal\nOslo,709037,true\nBergen,,false\n").unwrap();
        assert_eq!(ds.column_names(), vec!["city", "pop", "coastal"]);
        assert_eq!(ds.height(), 2);
        assert_eq!(ds.columns()[1].kind, ColumnKind::Integer);
        assert_eq!(ds.columns()[2].kind, ColumnKind::Boolean);
        assert_eq!(ds.rows()[1][1], Value::Missing);
    }

    #[test]
    fn csv_strips_bom_and_pads_short_rows() {
        let ds = load_csv(b"\xEF\xBB\xBFa,b\n1\n2,3\n").unwrap();
        assert_eq!(ds.column_names(), vec!["a", "b"]);
        assert_eq!(ds.rows()[0], vec![Value::Int(1), Value::Missing]);
    }

    #[test]
    fn csv_with_extra_fields_is_malformed() {
        let err = load_csv(b"a,b\n1,2\n3,4,5\n").unwrap_err();
        assert!(matches!(err, LoadError::Malformed { line: 3, .. }), "{:?}", err);
    }

    #[test]
    fn empty_csv_is_rejected() {
        assert!(matches!(load_csv(b""), Err(LoadError::Empty)));
    }

    #[test]
    fn binary_csv_is_an_encoding_error() {
        let err = load_csv(&[0x61, 0x2c, 0x62, 0x0a, 0xff, 0xfe, 0x2c, 0x01]).unwrap_err();
        assert!(matches!(err, LoadError::Encoding(_)), "{:?}", err);
    }

    #[test]
    fn xlsx_first_sheet_is_loaded() {
        let ds = load(&xlsx_fixture(), FileFormat::Xlsx).unwrap();
        assert_eq!(ds.column_names(), vec!["name", "score"]);
        assert_eq!(ds.height(), 2);
        assert_eq!(ds.columns()[1].kind, ColumnKind::Float);
        assert_eq!(ds.rows()[1][1], Value::Float(4.5));
    }

    #[test]
    fn xlsx_date_cells_become_datetimes() {
        use rust_xlsxwriter::{ExcelDateTime, Format, Workbook};

        let mut workbook = Workbook::new();
        let date_format = Format::new().set_num_format("yyyy-mm-dd");
        let sheet = workbook.add_worksheet();
        sheet.write_string(0, 0, "shipped").unwrap();
        sheet
            .write_datetime_with_format(1, 0, &ExcelDateTime::from_ymd(2024, 5, 1).unwrap(), &date_format)
            .unwrap();
        sheet
            .write_datetime_with_format(2, 0, &ExcelDateTime::from_ymd(2024, 5, 2).unwrap(), &date_format)
            .unwrap();
        let bytes = workbook.save_to_buffer().unwrap();

        let ds = load(&bytes, FileFormat::Xlsx).unwrap();
        assert_eq!(ds.columns()[0].kind, ColumnKind::Datetime);
        let first = chrono::NaiveDate::from_ymd_opt(2024, 5, 1)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap();
        assert_eq!(ds.rows()[0][0], Value::Datetime(first));
    }

    #[test]
    fn blank_worksheet_is_empty() {
        let mut workbook = rust_xlsxwriter::Workbook::new();
        workbook.add_worksheet();
        let bytes = workbook.save_to_buffer().unwrap();

        assert!(matches!(load(&bytes, FileFormat::Xlsx), Err(LoadError::Empty)));
    }

    #[test]
    fn garbage_xlsx_is_a_workbook_error() {
        let err = load(b"this is not a zip archive", FileFormat::Xlsx).unwrap_err();
        assert!(matches!(err, LoadError::Workbook(_)), "{:?}", err);
    }

    #[test]
    fn load_path_reads_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.csv");
        std::fs::write(&path, "x\n1\n2\n3\n").unwrap();
        assert_eq!(load_path(&path).unwrap().height(), 3);
    }
}
