//! Authoritative employee workbook.
//!
//! Reading tolerates whatever headers HR used (`Emp ID`, `Employee Code`,
//! `Mobile No.`, ...): headers are lowercased and stripped of everything but
//! ASCII letters and digits, then matched against alias lists. Writing always
//! produces a single `Employees` sheet with the columns `empid`, `name`,
//! `mobileNo`.

use crate::employee::{normalize_value, Employee};
use calamine::{open_workbook_auto, Data, Reader};
use slipbot_common::{Error, Result};
use std::collections::HashMap;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use zip::write::SimpleFileOptions;
use zip::ZipWriter;

const ID_ALIASES: &[&str] = &["empid", "employeeid", "employeecode", "empcode", "id", "code"];
const NAME_ALIASES: &[&str] = &["name", "employeename", "empname", "fullname"];
const MOBILE_ALIASES: &[&str] = &[
    "mobileno",
    "mobile",
    "mobilenumber",
    "phone",
    "phoneno",
    "phonenumber",
    "contact",
    "contactno",
    "contactnumber",
];

pub const SHEET_NAME: &str = "Employees";
const HEADER: [&str; 3] = ["empid", "name", "mobileNo"];

/// Read/write contract of the system of record.
///
/// Implementations are blocking; async callers run them on the blocking pool.
pub trait AuthoritativeStore: Send + Sync {
    /// Where the store lives, for logs and admin responses.
    fn location(&self) -> &Path;

    /// All rows, or `None` when the store does not exist.
    fn read(&self) -> Result<Option<Vec<Employee>>>;

    /// Replace the whole store with `employees`, in the given order.
    fn write(&self, employees: &[Employee]) -> Result<()>;
}

/// xlsx-backed authoritative store.
#[derive(Debug, Clone)]
pub struct WorkbookStore {
    path: PathBuf,
}

impl WorkbookStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl AuthoritativeStore for WorkbookStore {
    fn location(&self) -> &Path {
        &self.path
    }

    fn read(&self) -> Result<Option<Vec<Employee>>> {
        if !self.path.exists() {
            return Ok(None);
        }

        let mut workbook = open_workbook_auto(&self.path).map_err(|e| {
            Error::Storage(format!("cannot open workbook {}: {e}", self.path.display()))
        })?;

        let Some(sheet_name) = workbook.sheet_names().first().cloned() else {
            tracing::warn!(path = %self.path.display(), "employee workbook does not contain any sheets");
            return Ok(Some(Vec::new()));
        };

        let range = workbook.worksheet_range(&sheet_name).map_err(|e| {
            Error::Storage(format!("cannot read sheet {sheet_name}: {e}"))
        })?;

        let mut rows = range.rows();
        let Some(header) = rows.next() else {
            return Ok(Some(Vec::new()));
        };

        let columns = ColumnMap::from_header(header);
        if columns.id.is_none() {
            tracing::warn!(sheet = %sheet_name, "employee workbook has no recognizable id column");
        }

        let mut employees = Vec::new();
        for (offset, row) in rows.enumerate() {
            let Some(id) = columns.value(row, columns.id) else {
                tracing::warn!(row = offset + 2, "skipping row without empid");
                continue;
            };

            employees.push(Employee {
                id,
                name: columns.value(row, columns.name),
                mobile: columns.value(row, columns.mobile),
            });
        }

        tracing::info!(
            total_employees = employees.len(),
            path = %self.path.display(),
            "employee workbook loaded"
        );
        Ok(Some(employees))
    }

    fn write(&self, employees: &[Employee]) -> Result<()> {
        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir)?;
        }

        let tmp = self.path.with_extension("xlsx.tmp");
        write_xlsx(&tmp, employees)?;
        std::fs::rename(&tmp, &self.path)?;

        tracing::info!(
            count = employees.len(),
            path = %self.path.display(),
            "employee workbook saved"
        );
        Ok(())
    }
}

/// Column positions resolved from a header row.
#[derive(Debug, Default)]
struct ColumnMap {
    id: Option<usize>,
    name: Option<usize>,
    mobile: Option<usize>,
}

impl ColumnMap {
    fn from_header(header: &[Data]) -> Self {
        let normalized: HashMap<String, usize> = header
            .iter()
            .enumerate()
            .rev()
            .map(|(idx, cell)| (normalize_header(&cell_to_string(cell)), idx))
            .collect();

        let find = |aliases: &[&str]| aliases.iter().find_map(|a| normalized.get(*a).copied());

        Self {
            id: find(ID_ALIASES),
            name: find(NAME_ALIASES),
            mobile: find(MOBILE_ALIASES),
        }
    }

    fn value(&self, row: &[Data], column: Option<usize>) -> Option<String> {
        column
            .and_then(|idx| row.get(idx))
            .and_then(|cell| normalize_value(&cell_to_string(cell)))
    }
}

/// Lowercase and keep only ASCII letters and digits.
pub fn normalize_header(raw: &str) -> String {
    raw.chars()
        .filter(char::is_ascii_alphanumeric)
        .map(|c| c.to_ascii_lowercase())
        .collect()
}

fn cell_to_string(cell: &Data) -> String {
    match cell {
        Data::Empty => String::new(),
        Data::String(s) => s.clone(),
        Data::Int(n) => n.to_string(),
        // Mobiles typed into Excel come back as floats
        Data::Float(f) if f.fract() == 0.0 && f.abs() < 1e15 => format!("{}", *f as i64),
        Data::Float(f) => format!("{}", f),
        Data::Bool(b) => b.to_string(),
        Data::Error(_) => String::new(),
        Data::DateTime(dt) => format!("{}", dt),
        Data::DateTimeIso(s) => s.clone(),
        Data::DurationIso(s) => s.clone(),
    }
}

// ============================================================================
// xlsx writer
// ============================================================================

const CONTENT_TYPES_XML: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Types xmlns="http://schemas.openxmlformats.org/package/2006/content-types"><Default Extension="rels" ContentType="application/vnd.openxmlformats-package.relationships+xml"/><Default Extension="xml" ContentType="application/xml"/><Override PartName="/xl/workbook.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.sheet.main+xml"/><Override PartName="/xl/worksheets/sheet1.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.worksheet+xml"/></Types>"#;

const ROOT_RELS_XML: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships"><Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/officeDocument" Target="xl/workbook.xml"/></Relationships>"#;

const WORKBOOK_RELS_XML: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships"><Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/worksheet" Target="worksheets/sheet1.xml"/></Relationships>"#;

fn workbook_xml() -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<workbook xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main" xmlns:r="http://schemas.openxmlformats.org/officeDocument/2006/relationships"><sheets><sheet name="{SHEET_NAME}" sheetId="1" r:id="rId1"/></sheets></workbook>"#
    )
}

fn sheet_xml(employees: &[Employee]) -> String {
    let mut xml = String::from(
        r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<worksheet xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main"><sheetData>"#,
    );

    push_row(&mut xml, 1, HEADER.iter().copied());
    for (idx, employee) in employees.iter().enumerate() {
        push_row(
            &mut xml,
            idx + 2,
            [
                employee.id.as_str(),
                employee.name.as_deref().unwrap_or(""),
                employee.mobile.as_deref().unwrap_or(""),
            ]
            .into_iter(),
        );
    }

    xml.push_str("</sheetData></worksheet>");
    xml
}

fn push_row<'a>(xml: &mut String, row: usize, values: impl Iterator<Item = &'a str>) {
    xml.push_str(&format!(r#"<row r="{row}">"#));
    for (column, value) in ["A", "B", "C"].iter().zip(values) {
        // Empty cells are left out; they read back as absent
        if value.is_empty() {
            continue;
        }
        xml.push_str(&format!(
            r#"<c r="{column}{row}" t="inlineStr"><is><t>{}</t></is></c>"#,
            html_escape::encode_text(value)
        ));
    }
    xml.push_str("</row>");
}

fn write_xlsx(path: &Path, employees: &[Employee]) -> Result<()> {
    let file = File::create(path)?;
    let mut zip = ZipWriter::new(file);
    let options = SimpleFileOptions::default().compression_method(zip::CompressionMethod::Deflated);

    let parts: [(&str, String); 5] = [
        ("[Content_Types].xml", CONTENT_TYPES_XML.to_string()),
        ("_rels/.rels", ROOT_RELS_XML.to_string()),
        ("xl/workbook.xml", workbook_xml()),
        ("xl/_rels/workbook.xml.rels", WORKBOOK_RELS_XML.to_string()),
        ("xl/worksheets/sheet1.xml", sheet_xml(employees)),
    ];

    for (name, body) in parts {
        zip.start_file(name, options)
            .map_err(|e| Error::Storage(format!("xlsx part {name}: {e}")))?;
        zip.write_all(body.as_bytes())?;
    }

    zip.finish()
        .map_err(|e| Error::Storage(format!("finishing xlsx {}: {e}", path.display())))?;
    Ok(())
}
