//! Excel workbook reading via calamine.
//!
//! The first sheet is the dataset; its first row supplies the headers. Cells
//! render to the same string space CSV fields occupy, so classification and
//! normalization treat both formats identically. Date cells render as
//! `YYYY-MM-DD HH:MM:SS`, which the shared date parsing chain accepts.

use std::path::Path;

use calamine::{Data, Reader, open_workbook_auto};

use crate::{
    error::{MetricsError, Result},
    ingest::ParsedFile,
    normalize::RawRow,
};

pub fn read_workbook(path: &Path) -> Result<ParsedFile> {
    let display = path.display().to_string();
    let mut workbook = open_workbook_auto(path)
        .map_err(|err| MetricsError::parse(display.clone(), err.to_string()))?;
    let sheet = workbook
        .sheet_names()
        .first()
        .cloned()
        .ok_or_else(|| MetricsError::parse(display.clone(), "workbook has no sheets"))?;
    let range = workbook
        .worksheet_range(&sheet)
        .map_err(|err| MetricsError::parse(display, err.to_string()))?;

    let mut rows_iter = range.rows();
    let headers: Vec<String> = match rows_iter.next() {
        Some(row) => row.iter().map(cell_to_string).collect(),
        None => Vec::new(),
    };

    let rows: Vec<RawRow> = rows_iter
        .map(|row| {
            headers
                .iter()
                .enumerate()
                .map(|(idx, name)| {
                    let value = row.get(idx).map(cell_to_string).unwrap_or_default();
                    (name.clone(), value)
                })
                .collect()
        })
        .collect();

    Ok(ParsedFile { headers, rows })
}

fn cell_to_string(cell: &Data) -> String {
    match cell {
        Data::Empty => String::new(),
        Data::String(s) => s.clone(),
        Data::Int(i) => i.to_string(),
        Data::Float(f) => {
            if f.fract() == 0.0 {
                format!("{:.0}", f)
            } else {
                f.to_string()
            }
        }
        Data::Bool(b) => b.to_string(),
        Data::DateTime(serial) => serial
            .as_datetime()
            .map(|dt| dt.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_default(),
        Data::DateTimeIso(s) | Data::DurationIso(s) => s.clone(),
        // Formula errors normalize like empty cells rather than poisoning
        // the column sample with sentinel text.
        Data::Error(_) => String::new(),
    }
}
