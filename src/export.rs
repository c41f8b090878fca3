//! Result export: JSON, CSV, XLSX. Format is taken from `--format` or
//! inferred from the output path's extension.

use std::path::Path;

use serde::Serialize;

use crate::error::ScanError;
use crate::model::Endpoint;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Json,
    Csv,
    Xlsx,
}

impl ExportFormat {
    pub fn from_extension(path: &Path) -> Option<Self> {
        match path.extension().and_then(|e| e.to_str()) {
            Some("json") => Some(ExportFormat::Json),
            Some("csv") => Some(ExportFormat::Csv),
            Some("xlsx") => Some(ExportFormat::Xlsx),
            _ => None,
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "json" => Some(ExportFormat::Json),
            "csv" => Some(ExportFormat::Csv),
            "xlsx" => Some(ExportFormat::Xlsx),
            _ => None,
        }
    }
}

#[derive(Serialize)]
struct ExportRow<'a> {
    ip: String,
    port: u16,
    first_seen: String,
    last_seen: String,
    total_scans: u64,
    successful_scans: u64,
    availability_pct: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    last_online: Option<&'a str>,
}

fn rows(endpoints: &[Endpoint]) -> Vec<ExportRow<'_>> {
    endpoints
        .iter()
        .map(|e| ExportRow {
            ip: e.key.ip.to_string(),
            port: e.key.port,
            first_seen: e.first_seen.to_rfc3339(),
            last_seen: e.last_seen.to_rfc3339(),
            total_scans: e.total_scans,
            successful_scans: e.successful_scans,
            availability_pct: e.availability_pct,
            last_online: None,
        })
        .collect()
}

pub fn export(endpoints: &[Endpoint], format: ExportFormat, output: &Path) -> Result<(), ScanError> {
    match format {
        ExportFormat::Json => export_json(endpoints, output),
        ExportFormat::Csv => export_csv(endpoints, output),
        ExportFormat::Xlsx => export_xlsx(endpoints, output),
    }
}

fn export_json(endpoints: &[Endpoint], output: &Path) -> Result<(), ScanError> {
    let json = serde_json::to_string_pretty(endpoints)
        .map_err(|e| ScanError::Store(format!("json export failed: {e}")))?;
    std::fs::write(output, json)
        .map_err(|e| ScanError::Store(format!("writing {}: {e}", output.display())))?;
    Ok(())
}

fn export_csv(endpoints: &[Endpoint], output: &Path) -> Result<(), ScanError> {
    let mut writer = csv::Writer::from_path(output)
        .map_err(|e| ScanError::Store(format!("opening {}: {e}", output.display())))?;
    for row in rows(endpoints) {
        writer
            .serialize(&row)
            .map_err(|e| ScanError::Store(format!("csv export failed: {e}")))?;
    }
    writer
        .flush()
        .map_err(|e| ScanError::Store(format!("csv flush failed: {e}")))?;
    Ok(())
}

fn export_xlsx(endpoints: &[Endpoint], output: &Path) -> Result<(), ScanError> {
    let mut workbook = rust_xlsxwriter::Workbook::new();
    let sheet = workbook.add_worksheet();

    let headers = [
        "ip",
        "port",
        "first_seen",
        "last_seen",
        "total_scans",
        "successful_scans",
        "availability_pct",
    ];
    for (col, header) in headers.iter().enumerate() {
        sheet
            .write(0, col as u16, *header)
            .map_err(|e| ScanError::Store(format!("xlsx header write failed: {e}")))?;
    }

    let write_row = |sheet: &mut rust_xlsxwriter::Worksheet, r: u32, row: &ExportRow| -> Result<(), rust_xlsxwriter::XlsxError> {
        sheet.write(r, 0, row.ip.as_str())?;
        sheet.write(r, 1, row.port)?;
        sheet.write(r, 2, row.first_seen.as_str())?;
        sheet.write(r, 3, row.last_seen.as_str())?;
        sheet.write(r, 4, row.total_scans)?;
        sheet.write(r, 5, row.successful_scans)?;
        sheet.write(r, 6, row.availability_pct)?;
        Ok(())
    };
    for (i, row) in rows(endpoints).iter().enumerate() {
        let r = (i + 1) as u32;
        write_row(sheet, r, row)
            .map_err(|e| ScanError::Store(format!("xlsx row write failed: {e}")))?;
    }

    workbook
        .save(output)
        .map_err(|e| ScanError::Store(format!("saving {}: {e}", output.display())))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_from_extension() {
        assert_eq!(
            ExportFormat::from_extension(Path::new("out.json")),
            Some(ExportFormat::Json)
        );
        assert_eq!(
            ExportFormat::from_extension(Path::new("out.xlsx")),
            Some(ExportFormat::Xlsx)
        );
        assert_eq!(ExportFormat::from_extension(Path::new("out")), None);
    }

    #[test]
    fn format_parse_is_case_insensitive() {
        assert_eq!(ExportFormat::parse("CSV"), Some(ExportFormat::Csv));
    }

    #[test]
    fn json_export_writes_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.json");
        export(&[], ExportFormat::Json, &path).unwrap();
        assert!(path.exists());
    }

    #[test]
    fn csv_export_writes_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.csv");
        export(&[], ExportFormat::Csv, &path).unwrap();
        assert!(path.exists());
    }
}
