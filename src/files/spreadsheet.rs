use crate::config::ColumnNames;
use crate::error::{RateioError, Result};
use crate::models::normalize_document_number;
use crate::service::currency::RawAmount;
use calamine::{open_workbook_auto, Data, Reader};
use std::path::Path;

/// 单元格值 (只保留需要的类型)
#[derive(Debug, Clone, PartialEq)]
pub enum CellValue {
    Empty,
    Int(i64),
    Float(f64),
    Text(String),
}

impl CellValue {
    pub fn as_amount(&self) -> RawAmount<'_> {
        match self {
            CellValue::Empty => RawAmount::Empty,
            CellValue::Int(i) => RawAmount::Int(*i),
            CellValue::Float(f) => RawAmount::Float(*f),
            CellValue::Text(s) => RawAmount::Text(s),
        }
    }

    pub fn as_text(&self) -> String {
        match self {
            CellValue::Empty => String::new(),
            CellValue::Int(i) => i.to_string(),
            CellValue::Float(f) => f.to_string(),
            CellValue::Text(s) => s.clone(),
        }
    }

    /// 1001.0 / "0001001" -> "1001"
    pub fn as_document_number(&self) -> Option<String> {
        match self {
            CellValue::Empty => None,
            CellValue::Int(i) if *i >= 0 => Some(i.to_string()),
            CellValue::Int(_) => None,
            CellValue::Float(f) if f.is_finite() && *f >= 0.0 && f.fract() == 0.0 => {
                Some(format!("{:.0}", f))
            }
            CellValue::Float(_) => None,
            CellValue::Text(s) => normalize_document_number(s),
        }
    }
}

impl From<&Data> for CellValue {
    fn from(cell: &Data) -> Self {
        match cell {
            Data::Empty => CellValue::Empty,
            Data::Int(i) => CellValue::Int(*i),
            Data::Float(f) => CellValue::Float(*f),
            Data::String(s) => CellValue::Text(s.clone()),
            other => CellValue::Text(other.to_string()),
        }
    }
}

/// 电子表格中的一行 (已定位到三列)
#[derive(Debug, Clone, PartialEq)]
pub struct SheetRow {
    /// 1 起始, 含表头
    pub line: usize,
    pub document_number: String,
    pub amount: CellValue,
    pub operation: String,
}

fn header_key(s: &str) -> String {
    s.trim_start_matches('\u{feff}')
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .replace('º', "°")
        .to_uppercase()
}

struct ColumnMap {
    document_number: usize,
    amount: Option<usize>,
    operation: Option<usize>,
}

impl ColumnMap {
    fn resolve(header: &[String], names: &ColumnNames) -> Result<Self> {
        let find = |name: &str| {
            let wanted = header_key(name);
            header.iter().position(|h| header_key(h) == wanted)
        };

        let document_number = find(&names.document_number)
            .ok_or_else(|| RateioError::MissingColumn(names.document_number.clone()))?;
        let amount = find(&names.amount);
        if amount.is_none() {
            tracing::warn!("Spreadsheet has no '{}' column, every row will be discarded", names.amount);
        }
        let operation = find(&names.operation);
        if operation.is_none() {
            tracing::warn!("Spreadsheet has no '{}' column, every row will be discarded", names.operation);
        }

        Ok(Self {
            document_number,
            amount,
            operation,
        })
    }

    fn row(&self, line: usize, cells: &[CellValue]) -> Option<SheetRow> {
        let document_number = cells.get(self.document_number)?.as_document_number()?;
        let cell = |idx: Option<usize>| {
            idx.and_then(|i| cells.get(i))
                .cloned()
                .unwrap_or(CellValue::Empty)
        };
        Some(SheetRow {
            line,
            document_number,
            amount: cell(self.amount),
            operation: cell(self.operation).as_text(),
        })
    }
}

/// 读取电子表格; 打不开或缺少单据编号列时整个运行失败
pub fn load_rows(path: &Path, names: &ColumnNames) -> Result<Vec<SheetRow>> {
    if !path.is_file() {
        return Err(RateioError::SpreadsheetMissing(path.to_path_buf()));
    }

    let is_csv = path
        .extension()
        .map(|e| e.eq_ignore_ascii_case("csv"))
        .unwrap_or(false);

    let table = if is_csv {
        read_csv(path)?
    } else {
        read_workbook(path)?
    };

    let mut lines = table.into_iter();
    let header: Vec<String> = lines
        .next()
        .map(|h| h.iter().map(CellValue::as_text).collect())
        .ok_or_else(|| RateioError::MissingColumn(names.document_number.clone()))?;
    let columns = ColumnMap::resolve(&header, names)?;

    let mut rows = Vec::new();
    let mut skipped = 0usize;
    for (idx, cells) in lines.enumerate() {
        match columns.row(idx + 2, &cells) {
            Some(row) => rows.push(row),
            None => skipped += 1,
        }
    }
    if skipped > 0 {
        tracing::info!("{} spreadsheet rows without a document number were skipped", skipped);
    }

    Ok(rows)
}

fn unreadable(path: &Path, reason: impl ToString) -> RateioError {
    RateioError::SpreadsheetUnreadable {
        path: path.to_path_buf(),
        reason: reason.to_string(),
    }
}

fn read_workbook(path: &Path) -> Result<Vec<Vec<CellValue>>> {
    let mut workbook = open_workbook_auto(path).map_err(|e| unreadable(path, e))?;
    let range = workbook
        .worksheet_range_at(0)
        .ok_or_else(|| unreadable(path, "workbook has no sheets"))?
        .map_err(|e| unreadable(path, e))?;

    Ok(range
        .rows()
        .map(|row| row.iter().map(CellValue::from).collect())
        .collect())
}

fn read_csv(path: &Path) -> Result<Vec<Vec<CellValue>>> {
    let content = std::fs::read_to_string(path).map_err(|e| unreadable(path, e))?;
    let first_line = content.lines().next().unwrap_or_default();
    let delimiter = if first_line.matches(';').count() >= first_line.matches(',').count()
        && first_line.contains(';')
    {
        b';'
    } else {
        b','
    };

    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .has_headers(false)
        .flexible(true)
        .from_reader(content.as_bytes());

    let mut table = Vec::new();
    for record in reader.records() {
        let record = record.map_err(|e| unreadable(path, e))?;
        table.push(
            record
                .iter()
                .map(|field| {
                    if field.trim().is_empty() {
                        CellValue::Empty
                    } else {
                        CellValue::Text(field.to_string())
                    }
                })
                .collect(),
        );
    }
    Ok(table)
}
