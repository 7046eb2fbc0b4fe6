use crate::config::ColumnNames;
use crate::error::Result;
use crate::files::spreadsheet::{self, SheetRow};
use indexmap::IndexMap;
use std::path::Path;

/// 单据编号 -> 该编号的所有行 (按首次出现顺序)
pub type SheetGroups = IndexMap<String, Vec<SheetRow>>;

/// 读取电子表格并按单据编号分组; 打不开或缺少编号列时整个运行失败
pub fn load_groups(path: &Path, columns: &ColumnNames) -> Result<SheetGroups> {
    let rows = spreadsheet::load_rows(path, columns)?;
    let row_count = rows.len();
    let groups = group_rows(rows);
    tracing::info!(
        "Spreadsheet {}: {} rows in {} groups",
        path.display(),
        row_count,
        groups.len()
    );
    Ok(groups)
}

pub fn group_rows(rows: Vec<SheetRow>) -> SheetGroups {
    let mut groups = SheetGroups::new();
    for row in rows {
        groups
            .entry(row.document_number.clone())
            .or_default()
            .push(row);
    }
    groups
}
