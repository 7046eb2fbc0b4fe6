use bigdecimal::BigDecimal;
use chrono::{DateTime, Local};
use serde::Serialize;
use std::path::PathBuf;

/// 每个分组的终态 (PENDING 之后不再重试)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GroupStatus {
    KeyMissing,
    DocMissing,
    NoValidLines,
    Divergent,
    Success,
    Exception,
}

/// 单据级报告行
#[derive(Debug, Clone, Serialize)]
pub struct ReportRow {
    pub document_number: String,
    pub status: GroupStatus,
    pub authoritative_value: Option<BigDecimal>,
    pub allocated_sum: Option<BigDecimal>,
    pub difference: Option<BigDecimal>,
    pub message: String,
    pub output_file: Option<String>,
}

impl ReportRow {
    pub fn new(document_number: impl Into<String>, status: GroupStatus, message: impl Into<String>) -> Self {
        Self {
            document_number: document_number.into(),
            status,
            authoritative_value: None,
            allocated_sum: None,
            difference: None,
            message: message.into(),
            output_file: None,
        }
    }
}

/// 运行统计, 由流水线累积并返回
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub groups: usize,
    pub success: usize,
    pub key_not_found: usize,
    pub document_not_found: usize,
    pub no_valid_lines: usize,
    pub divergent: usize,
    pub exceptions: usize,
    /// 应用了舍入调整的分组
    pub adjusted: usize,
    pub records_indexed: usize,
    pub records_ignored_complement: usize,
    pub records_duplicate: usize,
    pub records_invalid: usize,
    pub pages_scanned: usize,
    pub pages_split: usize,
    pub batch_files_failed: usize,
    /// 首页文字含 COMPLEMENTO 的 PDF
    pub complement_flagged: usize,
}

impl RunSummary {
    pub fn record(&mut self, status: GroupStatus) {
        match status {
            GroupStatus::KeyMissing => self.key_not_found += 1,
            GroupStatus::DocMissing => self.document_not_found += 1,
            GroupStatus::NoValidLines => self.no_valid_lines += 1,
            GroupStatus::Divergent => self.divergent += 1,
            GroupStatus::Success => self.success += 1,
            GroupStatus::Exception => self.exceptions += 1,
        }
    }

    pub fn failures(&self) -> usize {
        self.key_not_found + self.document_not_found + self.divergent + self.exceptions
    }
}

/// 一次运行的结果
#[derive(Debug, Clone, Serialize)]
pub struct RunOutcome {
    pub summary: RunSummary,
    pub report: Vec<ReportRow>,
    pub cancelled: bool,
    pub unified_output: Option<PathBuf>,
    pub started_at: DateTime<Local>,
    pub finished_at: DateTime<Local>,
}

impl RunOutcome {
    pub fn elapsed_text(&self) -> String {
        let secs = (self.finished_at - self.started_at).num_seconds().max(0);
        format_elapsed(secs)
    }
}

pub fn format_elapsed(total_secs: i64) -> String {
    let minutes = total_secs / 60;
    let rest = total_secs % 60;
    if minutes > 0 {
        format!("{} min {} s", minutes, rest)
    } else {
        format!("{} s", rest)
    }
}
