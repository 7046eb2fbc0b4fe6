use std::path::PathBuf;
use thiserror::Error;

/// 运行级前置条件错误, 只有这些会中止整个运行
#[derive(Error, Debug)]
pub enum RateioError {
    #[error("spreadsheet not found: {0}")]
    SpreadsheetMissing(PathBuf),

    #[error("failed to open spreadsheet {path}: {reason}")]
    SpreadsheetUnreadable { path: PathBuf, reason: String },

    #[error("spreadsheet has no '{0}' column")]
    MissingColumn(String),

    #[error("batch folder not found: {0}")]
    BatchDirMissing(PathBuf),

    #[error("cannot prepare output folder {path}: {source}")]
    OutputDir {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("configuration error: {0}")]
    Config(String),
}

/// XML 记录解析失败 (按字段)
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RecordError {
    #[error("cannot read record: {0}")]
    Io(String),

    #[error("malformed XML: {0}")]
    Malformed(String),

    #[error("element <{0}> not found")]
    MissingElement(&'static str),

    #[error("invalid value for <{field}>: {value}")]
    InvalidValue { field: &'static str, value: String },
}

/// PDF 读写失败
#[derive(Error, Debug)]
pub enum PdfError {
    #[error("failed to load PDF {path}: {reason}")]
    Load { path: PathBuf, reason: String },

    #[error("PDF has no pages: {0}")]
    Empty(PathBuf),

    #[error("PDF structure error: {0}")]
    Structure(String),

    #[error("failed to save PDF {path}: {reason}")]
    Save { path: PathBuf, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// 页面光栅化/条码识别失败
#[derive(Error, Debug)]
pub enum ScanError {
    #[error("page {page} could not be rendered: {reason}")]
    Render { page: u32, reason: String },

    #[error("page {page} could not be decoded: {reason}")]
    Decode { page: u32, reason: String },

    #[error("scanner unavailable: {0}")]
    Unavailable(String),
}

pub type Result<T> = std::result::Result<T, RateioError>;
