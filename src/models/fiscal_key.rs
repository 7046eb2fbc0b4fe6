use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// chave 长度
pub const FISCAL_KEY_LEN: usize = 44;
/// 模型标识 (CT-e = 57), 位于 offset 20..22
pub const MODEL_CTE: &str = "57";

const MODEL_RANGE: std::ops::Range<usize> = 20..22;
const NUMBER_RANGE: std::ops::Range<usize> = 25..34;

/// 条码/属性中可能出现的非数字前缀
const KNOWN_PREFIXES: &[&str] = &["CTe", "CTE", "cte", "NFe", "ID"];

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum KeyError {
    #[error("fiscal key must have {FISCAL_KEY_LEN} characters, got {0}")]
    Length(usize),

    #[error("fiscal key contains non-digit characters")]
    NonDigit,

    #[error("fiscal key model is {0}, expected {MODEL_CTE}")]
    Model(String),
}

/// CT-e chave de acesso (44 位数字)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct FiscalKey(String);

impl FiscalKey {
    pub fn parse(raw: &str) -> Result<Self, KeyError> {
        let s = raw.trim();
        if s.len() != FISCAL_KEY_LEN {
            return Err(KeyError::Length(s.chars().count()));
        }
        if !s.bytes().all(|b| b.is_ascii_digit()) {
            return Err(KeyError::NonDigit);
        }
        let model = &s[MODEL_RANGE];
        if model != MODEL_CTE {
            return Err(KeyError::Model(model.to_string()));
        }
        Ok(Self(s.to_string()))
    }

    /// 从 infCte/@Id 之类带前缀的属性值解析
    pub fn from_prefixed(raw: &str) -> Result<Self, KeyError> {
        let mut s = raw.trim();
        for prefix in KNOWN_PREFIXES {
            if let Some(rest) = s.strip_prefix(prefix) {
                s = rest;
                break;
            }
        }
        Self::parse(s)
    }

    /// 条码内容: 去掉所有非数字字符后再校验
    pub fn from_barcode(payload: &str) -> Result<Self, KeyError> {
        let digits: String = payload.chars().filter(|c| c.is_ascii_digit()).collect();
        Self::parse(&digits)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// nCT: offset 25..34, 去掉前导零
    pub fn document_number(&self) -> String {
        strip_leading_zeros(&self.0[NUMBER_RANGE])
    }

    /// 9 位补零的 nCT, 用于按文件名定位 PDF
    pub fn padded_document_number(&self) -> &str {
        &self.0[NUMBER_RANGE]
    }
}

impl fmt::Display for FiscalKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for FiscalKey {
    type Error = KeyError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<FiscalKey> for String {
    fn from(key: FiscalKey) -> Self {
        key.0
    }
}

pub fn is_valid_fiscal_key(s: &str) -> bool {
    FiscalKey::parse(s).is_ok()
}

/// 全零时返回 "0", 保证编号非空
pub fn strip_leading_zeros(s: &str) -> String {
    let trimmed = s.trim_start_matches('0');
    if trimmed.is_empty() && !s.is_empty() {
        "0".to_string()
    } else {
        trimmed.to_string()
    }
}

/// 统一电子表格/XML 中的单据编号: "0001001", "1001.0", 1001.0 -> "1001"
pub fn normalize_document_number(raw: &str) -> Option<String> {
    let s = raw.trim();
    let s = s.strip_suffix(".0").unwrap_or(s);
    if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    Some(strip_leading_zeros(s))
}
