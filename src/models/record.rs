use crate::models::FiscalKey;
use bigdecimal::BigDecimal;
use indexmap::IndexMap;
use serde::Serialize;
use std::collections::HashSet;
use std::path::PathBuf;

/// tpCTe = "0": CT-e normal
pub const NORMAL_CLASSIFICATION: &str = "0";

/// 结构化 CT-e 记录 (XML), 索引阶段解析一次, 之后只读
#[derive(Debug, Clone, Serialize)]
pub struct StructuredRecord {
    pub path: PathBuf,
    pub fiscal_key: FiscalKey,
    pub document_number: String,
    pub authoritative_total: Option<BigDecimal>,
    pub classification: Option<String>,
    pub has_complement_marker: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classification {
    Normal,
    /// 补充/调整类 CT-e (tpCTe != 0 或存在 infCteComp)
    Adjustment(String),
    Unknown,
}

impl StructuredRecord {
    pub fn classification(&self) -> Classification {
        if self.has_complement_marker {
            return Classification::Adjustment(
                self.classification.clone().unwrap_or_else(|| "infCteComp".into()),
            );
        }
        match self.classification.as_deref() {
            Some(NORMAL_CLASSIFICATION) => Classification::Normal,
            Some(code) => Classification::Adjustment(code.to_string()),
            None => Classification::Unknown,
        }
    }

    pub fn is_normal(&self) -> bool {
        self.classification() == Classification::Normal
    }
}

/// nCT -> 记录
#[derive(Debug, Default)]
pub struct DocumentIndex {
    entries: IndexMap<String, StructuredRecord>,
}

impl DocumentIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// 先到先得; 重复编号返回 false, 不覆盖
    pub(crate) fn insert_first(&mut self, record: StructuredRecord) -> bool {
        if self.entries.contains_key(&record.document_number) {
            return false;
        }
        self.entries.insert(record.document_number.clone(), record);
        true
    }

    pub fn get(&self, document_number: &str) -> Option<&StructuredRecord> {
        self.entries.get(document_number)
    }

    /// 拆分阶段关心的 chave 集合
    pub fn fiscal_keys(&self) -> HashSet<FiscalKey> {
        self.entries.values().map(|r| r.fiscal_key.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &StructuredRecord)> {
        self.entries.iter()
    }
}
