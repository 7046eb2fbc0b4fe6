use bigdecimal::BigDecimal;
use serde::Serialize;
use std::fmt;

/// 运营类别前缀
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum CategoryPrefix {
    /// VENDA
    V,
    /// BONIFICAÇÃO
    B,
    /// AMOSTRA
    A,
}

/// 关键字 -> 前缀, 按顺序匹配
const CATEGORY_RULES: &[(&str, CategoryPrefix)] = &[
    ("VENDA", CategoryPrefix::V),
    ("BONIF", CategoryPrefix::B),
    ("AMOSTRA", CategoryPrefix::A),
];

impl CategoryPrefix {
    /// 不区分大小写的子串匹配; 未命中返回 None
    pub fn classify(operation: &str) -> Option<Self> {
        if operation.trim().is_empty() {
            return None;
        }
        let op = operation.to_uppercase();
        CATEGORY_RULES
            .iter()
            .find(|(keyword, _)| op.contains(keyword))
            .map(|(_, prefix)| *prefix)
    }

    pub fn letter(&self) -> char {
        match self {
            CategoryPrefix::V => 'V',
            CategoryPrefix::B => 'B',
            CategoryPrefix::A => 'A',
        }
    }
}

impl fmt::Display for CategoryPrefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.letter())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AllocationLine {
    pub prefix: CategoryPrefix,
    pub value: BigDecimal,
}

/// 一个 nCT 的分摊行 (保持电子表格顺序)
#[derive(Debug, Clone, Default)]
pub struct AllocationGroup {
    pub document_number: String,
    pub lines: Vec<AllocationLine>,
}

impl AllocationGroup {
    pub fn new(document_number: impl Into<String>) -> Self {
        Self {
            document_number: document_number.into(),
            lines: Vec::new(),
        }
    }

    pub fn push(&mut self, prefix: CategoryPrefix, value: BigDecimal) {
        self.lines.push(AllocationLine { prefix, value });
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn total(&self) -> BigDecimal {
        self.lines
            .iter()
            .fold(BigDecimal::from(0), |acc, l| acc + &l.value)
    }

    /// 最小值行的下标, 并列时取第一个
    pub fn smallest_line(&self) -> Option<usize> {
        let mut best: Option<usize> = None;
        for (idx, line) in self.lines.iter().enumerate() {
            match best {
                Some(b) if self.lines[b].value <= line.value => {}
                _ => best = Some(idx),
            }
        }
        best
    }
}
