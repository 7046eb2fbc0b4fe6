//! 货币解析与格式化 (巴西格式 1.234,56)
//!
//! 金额一律使用 `BigDecimal`, 两位小数, HALF_UP 舍入。

use bigdecimal::num_bigint::Sign;
use bigdecimal::{BigDecimal, RoundingMode};
use std::str::FromStr;

/// 表示"无值"的占位文本
const PLACEHOLDERS: &[&str] = &["", "nan", "NaN", "-", "—", "–"];

/// 单元格原始值
#[derive(Debug, Clone, PartialEq)]
pub enum RawAmount<'a> {
    Empty,
    Int(i64),
    Float(f64),
    Decimal(&'a BigDecimal),
    Text(&'a str),
}

/// 解析金额; 无法解析时返回 None, 不报错
pub fn parse(value: RawAmount<'_>) -> Option<BigDecimal> {
    match value {
        RawAmount::Empty => None,
        RawAmount::Int(i) => Some(BigDecimal::from(i)),
        // 走十进制字符串, 不做二进制浮点运算
        RawAmount::Float(f) if f.is_finite() => BigDecimal::from_str(&f.to_string()).ok(),
        RawAmount::Float(_) => None,
        RawAmount::Decimal(d) => Some(d.clone()),
        RawAmount::Text(s) => parse_text(s),
    }
}

pub fn parse_text(raw: &str) -> Option<BigDecimal> {
    let s = raw.trim();
    if PLACEHOLDERS.contains(&s) {
        return None;
    }

    let s = s.replace("R$", "");
    let mut cleaned: String = s
        .chars()
        .filter(|c| c.is_ascii_digit() || matches!(c, '.' | ',' | '-'))
        .collect();

    if cleaned.contains(',') && cleaned.contains('.') {
        cleaned = cleaned.replace('.', "").replace(',', ".");
    } else if cleaned.contains(',') {
        cleaned = cleaned.replace(',', ".");
    }

    if !cleaned.bytes().any(|b| b.is_ascii_digit()) {
        return None;
    }
    BigDecimal::from_str(&cleaned).ok()
}

/// 两位小数, HALF_UP
pub fn round_cents(value: &BigDecimal) -> BigDecimal {
    value.with_scale_round(2, RoundingMode::HalfUp)
}

/// 1234.5 -> "1.234,50"; None -> "0,00"
pub fn format(value: Option<&BigDecimal>) -> String {
    let Some(value) = value else {
        return "0,00".to_string();
    };

    let (cents, _) = round_cents(value).into_bigint_and_exponent();
    let negative = cents.sign() == Sign::Minus;
    let digits = cents.magnitude().to_string();
    let digits = format!("{:0>3}", digits);
    let (int_part, frac_part) = digits.split_at(digits.len() - 2);

    let mut grouped = String::with_capacity(int_part.len() + int_part.len() / 3);
    for (idx, ch) in int_part.chars().enumerate() {
        if idx > 0 && (int_part.len() - idx) % 3 == 0 {
            grouped.push('.');
        }
        grouped.push(ch);
    }

    format!("{}{},{}", if negative { "-" } else { "" }, grouped, frac_part)
}
