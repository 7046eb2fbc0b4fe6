//! CT-e XML 读取
//!
//! 每个字段独立提取, 失败只影响该字段。

use crate::error::RecordError;
use crate::models::{normalize_document_number, FiscalKey, StructuredRecord};
use crate::service::currency;
use bigdecimal::BigDecimal;
use quick_xml::events::Event;
use quick_xml::name::ResolveResult;
use quick_xml::NsReader;
use regex::Regex;
use std::path::Path;
use std::str::FromStr;
use std::sync::OnceLock;

pub const CTE_NAMESPACE: &str = "http://www.portalfiscal.inf.br/cte";

#[derive(Debug)]
struct XmlNode {
    namespace: Option<String>,
    qname: String,
    local: String,
    attributes: Vec<(String, String)>,
    text: String,
    parent: Option<usize>,
}

/// 扁平化的元素树 (文档顺序)
#[derive(Debug, Default)]
struct XmlTree {
    nodes: Vec<XmlNode>,
}

impl XmlTree {
    fn parse(xml: &str) -> Result<Self, RecordError> {
        let mut reader = NsReader::from_str(xml);
        reader.config_mut().trim_text(true);

        let mut tree = XmlTree::default();
        let mut stack: Vec<usize> = Vec::new();

        loop {
            match reader.read_resolved_event() {
                Ok((ns, Event::Start(e))) => {
                    let idx = tree.push(&ns, &e, stack.last().copied());
                    stack.push(idx);
                }
                Ok((ns, Event::Empty(e))) => {
                    tree.push(&ns, &e, stack.last().copied());
                }
                Ok((_, Event::Text(t))) => {
                    if let Some(&idx) = stack.last() {
                        let text = t
                            .unescape()
                            .map(|c| c.into_owned())
                            .unwrap_or_else(|_| String::from_utf8_lossy(&t).into_owned());
                        tree.nodes[idx].text.push_str(&text);
                    }
                }
                Ok((_, Event::CData(c))) => {
                    if let Some(&idx) = stack.last() {
                        tree.nodes[idx]
                            .text
                            .push_str(&String::from_utf8_lossy(&c.into_inner()));
                    }
                }
                Ok((_, Event::End(_))) => {
                    stack.pop();
                }
                Ok((_, Event::Eof)) => break,
                Err(e) => {
                    return Err(RecordError::Malformed(format!(
                        "position {}: {}",
                        reader.buffer_position(),
                        e
                    )))
                }
                _ => {}
            }
        }

        if tree.nodes.is_empty() {
            return Err(RecordError::Malformed("document has no elements".into()));
        }
        Ok(tree)
    }

    fn push(
        &mut self,
        ns: &ResolveResult<'_>,
        e: &quick_xml::events::BytesStart<'_>,
        parent: Option<usize>,
    ) -> usize {
        let namespace = match ns {
            ResolveResult::Bound(n) => Some(String::from_utf8_lossy(n.as_ref()).into_owned()),
            _ => None,
        };
        let attributes = e
            .attributes()
            .flatten()
            .map(|a| {
                (
                    String::from_utf8_lossy(a.key.local_name().as_ref()).into_owned(),
                    String::from_utf8_lossy(&a.value).into_owned(),
                )
            })
            .collect();

        self.nodes.push(XmlNode {
            namespace,
            qname: String::from_utf8_lossy(e.name().as_ref()).into_owned(),
            local: String::from_utf8_lossy(e.local_name().as_ref()).into_owned(),
            attributes,
            text: String::new(),
            parent,
        });
        self.nodes.len() - 1
    }

    /// 命名空间限定查找
    fn find_ns(&self, local: &str, namespace: &str) -> Option<usize> {
        self.nodes
            .iter()
            .position(|n| n.local == local && n.namespace.as_deref() == Some(namespace))
    }

    fn find_local(&self, local: &str) -> Option<usize> {
        self.nodes.iter().position(|n| n.local == local)
    }

    /// 忽略命名空间: 按原始标签名后缀匹配
    fn find_suffix(&self, suffix: &str) -> Option<usize> {
        self.nodes.iter().position(|n| n.qname.ends_with(suffix))
    }

    fn child_local(&self, parent: usize, local: &str) -> Option<usize> {
        self.nodes
            .iter()
            .position(|n| n.parent == Some(parent) && n.local == local)
    }

    fn child_ns(&self, parent: usize, local: &str, namespace: &str) -> Option<usize> {
        self.nodes.iter().position(|n| {
            n.parent == Some(parent) && n.local == local && n.namespace.as_deref() == Some(namespace)
        })
    }

    fn attribute(&self, idx: usize, name: &str) -> Option<&str> {
        self.nodes[idx]
            .attributes
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    fn text(&self, idx: usize) -> &str {
        self.nodes[idx].text.trim()
    }
}

fn load(path: &Path) -> Result<XmlTree, RecordError> {
    let content = std::fs::read(path).map_err(|e| RecordError::Io(e.to_string()))?;
    let xml = String::from_utf8_lossy(&content);
    XmlTree::parse(xml.trim_start_matches('\u{feff}'))
}

fn key_from_tree(tree: &XmlTree) -> Result<FiscalKey, RecordError> {
    if let Some(idx) = tree.find_local("infCte") {
        if let Some(id) = tree.attribute(idx, "Id") {
            return FiscalKey::from_prefixed(id).map_err(|_| RecordError::InvalidValue {
                field: "infCte/@Id",
                value: id.to_string(),
            });
        }
    }
    // protCTe/infProt/chCTe; infCteComp/chCTe 是被补充单据的 chave
    let idx = tree
        .find_local("infProt")
        .and_then(|prot| tree.child_local(prot, "chCTe"))
        .ok_or(RecordError::MissingElement("infCte"))?;
    let text = tree.text(idx);
    FiscalKey::parse(text).map_err(|_| RecordError::InvalidValue {
        field: "chCTe",
        value: text.to_string(),
    })
}

fn number_from_tree(tree: &XmlTree) -> Result<String, RecordError> {
    let idx = tree
        .find_local("nCT")
        .ok_or(RecordError::MissingElement("nCT"))?;
    let text = tree.text(idx);
    normalize_document_number(text).ok_or_else(|| RecordError::InvalidValue {
        field: "nCT",
        value: text.to_string(),
    })
}

fn total_from_tree(tree: &XmlTree) -> Result<BigDecimal, RecordError> {
    let prest = tree
        .find_ns("vPrest", CTE_NAMESPACE)
        .ok_or(RecordError::MissingElement("vPrest"))?;
    let total = tree
        .child_ns(prest, "vTPrest", CTE_NAMESPACE)
        .ok_or(RecordError::MissingElement("vTPrest"))?;
    let text = tree.text(total);
    BigDecimal::from_str(text)
        .map(|v| currency::round_cents(&v))
        .map_err(|_| RecordError::InvalidValue {
            field: "vTPrest",
            value: text.to_string(),
        })
}

fn classification_from_tree(tree: &XmlTree) -> Result<String, RecordError> {
    let idx = tree
        .find_ns("tpCTe", CTE_NAMESPACE)
        .or_else(|| tree.find_suffix("tpCTe"))
        .ok_or(RecordError::MissingElement("tpCTe"))?;
    Ok(tree.text(idx).to_string())
}

fn complement_from_tree(tree: &XmlTree) -> bool {
    tree.find_local("infCteComp").is_some()
}

/// 文件名里的 44 位数字
pub fn key_from_file_name(path: &Path) -> Option<FiscalKey> {
    static KEY_IN_NAME: OnceLock<Regex> = OnceLock::new();
    let re = KEY_IN_NAME.get_or_init(|| Regex::new(r"\d{44}").expect("valid regex"));
    let name = path.file_name()?.to_string_lossy();
    re.find_iter(&name)
        .find_map(|m| FiscalKey::parse(m.as_str()).ok())
}

pub fn extract_fiscal_key(path: &Path) -> Result<FiscalKey, RecordError> {
    key_from_tree(&load(path)?)
}

pub fn extract_document_number(path: &Path) -> Result<String, RecordError> {
    number_from_tree(&load(path)?)
}

pub fn extract_authoritative_total(path: &Path) -> Result<BigDecimal, RecordError> {
    total_from_tree(&load(path)?)
}

pub fn classify(path: &Path) -> Result<String, RecordError> {
    classification_from_tree(&load(path)?)
}

pub fn has_complement_marker(path: &Path) -> bool {
    load(path).map(|t| complement_from_tree(&t)).unwrap_or(false)
}

/// 一次解析读取全部字段; 仅当文件无法解析或无法确定 chave 时返回错误
///
/// XML 中没有 chave 时才退回到文件名; chave 存在但无效的记录直接拒绝。
pub fn read_record(path: &Path) -> Result<StructuredRecord, RecordError> {
    let tree = load(path)?;

    let fiscal_key = match key_from_tree(&tree) {
        Ok(key) => key,
        Err(err @ RecordError::MissingElement(_)) => key_from_file_name(path).ok_or(err)?,
        Err(err) => return Err(err),
    };

    let document_number = match number_from_tree(&tree) {
        Ok(n) => n,
        Err(err) => {
            tracing::debug!("{}: {}, using number from key", path.display(), err);
            fiscal_key.document_number()
        }
    };

    let authoritative_total = match total_from_tree(&tree) {
        Ok(v) => Some(v),
        Err(err) => {
            tracing::debug!("{}: no authoritative total ({})", path.display(), err);
            None
        }
    };

    Ok(StructuredRecord {
        path: path.to_path_buf(),
        fiscal_key,
        document_number,
        authoritative_total,
        classification: classification_from_tree(&tree).ok(),
        has_complement_marker: complement_from_tree(&tree),
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    pub(crate) const KEY: &str = "35240112345678000190570010000010011000010010";

    pub(crate) fn cte_xml(key: &str, number: &str, tp: &str, total: &str, complement: bool) -> String {
        let comp = if complement {
            "<infCteComp><chCTe>00000000000000000000000000000000000000000000</chCTe></infCteComp>"
        } else {
            ""
        };
        format!(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<cteProc xmlns="http://www.portalfiscal.inf.br/cte" versao="3.00">
  <CTe xmlns="http://www.portalfiscal.inf.br/cte">
    <infCte Id="CTe{key}" versao="3.00">
      <ide><cUF>35</cUF><nCT>{number}</nCT><tpCTe>{tp}</tpCTe></ide>
      <vPrest><vTPrest>{total}</vTPrest><vRec>{total}</vRec></vPrest>
      {comp}
    </infCte>
  </CTe>
  <protCTe versao="3.00"><infProt><chCTe>{key}</chCTe></infProt></protCTe>
</cteProc>"#
        )
    }

    fn write(dir: &Path, name: &str, content: &str) -> std::path::PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn test_read_full_record() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(dir.path(), "a.xml", &cte_xml(KEY, "0001001", "0", "150.025", false));

        let record = read_record(&path).unwrap();
        assert_eq!(record.fiscal_key.as_str(), KEY);
        assert_eq!(record.document_number, "1001");
        assert_eq!(record.authoritative_total, Some(BigDecimal::from_str("150.03").unwrap()));
        assert_eq!(record.classification.as_deref(), Some("0"));
        assert!(!record.has_complement_marker);
        assert!(record.is_normal());
    }

    #[test]
    fn test_individual_extractors() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(dir.path(), "b.xml", &cte_xml(KEY, "1001", "1", "10.00", true));

        assert_eq!(extract_fiscal_key(&path).unwrap().as_str(), KEY);
        assert_eq!(extract_document_number(&path).unwrap(), "1001");
        assert_eq!(classify(&path).unwrap(), "1");
        assert!(has_complement_marker(&path));
    }

    #[test]
    fn test_missing_total_is_field_error() {
        let dir = tempfile::tempdir().unwrap();
        let xml = cte_xml(KEY, "1001", "0", "10.00", false).replace("<vTPrest>10.00</vTPrest>", "");
        let path = write(dir.path(), "c.xml", &xml);

        assert_eq!(
            extract_authoritative_total(&path),
            Err(RecordError::MissingElement("vTPrest"))
        );
        let record = read_record(&path).unwrap();
        assert_eq!(record.authoritative_total, None);
    }

    #[test]
    fn test_unparsable_total() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(dir.path(), "d.xml", &cte_xml(KEY, "1001", "0", "abc", false));
        assert!(matches!(
            extract_authoritative_total(&path),
            Err(RecordError::InvalidValue { field: "vTPrest", .. })
        ));
    }

    #[test]
    fn test_classification_without_namespace_uses_suffix_scan() {
        let dir = tempfile::tempdir().unwrap();
        let xml = format!(
            r#"<cteProc><CTe><infCte Id="CTe{KEY}"><ide><nCT>5</nCT><x:tpCTe xmlns:x="urn:other">0</x:tpCTe></ide></infCte></CTe></cteProc>"#
        );
        let path = write(dir.path(), "e.xml", &xml);
        assert_eq!(classify(&path).unwrap(), "0");
        // 无命名空间时不认 vPrest
        assert!(extract_authoritative_total(&path).is_err());
    }

    #[test]
    fn test_malformed_file_yields_errors_not_panics() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(dir.path(), "f.xml", "<cteProc><CTe></cteProc>");
        assert!(matches!(read_record(&path), Err(RecordError::Malformed(_))));
        assert!(!has_complement_marker(&path));
        assert!(extract_fiscal_key(&dir.path().join("missing.xml")).is_err());
    }

    #[test]
    fn test_key_falls_back_to_file_name() {
        let dir = tempfile::tempdir().unwrap();
        let xml = r#"<cteProc xmlns="http://www.portalfiscal.inf.br/cte"><CTe><infCte><ide><tpCTe>0</tpCTe></ide></infCte></CTe></cteProc>"#;
        let path = write(dir.path(), &format!("{}-cte.xml", KEY), xml);

        let record = read_record(&path).unwrap();
        assert_eq!(record.fiscal_key.as_str(), KEY);
        assert_eq!(record.document_number, "1001");
    }

    #[test]
    fn test_invalid_key_is_not_replaced_by_file_name() {
        let dir = tempfile::tempdir().unwrap();
        // 模型 55 (NF-e) 的 chave
        let nfe_key = "35240112345678000190550010000010011000010010";
        let xml = cte_xml(KEY, "1001", "0", "10.00", false).replace(&format!("CTe{}", KEY), &format!("CTe{}", nfe_key));
        let path = write(dir.path(), &format!("{}-cte.xml", KEY), &xml);

        assert!(matches!(
            read_record(&path),
            Err(RecordError::InvalidValue { field: "infCte/@Id", .. })
        ));
    }

    #[test]
    fn test_protocol_key_preferred_over_complemented_key() {
        let dir = tempfile::tempdir().unwrap();
        let referenced = "35240112345678000190570010000009991000009990";
        let xml = format!(
            r#"<cteProc xmlns="http://www.portalfiscal.inf.br/cte"><CTe><infCte><ide><nCT>1001</nCT><tpCTe>1</tpCTe></ide><infCteComp><chCTe>{referenced}</chCTe></infCteComp></infCte></CTe><protCTe><infProt><chCTe>{KEY}</chCTe></infProt></protCTe></cteProc>"#
        );
        let path = write(dir.path(), "g.xml", &xml);

        assert_eq!(extract_fiscal_key(&path).unwrap().as_str(), KEY);
        let record = read_record(&path).unwrap();
        assert!(record.has_complement_marker);
    }
}
