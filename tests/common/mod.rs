#![allow(dead_code)]

use lopdf::content::{Content, Operation};
use lopdf::{Dictionary, Document, Object, Stream};
use std::path::{Path, PathBuf};

pub const KEY_1001: &str = "35240112345678000190570010000010011000010010";
pub const KEY_1002: &str = "35240112345678000190570010000010021000010020";
pub const KEY_1003: &str = "35240112345678000190570010000010031000010030";
pub const KEY_1004: &str = "35240112345678000190570010000010041000010040";

/// 每页一行文字的 PDF
pub fn pdf_with_pages(texts: &[&str]) -> Vec<u8> {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let font_id = doc.add_object(Dictionary::from_iter(vec![
        ("Type", Object::Name(b"Font".to_vec())),
        ("Subtype", Object::Name(b"Type1".to_vec())),
        ("BaseFont", Object::Name(b"Helvetica".to_vec())),
        ("Encoding", Object::Name(b"WinAnsiEncoding".to_vec())),
    ]));
    let resources_id = doc.add_object(Dictionary::from_iter(vec![(
        "Font",
        Object::Dictionary(Dictionary::from_iter(vec![("F1", Object::Reference(font_id))])),
    )]));

    let mut kids = Vec::new();
    for text in texts {
        let content = Content {
            operations: vec![
                Operation::new("BT", vec![]),
                Operation::new("Tf", vec![Object::Name(b"F1".to_vec()), Object::Integer(12)]),
                Operation::new("Td", vec![Object::Integer(50), Object::Integer(700)]),
                Operation::new("Tj", vec![Object::string_literal(*text)]),
                Operation::new("ET", vec![]),
            ],
        };
        let content_id = doc.add_object(Stream::new(Dictionary::new(), content.encode().unwrap()));
        let page_id = doc.add_object(Dictionary::from_iter(vec![
            ("Type", Object::Name(b"Page".to_vec())),
            ("Parent", Object::Reference(pages_id)),
            (
                "MediaBox",
                Object::Array(vec![
                    Object::Integer(0),
                    Object::Integer(0),
                    Object::Integer(595),
                    Object::Integer(842),
                ]),
            ),
            ("Contents", Object::Reference(content_id)),
            ("Resources", Object::Reference(resources_id)),
        ]));
        kids.push(Object::Reference(page_id));
    }

    doc.objects.insert(
        pages_id,
        Object::Dictionary(Dictionary::from_iter(vec![
            ("Type", Object::Name(b"Pages".to_vec())),
            ("Count", Object::Integer(texts.len() as i64)),
            ("Kids", Object::Array(kids)),
        ])),
    );
    let catalog_id = doc.add_object(Dictionary::from_iter(vec![
        ("Type", Object::Name(b"Catalog".to_vec())),
        ("Pages", Object::Reference(pages_id)),
    ]));
    doc.trailer.set("Root", Object::Reference(catalog_id));

    let mut buffer = Vec::new();
    doc.save_to(&mut buffer).unwrap();
    buffer
}

pub fn cte_xml(key: &str, number: &str, tp: &str, total: &str) -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<cteProc xmlns="http://www.portalfiscal.inf.br/cte" versao="3.00">
  <CTe>
    <infCte Id="CTe{key}" versao="3.00">
      <ide><nCT>{number}</nCT><tpCTe>{tp}</tpCTe></ide>
      <vPrest><vTPrest>{total}</vTPrest></vPrest>
    </infCte>
  </CTe>
</cteProc>"#
    )
}

/// batch/ (扫描件 + XML), out/, planilha.csv
pub struct Workspace {
    pub dir: tempfile::TempDir,
}

impl Workspace {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("batch")).unwrap();
        Self { dir }
    }

    pub fn batch(&self) -> PathBuf {
        self.dir.path().join("batch")
    }

    pub fn out(&self) -> PathBuf {
        self.dir.path().join("out")
    }

    pub fn spreadsheet(&self) -> PathBuf {
        self.dir.path().join("planilha.csv")
    }

    pub fn write_batch_pdf(&self, name: &str, pages: &[&str]) -> PathBuf {
        let path = self.batch().join(name);
        std::fs::write(&path, pdf_with_pages(pages)).unwrap();
        path
    }

    pub fn write_record(&self, key: &str, number: &str, tp: &str, total: &str) -> PathBuf {
        let path = self.batch().join(format!("{}.xml", number));
        std::fs::write(&path, cte_xml(key, number, tp, total)).unwrap();
        path
    }

    /// rows: (nCT, valor, operação)
    pub fn write_spreadsheet(&self, rows: &[(&str, &str, &str)]) {
        let mut content = String::from("N° CT-e;Vlr Contabil;Operação\n");
        for (doc, value, op) in rows {
            content.push_str(&format!("{};{};{}\n", doc, value, op));
        }
        std::fs::write(self.spreadsheet(), content).unwrap();
    }

    pub fn pdfs_in(path: &Path) -> Vec<String> {
        let mut names: Vec<String> = std::fs::read_dir(path)
            .map(|entries| {
                entries
                    .flatten()
                    .map(|e| e.file_name().to_string_lossy().into_owned())
                    .filter(|n| n.ends_with(".pdf"))
                    .collect()
            })
            .unwrap_or_default();
        names.sort();
        names
    }
}
