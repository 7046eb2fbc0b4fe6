//! 叠加层生成与合并
//!
//! 叠加层是一页 A4, 在固定锚点逐行写出分摊文字; 合并时把它的内容流
//! 追加到原 PDF 第一页之后, 输出只保留第一页。

use crate::config::OverlaySettings;
use crate::error::PdfError;
use crate::files::pdf;
use crate::models::AllocationGroup;
use crate::service::currency;
use lopdf::content::{Content, Operation};
use lopdf::{Dictionary, Document, Object, ObjectId, Stream};
use std::path::Path;

/// 叠加层字体资源名, 避免与原页面资源冲突
const OVERLAY_FONT: &str = "RtF1";
const A4_WIDTH: i64 = 595;
const A4_HEIGHT: i64 = 842;

/// "<前缀>: R$ <金额>", 每条分摊一行, 顺序与保留顺序一致
pub fn annotation_lines(group: &AllocationGroup) -> Vec<String> {
    group
        .lines
        .iter()
        .map(|line| format!("{}: R$ {}", line.prefix, currency::format(Some(&line.value))))
        .collect()
}

pub struct Annotator<'a> {
    settings: &'a OverlaySettings,
}

impl<'a> Annotator<'a> {
    pub fn new(settings: &'a OverlaySettings) -> Self {
        Self { settings }
    }

    /// 生成透明叠加层 PDF
    pub fn render(&self, lines: &[String], output: &Path) -> Result<(), PdfError> {
        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();
        let font_id = doc.add_object(font_dictionary());

        let mut resources = Dictionary::new();
        resources.set(
            "Font",
            Object::Dictionary(Dictionary::from_iter(vec![(
                OVERLAY_FONT,
                Object::Reference(font_id),
            )])),
        );

        let content = Content {
            operations: self.text_operations(lines),
        };
        let encoded = content
            .encode()
            .map_err(|e| PdfError::Structure(format!("encode overlay: {}", e)))?;
        let content_id = doc.add_object(Stream::new(Dictionary::new(), encoded));

        let page_id = doc.add_object(Dictionary::from_iter(vec![
            ("Type", Object::Name(b"Page".to_vec())),
            ("Parent", Object::Reference(pages_id)),
            (
                "MediaBox",
                Object::Array(vec![
                    Object::Integer(0),
                    Object::Integer(0),
                    Object::Integer(A4_WIDTH),
                    Object::Integer(A4_HEIGHT),
                ]),
            ),
            ("Contents", Object::Reference(content_id)),
            ("Resources", Object::Dictionary(resources)),
        ]));
        doc.objects.insert(
            pages_id,
            Object::Dictionary(Dictionary::from_iter(vec![
                ("Type", Object::Name(b"Pages".to_vec())),
                ("Count", Object::Integer(1)),
                ("Kids", Object::Array(vec![Object::Reference(page_id)])),
            ])),
        );
        let catalog_id = doc.add_object(Dictionary::from_iter(vec![
            ("Type", Object::Name(b"Catalog".to_vec())),
            ("Pages", Object::Reference(pages_id)),
        ]));
        doc.trailer.set("Root", Object::Reference(catalog_id));

        pdf::save(&mut doc, output)
    }

    fn text_operations(&self, lines: &[String]) -> Vec<Operation> {
        let s = self.settings;
        let mut ops = vec![
            Operation::new("q", vec![]),
            Operation::new("rg", vec![Object::Integer(0), Object::Integer(0), Object::Integer(0)]),
        ];
        for (idx, line) in lines.iter().enumerate() {
            let y = s.y - s.line_height * idx as f32;
            ops.push(Operation::new("BT", vec![]));
            ops.push(Operation::new(
                "Tf",
                vec![Object::Name(OVERLAY_FONT.as_bytes().to_vec()), Object::Real(s.font_size)],
            ));
            ops.push(Operation::new("Td", vec![Object::Real(s.x), Object::Real(y)]));
            ops.push(Operation::new("Tj", vec![Object::string_literal(line.as_str())]));
            ops.push(Operation::new("ET", vec![]));
        }
        ops.push(Operation::new("Q", vec![]));
        ops
    }

    /// 把叠加层合成到 base 第一页并写出; 叠加层文件随后删除
    pub fn merge(&self, base: &Path, overlay: &Path, output: &Path) -> Result<(), PdfError> {
        let result = merge_first_page(base, overlay, output);
        if let Err(e) = std::fs::remove_file(overlay) {
            tracing::debug!("Overlay {} not removed: {}", overlay.display(), e);
        }
        result
    }

    /// render + merge, 叠加层放在输出目录下
    pub fn annotate(&self, lines: &[String], base: &Path, output: &Path) -> Result<(), PdfError> {
        let overlay = output.with_extension("overlay.pdf");
        if let Err(e) = self.render(lines, &overlay) {
            let _ = std::fs::remove_file(&overlay);
            return Err(e);
        }
        self.merge(base, &overlay, output)
    }
}

fn font_dictionary() -> Dictionary {
    Dictionary::from_iter(vec![
        ("Type", Object::Name(b"Font".to_vec())),
        ("Subtype", Object::Name(b"Type1".to_vec())),
        ("BaseFont", Object::Name(b"Helvetica-Bold".to_vec())),
        ("Encoding", Object::Name(b"WinAnsiEncoding".to_vec())),
    ])
}

fn structure(context: &str, e: lopdf::Error) -> PdfError {
    PdfError::Structure(format!("{}: {}", context, e))
}

fn first_page_id(doc: &Document, path: &Path) -> Result<ObjectId, PdfError> {
    doc.get_pages()
        .get(&1)
        .copied()
        .ok_or_else(|| PdfError::Empty(path.to_path_buf()))
}

fn merge_first_page(base_path: &Path, overlay_path: &Path, output: &Path) -> Result<(), PdfError> {
    let mut base = pdf::load(base_path)?;
    match pdf::page_count(&base) {
        0 => return Err(PdfError::Empty(base_path.to_path_buf())),
        1 => {}
        _ => base = pdf::extract_page(&base, 1)?,
    }

    let overlay = pdf::load(overlay_path)?;
    let overlay_page = first_page_id(&overlay, overlay_path)?;
    let overlay_content = overlay
        .get_page_content(overlay_page)
        .map_err(|e| structure("read overlay content", e))?;

    let page_id = first_page_id(&base, base_path)?;
    let base_content = base
        .get_page_content(page_id)
        .map_err(|e| structure("read base content", e))?;

    // 原内容包在 q/Q 中, 保证叠加层从初始图形状态开始
    let mut combined = Vec::with_capacity(base_content.len() + overlay_content.len() + 8);
    combined.extend_from_slice(b"q\n");
    combined.extend_from_slice(&base_content);
    combined.extend_from_slice(b"\nQ\n");
    combined.extend_from_slice(&overlay_content);
    let content_id = base.add_object(Stream::new(Dictionary::new(), combined));

    let font_id = base.add_object(font_dictionary());
    let mut resources = effective_resources(&base, page_id);
    let mut fonts = match resources.get(b"Font") {
        Ok(Object::Dictionary(d)) => d.clone(),
        Ok(Object::Reference(id)) => base.get_dictionary(*id).cloned().unwrap_or_default(),
        _ => Dictionary::new(),
    };
    fonts.set(OVERLAY_FONT, Object::Reference(font_id));
    resources.set("Font", Object::Dictionary(fonts));

    let page = base
        .get_dictionary_mut(page_id)
        .map_err(|e| structure("base page", e))?;
    page.set("Contents", Object::Reference(content_id));
    page.set("Resources", Object::Dictionary(resources));

    base.prune_objects();
    base.compress();
    pdf::save(&mut base, output)
}

/// 页面实际使用的资源字典 (含从父节点继承的)
fn effective_resources(doc: &Document, page_id: ObjectId) -> Dictionary {
    let mut current = Some(page_id);
    // 防止损坏文件中 Parent 成环
    let mut depth = 0;
    while let Some(id) = current {
        let Ok(node) = doc.get_dictionary(id) else {
            break;
        };
        match node.get(b"Resources") {
            Ok(Object::Dictionary(d)) => return d.clone(),
            Ok(Object::Reference(rid)) => {
                return doc.get_dictionary(*rid).cloned().unwrap_or_default();
            }
            _ => {}
        }
        current = node.get(b"Parent").and_then(Object::as_reference).ok();
        depth += 1;
        if depth > 32 {
            break;
        }
    }
    Dictionary::new()
}
