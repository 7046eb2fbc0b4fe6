//! lopdf 文件级操作: 加载, 单页提取, 多文档合并

use crate::error::PdfError;
use lopdf::{Document, Object, ObjectId};
use std::collections::BTreeMap;
use std::fs::OpenOptions;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

pub fn load(path: &Path) -> Result<Document, PdfError> {
    Document::load(path).map_err(|e| PdfError::Load {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })
}

pub fn save(doc: &mut Document, path: &Path) -> Result<(), PdfError> {
    let bytes = to_bytes(doc, path)?;
    std::fs::write(path, bytes)?;
    Ok(())
}

fn to_bytes(doc: &mut Document, path: &Path) -> Result<Vec<u8>, PdfError> {
    let mut buffer = Vec::new();
    doc.save_to(&mut buffer).map_err(|e| PdfError::Save {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;
    Ok(buffer)
}

pub fn page_count(doc: &Document) -> u32 {
    doc.get_pages().len() as u32
}

/// 只保留第 page_number 页 (1 起始)
pub fn extract_page(doc: &Document, page_number: u32) -> Result<Document, PdfError> {
    let total = page_count(doc);
    if page_number == 0 || page_number > total {
        return Err(PdfError::Structure(format!(
            "page {} does not exist (document has {} pages)",
            page_number, total
        )));
    }

    let mut single = doc.clone();
    // 逆序删除, 保持页码
    let others: Vec<u32> = (1..=total).rev().filter(|p| *p != page_number).collect();
    for page in others {
        single.delete_pages(&[page]);
    }
    single.prune_objects();
    single.compress();
    Ok(single)
}

/// 写入新文件; 目标已存在时返回 Ok(false), 不覆盖
pub fn write_new(doc: &mut Document, path: &Path) -> Result<bool, PdfError> {
    let bytes = to_bytes(doc, path)?;
    let mut file = match OpenOptions::new().write(true).create_new(true).open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == ErrorKind::AlreadyExists => return Ok(false),
        Err(e) => return Err(e.into()),
    };
    file.write_all(&bytes)?;
    Ok(true)
}

/// 首页文本; 无法提取时为 None
pub fn first_page_text(path: &Path) -> Option<String> {
    let doc = Document::load(path).ok()?;
    doc.extract_text(&[1]).ok()
}

/// 统一输出: 按顺序累积单据, 结束时合并写出
#[derive(Debug)]
pub struct UnifiedOutput {
    path: PathBuf,
    documents: Vec<Vec<u8>>,
}

impl UnifiedOutput {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            documents: Vec::new(),
        }
    }

    pub fn append_file(&mut self, path: &Path) -> Result<(), PdfError> {
        self.documents.push(std::fs::read(path)?);
        Ok(())
    }

    /// 无内容时不写文件
    pub fn flush(self) -> Result<Option<PathBuf>, PdfError> {
        if self.documents.is_empty() {
            return Ok(None);
        }
        let bytes = merge_documents(self.documents)?;
        std::fs::write(&self.path, bytes)?;
        Ok(Some(self.path))
    }
}

/// 合并多个 PDF, 页顺序与输入一致
pub fn merge_documents(documents: Vec<Vec<u8>>) -> Result<Vec<u8>, PdfError> {
    if documents.is_empty() {
        return Err(PdfError::Structure("no documents to merge".into()));
    }

    let mut loaded = Vec::with_capacity(documents.len());
    for (i, bytes) in documents.iter().enumerate() {
        let doc = Document::load_mem(bytes)
            .map_err(|e| PdfError::Structure(format!("document {}: {}", i, e)))?;
        loaded.push(doc);
    }

    let mut dest = loaded.remove(0);
    let mut dest_max_id = dest.max_id;
    let mut page_refs: Vec<ObjectId> = dest.get_pages().values().copied().collect();

    for source in loaded {
        let source_pages: Vec<ObjectId> = source.get_pages().values().copied().collect();
        let offset = dest_max_id;

        let mut remapped = BTreeMap::new();
        for (old_id, object) in source.objects.into_iter() {
            remapped.insert((old_id.0 + offset, old_id.1), remap_refs(object, offset));
        }
        dest.objects.extend(remapped);

        page_refs.extend(source_pages.iter().map(|id| (id.0 + offset, id.1)));
        dest_max_id = (source.max_id + offset).max(dest_max_id);
    }

    dest.max_id = dest_max_id;
    rebuild_page_tree(&mut dest, &page_refs)?;
    dest.prune_objects();
    dest.compress();

    let mut buffer = Vec::new();
    dest.save_to(&mut buffer)
        .map_err(|e| PdfError::Structure(format!("save merged PDF: {}", e)))?;
    Ok(buffer)
}

fn remap_refs(obj: Object, offset: u32) -> Object {
    match obj {
        Object::Reference(id) => Object::Reference((id.0 + offset, id.1)),
        Object::Array(arr) => Object::Array(arr.into_iter().map(|o| remap_refs(o, offset)).collect()),
        Object::Dictionary(mut dict) => {
            for (_, value) in dict.iter_mut() {
                *value = remap_refs(value.clone(), offset);
            }
            Object::Dictionary(dict)
        }
        Object::Stream(mut stream) => {
            for (_, value) in stream.dict.iter_mut() {
                *value = remap_refs(value.clone(), offset);
            }
            Object::Stream(stream)
        }
        other => other,
    }
}

fn pages_root(doc: &Document) -> Result<ObjectId, PdfError> {
    let catalog_id = doc
        .trailer
        .get(b"Root")
        .and_then(Object::as_reference)
        .map_err(|_| PdfError::Structure("no Root in trailer".into()))?;
    doc.get_dictionary(catalog_id)
        .and_then(|catalog| catalog.get(b"Pages"))
        .and_then(Object::as_reference)
        .map_err(|_| PdfError::Structure("catalog has no Pages".into()))
}

fn rebuild_page_tree(doc: &mut Document, page_refs: &[ObjectId]) -> Result<(), PdfError> {
    let pages_id = pages_root(doc)?;

    for page_id in page_refs {
        if let Ok(page) = doc.get_dictionary_mut(*page_id) {
            page.set("Parent", Object::Reference(pages_id));
        }
    }

    let pages = doc
        .get_dictionary_mut(pages_id)
        .map_err(|_| PdfError::Structure("invalid pages dictionary".into()))?;
    pages.set(
        "Kids",
        Object::Array(page_refs.iter().map(|id| Object::Reference(*id)).collect()),
    );
    pages.set("Count", Object::Integer(page_refs.len() as i64));
    Ok(())
}
