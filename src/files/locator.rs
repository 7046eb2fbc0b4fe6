use crate::models::FiscalKey;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// 本工具写出的文件, 再次运行时不能当作输入
///
/// 输出目录可以与批次目录相同, 因此按文件名识别; 输出目录位于扫描目录之下时整个跳过。
#[derive(Debug, Clone, Default)]
pub struct OutputFilter {
    output_dir: Option<PathBuf>,
    suffix: String,
    unified_name: String,
}

impl OutputFilter {
    pub fn new(output_dir: &Path, suffix: &str, unified_name: &str) -> Self {
        Self {
            output_dir: Some(canonical(output_dir)),
            suffix: suffix.to_string(),
            unified_name: unified_name.to_string(),
        }
    }

    pub fn is_output(&self, path: &Path) -> bool {
        let stem_is_output = !self.suffix.is_empty()
            && path
                .file_stem()
                .map(|s| s.to_string_lossy().ends_with(self.suffix.as_str()))
                .unwrap_or(false);
        let is_unified = !self.unified_name.is_empty()
            && path
                .file_name()
                .map(|n| n.to_string_lossy() == self.unified_name.as_str())
                .unwrap_or(false);
        stem_is_output || is_unified
    }

    fn is_output_dir(&self, dir: &Path) -> bool {
        self.output_dir.as_deref() == Some(canonical(dir).as_path())
    }
}

fn canonical(path: &Path) -> PathBuf {
    path.canonicalize().unwrap_or_else(|_| path.to_path_buf())
}

/// chave -> PDF 路径, 每次运行构建一次
#[derive(Debug, Default)]
pub struct DocumentLocator {
    by_key: HashMap<FiscalKey, PathBuf>,
    /// 文件名不含 chave 的 PDF (文件名, 路径)
    unkeyed: Vec<(String, PathBuf)>,
}

impl DocumentLocator {
    /// 依次扫描目录 (含子目录), 先扫描到的优先; 跳过 `outputs` 识别出的文件
    pub fn build(dirs: &[&Path], outputs: &OutputFilter) -> Self {
        let mut locator = Self::default();
        for dir in dirs {
            let mut files = Vec::new();
            collect_pdfs(dir, outputs, &mut files);
            files.sort();
            for path in files {
                locator.add(path);
            }
        }
        tracing::debug!(
            "Document locator: {} keyed, {} unkeyed PDFs",
            locator.by_key.len(),
            locator.unkeyed.len()
        );
        locator
    }

    fn add(&mut self, path: PathBuf) {
        let Some(stem) = path.file_stem().map(|s| s.to_string_lossy().into_owned()) else {
            return;
        };
        match key_prefix(&stem) {
            Some(key) => {
                self.by_key.entry(key).or_insert(path);
            }
            None => self.unkeyed.push((stem, path)),
        }
    }

    /// 先按 chave 文件名, 再按 9 位编号子串
    pub fn locate(&self, key: &FiscalKey) -> Option<&Path> {
        if let Some(path) = self.by_key.get(key) {
            return Some(path.as_path());
        }
        let number = key.padded_document_number();
        self.unkeyed
            .iter()
            .find(|(stem, _)| stem.contains(number))
            .map(|(_, path)| path.as_path())
    }

    pub fn len(&self) -> usize {
        self.by_key.len() + self.unkeyed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// "<chave>-procCTe" 之类的文件名
fn key_prefix(stem: &str) -> Option<FiscalKey> {
    stem.get(..crate::models::FISCAL_KEY_LEN)
        .and_then(|prefix| FiscalKey::parse(prefix).ok())
}

fn is_pdf(path: &Path) -> bool {
    path.extension()
        .map(|e| e.eq_ignore_ascii_case("pdf"))
        .unwrap_or(false)
}

fn collect_pdfs(dir: &Path, outputs: &OutputFilter, out: &mut Vec<PathBuf>) {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            tracing::debug!("Skipping {}: {}", dir.display(), e);
            return;
        }
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            if !outputs.is_output_dir(&path) {
                collect_pdfs(&path, outputs, out);
            }
        } else if is_pdf(&path) && !outputs.is_output(&path) {
            out.push(path);
        }
    }
}

/// 目录下一层的 PDF 文件, 按名称排序
pub fn list_pdfs(dir: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = std::fs::read_dir(dir)
        .map(|entries| {
            entries
                .flatten()
                .map(|e| e.path())
                .filter(|p| p.is_file() && is_pdf(p))
                .collect()
        })
        .unwrap_or_default();
    files.sort();
    files
}

/// 批次目录中待扫描的 PDF, 不含上次运行的输出
pub fn list_batch_pdfs(dir: &Path, outputs: &OutputFilter) -> Vec<PathBuf> {
    let mut files = list_pdfs(dir);
    files.retain(|p| !outputs.is_output(p));
    files
}
