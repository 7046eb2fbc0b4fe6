use crate::error::PdfError;
use crate::files::pdf;
use crate::models::FiscalKey;
use crate::service::hooks::RunHooks;
use crate::service::scanner::BarcodeReader;
use dashmap::DashMap;
use lopdf::Document;
use rayon::prelude::*;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

/// 拆分统计
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SplitOutcome {
    pub pages_scanned: usize,
    pub pages_split: usize,
    pub prenamed_copied: usize,
    pub files_failed: usize,
    pub cancelled: bool,
}

impl SplitOutcome {
    fn absorb(&mut self, other: SplitOutcome) {
        self.pages_scanned += other.pages_scanned;
        self.pages_split += other.pages_split;
        self.prenamed_copied += other.prenamed_copied;
        self.files_failed += other.files_failed;
        self.cancelled |= other.cancelled;
    }
}

/// 按页识别 chave, 把关注的页面拆成 "<chave><suffix>.pdf"
///
/// 同一文件内逐页顺序处理; 多个文件可以在 rayon 线程池上并行,
/// 写文件前先在 `claimed` 中登记 chave, 且从不覆盖已有输出。
pub struct Splitter<'a> {
    reader: &'a dyn BarcodeReader,
    keys: &'a HashSet<FiscalKey>,
    output_dir: &'a Path,
    suffix: &'a str,
    claimed: DashMap<FiscalKey, (String, u32)>,
    pages_total: AtomicUsize,
    pages_done: AtomicUsize,
}

impl<'a> Splitter<'a> {
    pub fn new(
        reader: &'a dyn BarcodeReader,
        keys: &'a HashSet<FiscalKey>,
        output_dir: &'a Path,
        suffix: &'a str,
    ) -> Self {
        Self {
            reader,
            keys,
            output_dir,
            suffix,
            claimed: DashMap::new(),
            pages_total: AtomicUsize::new(0),
            pages_done: AtomicUsize::new(0),
        }
    }

    pub fn output_path(&self, key: &FiscalKey) -> PathBuf {
        self.output_dir.join(format!("{}{}.pdf", key, self.suffix))
    }

    /// 处理整批文件; 输出目录需已存在
    pub fn run(&self, files: &[PathBuf], workers: usize, hooks: &dyn RunHooks) -> SplitOutcome {
        let mut outcome = SplitOutcome::default();
        let (copied, to_scan) = self.copy_prenamed(files);
        outcome.prenamed_copied = copied;

        tracing::info!(
            "Splitting {} batch files ({} pre-named copied) into {}",
            to_scan.len(),
            copied,
            self.output_dir.display()
        );

        let results = if workers > 1 && to_scan.len() > 1 {
            match rayon::ThreadPoolBuilder::new().num_threads(workers).build() {
                Ok(pool) => pool.install(|| {
                    to_scan
                        .par_iter()
                        .map(|path| self.split_file(path, hooks))
                        .collect::<Vec<_>>()
                }),
                Err(e) => {
                    tracing::warn!("Split pool unavailable, scanning sequentially: {}", e);
                    self.run_sequential(&to_scan, hooks)
                }
            }
        } else {
            self.run_sequential(&to_scan, hooks)
        };

        for result in results {
            outcome.absorb(result);
        }
        tracing::info!(
            "Split finished: {} pages scanned, {} pages written, {} files failed{}",
            outcome.pages_scanned,
            outcome.pages_split,
            outcome.files_failed,
            if outcome.cancelled { " (cancelled)" } else { "" }
        );
        outcome
    }

    fn run_sequential(&self, files: &[PathBuf], hooks: &dyn RunHooks) -> Vec<SplitOutcome> {
        let mut results = Vec::with_capacity(files.len());
        for path in files {
            let result = self.split_file(path, hooks);
            let cancelled = result.cancelled;
            results.push(result);
            if cancelled {
                break;
            }
        }
        results
    }

    /// 已按 "<chave><suffix>.pdf" 命名的文件直接复制, 不再扫描
    fn copy_prenamed(&self, files: &[PathBuf]) -> (usize, Vec<PathBuf>) {
        let mut copied = 0;
        let mut to_scan = Vec::with_capacity(files.len());

        for path in files {
            let key = path
                .file_stem()
                .and_then(|s| s.to_str())
                .and_then(|stem| stem.strip_suffix(self.suffix))
                .and_then(|k| FiscalKey::parse(k).ok());
            let Some(key) = key else {
                to_scan.push(path.clone());
                continue;
            };
            if !self.keys.contains(&key) {
                continue;
            }

            let target = self.output_path(&key);
            if target.exists() || self.claimed.insert(key.clone(), (file_name(path), 0)).is_some() {
                continue;
            }
            match std::fs::copy(path, &target) {
                Ok(_) => copied += 1,
                Err(e) => {
                    self.claimed.remove(&key);
                    tracing::warn!("Cannot copy {} to split folder: {}", path.display(), e);
                }
            }
        }
        (copied, to_scan)
    }

    fn split_file(&self, path: &Path, hooks: &dyn RunHooks) -> SplitOutcome {
        let mut outcome = SplitOutcome::default();
        let name = file_name(path);
        hooks.status(&format!("Abrindo PDF: {}...", name));

        let doc = match pdf::load(path) {
            Ok(doc) => doc,
            Err(e) => {
                outcome.files_failed = 1;
                hooks.log(&format!("❌ Erro leitura PDF {}: {}", name, e));
                tracing::error!("Cannot open batch file {}: {}", name, e);
                return outcome;
            }
        };

        let total = pdf::page_count(&doc);
        if total == 0 {
            tracing::warn!("Batch file {} has no pages", name);
            return outcome;
        }
        let mut session = match self.reader.open(path, &doc) {
            Ok(session) => session,
            Err(e) => {
                outcome.files_failed = 1;
                hooks.log(&format!("❌ Erro leitura PDF {}: {}", name, e));
                tracing::error!("Cannot scan batch file {}: {}", name, e);
                return outcome;
            }
        };
        let max = self.pages_total.fetch_add(total as usize, Ordering::Relaxed) + total as usize;
        hooks.set_progress_max(max);

        for number in 1..=total {
            if hooks.cancelled() {
                hooks.status("Interrompendo leitura...");
                outcome.cancelled = true;
                break;
            }
            hooks.status(&format!("Lendo página {} de {}.", number, total));

            let payloads = session.read_page(number).unwrap_or_else(|e| {
                tracing::debug!("{} page {}: {}", name, number, e);
                Vec::new()
            });
            outcome.pages_scanned += 1;
            let done = self.pages_done.fetch_add(1, Ordering::Relaxed) + 1;
            hooks.set_progress(done);

            // 无法识别或不在关注范围的页面属于其他单据, 直接跳过
            let Some(key) = payloads
                .iter()
                .filter_map(|p| FiscalKey::from_barcode(p).ok())
                .find(|k| self.keys.contains(k))
            else {
                continue;
            };

            match self.write_page(&doc, number, &key, &name) {
                Ok(true) => {
                    outcome.pages_split += 1;
                    tracing::debug!("{} page {} -> {}", name, number, key);
                }
                Ok(false) => {}
                Err(e) => {
                    tracing::warn!("Cannot write page {} of {} for {}: {}", number, name, key, e)
                }
            }
        }
        outcome
    }

    fn write_page(
        &self,
        doc: &Document,
        number: u32,
        key: &FiscalKey,
        name: &str,
    ) -> Result<bool, PdfError> {
        let target = self.output_path(key);
        if target.exists() {
            return Ok(false);
        }
        if let Some((first_file, first_page)) =
            self.claimed.insert(key.clone(), (name.to_string(), number))
        {
            tracing::debug!(
                "Key {} already taken from {} page {}, skipping",
                key,
                first_file,
                first_page
            );
            return Ok(false);
        }

        let result = pdf::extract_page(doc, number).and_then(|mut single| pdf::write_new(&mut single, &target));
        if result.is_err() {
            self.claimed.remove(key);
        }
        result
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ScanError;
    use crate::files::pdf::tests::create_test_pdf;
    use crate::service::hooks::{CancelFlag, NoopHooks, TracingHooks};
    use crate::service::scanner::{PageSession, TextLayerReader};
    use pretty_assertions::assert_eq;

    const KEY_1001: &str = "35240112345678000190570010000010011000010010";
    const KEY_1002: &str = "35240112345678000190570010000010021000010020";
    const KEY_1003: &str = "35240112345678000190570010000010031000010030";

    fn keys(list: &[&str]) -> HashSet<FiscalKey> {
        list.iter().map(|k| FiscalKey::parse(k).unwrap()).collect()
    }

    fn setup() -> (tempfile::TempDir, PathBuf, Vec<PathBuf>) {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("_split_temp");
        std::fs::create_dir_all(&out).unwrap();

        let batch = dir.path().join("lote.pdf");
        let with_prefix = format!("CTe{}", KEY_1002);
        std::fs::write(
            &batch,
            create_test_pdf(&[KEY_1001, "pagina sem codigo", &with_prefix, KEY_1003]),
        )
        .unwrap();
        let broken = dir.path().join("quebrado.pdf");
        std::fs::write(&broken, b"not a pdf").unwrap();

        (dir, out, vec![batch, broken])
    }

    #[test]
    fn test_split_only_keys_of_interest() {
        let (_dir, out, files) = setup();
        let wanted = keys(&[KEY_1001, KEY_1002]);
        let splitter = Splitter::new(&TextLayerReader, &wanted, &out, "-procCTe");

        let outcome = splitter.run(&files, 1, &NoopHooks);
        assert_eq!(outcome.pages_scanned, 4);
        assert_eq!(outcome.pages_split, 2);
        assert_eq!(outcome.files_failed, 1);
        assert!(!outcome.cancelled);

        let written = crate::files::locator::list_pdfs(&out);
        assert_eq!(
            written,
            vec![
                out.join(format!("{}-procCTe.pdf", KEY_1001)),
                out.join(format!("{}-procCTe.pdf", KEY_1002)),
            ]
        );
        let single = pdf::load(&written[0]).unwrap();
        assert_eq!(pdf::page_count(&single), 1);
    }

    #[test]
    fn test_split_is_idempotent() {
        let (_dir, out, files) = setup();
        let wanted = keys(&[KEY_1001, KEY_1002]);

        Splitter::new(&TextLayerReader, &wanted, &out, "-procCTe").run(&files, 1, &NoopHooks);
        let first = std::fs::read(out.join(format!("{}-procCTe.pdf", KEY_1001))).unwrap();

        let again = Splitter::new(&TextLayerReader, &wanted, &out, "-procCTe").run(&files, 1, &NoopHooks);
        assert_eq!(again.pages_split, 0);
        assert_eq!(crate::files::locator::list_pdfs(&out).len(), 2);
        assert_eq!(
            std::fs::read(out.join(format!("{}-procCTe.pdf", KEY_1001))).unwrap(),
            first
        );
    }

    #[test]
    fn test_parallel_split_writes_each_key_once() {
        let (dir, out, mut files) = setup();
        // 第二个批次包含相同的 chave
        let copy = dir.path().join("lote2.pdf");
        std::fs::copy(&files[0], &copy).unwrap();
        files.push(copy);

        let wanted = keys(&[KEY_1001, KEY_1002, KEY_1003]);
        let outcome = Splitter::new(&TextLayerReader, &wanted, &out, "-procCTe").run(&files, 3, &NoopHooks);
        assert_eq!(outcome.pages_scanned, 8);
        assert_eq!(outcome.pages_split, 3);
        assert_eq!(crate::files::locator::list_pdfs(&out).len(), 3);
    }

    #[test]
    fn test_prenamed_file_is_copied() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("split");
        std::fs::create_dir_all(&out).unwrap();
        let named = dir.path().join(format!("{}-procCTe.pdf", KEY_1001));
        std::fs::write(&named, create_test_pdf(&["sem texto de chave"])).unwrap();

        let wanted = keys(&[KEY_1001]);
        let outcome = Splitter::new(&TextLayerReader, &wanted, &out, "-procCTe").run(&[named], 1, &NoopHooks);
        assert_eq!(outcome.prenamed_copied, 1);
        assert_eq!(outcome.pages_scanned, 0);
        assert!(out.join(format!("{}-procCTe.pdf", KEY_1001)).exists());
    }

    /// 页面全部无法识别
    struct FailingReader;
    struct FailingSession;

    impl BarcodeReader for FailingReader {
        fn open<'a>(
            &'a self,
            _path: &'a Path,
            _document: &'a Document,
        ) -> Result<Box<dyn PageSession + 'a>, ScanError> {
            Ok(Box::new(FailingSession))
        }
    }

    impl PageSession for FailingSession {
        fn read_page(&mut self, number: u32) -> Result<Vec<String>, ScanError> {
            Err(ScanError::Render {
                page: number,
                reason: "no renderer".into(),
            })
        }
    }

    /// 记录 open 次数, 文件打不开时返回错误
    #[derive(Default)]
    struct CountingReader {
        text: TextLayerReader,
        opened: AtomicUsize,
        refuse: bool,
    }

    impl BarcodeReader for CountingReader {
        fn open<'a>(
            &'a self,
            path: &'a Path,
            document: &'a Document,
        ) -> Result<Box<dyn PageSession + 'a>, ScanError> {
            self.opened.fetch_add(1, Ordering::SeqCst);
            if self.refuse {
                return Err(ScanError::Unavailable("no renderer".into()));
            }
            self.text.open(path, document)
        }
    }

    #[test]
    fn test_unreadable_pages_are_skipped() {
        let (_dir, out, files) = setup();
        let wanted = keys(&[KEY_1001]);
        let outcome = Splitter::new(&FailingReader, &wanted, &out, "-procCTe").run(&files[..1], 1, &NoopHooks);
        assert_eq!(outcome.pages_scanned, 4);
        assert_eq!(outcome.pages_split, 0);
        assert_eq!(outcome.files_failed, 0);
    }

    #[test]
    fn test_each_file_opened_once() {
        let (_dir, out, files) = setup();
        let wanted = keys(&[KEY_1001, KEY_1002]);
        let reader = CountingReader::default();

        let outcome = Splitter::new(&reader, &wanted, &out, "-procCTe").run(&files[..1], 1, &NoopHooks);
        assert_eq!(outcome.pages_scanned, 4);
        assert_eq!(outcome.pages_split, 2);
        assert_eq!(reader.opened.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_file_that_cannot_be_opened_counts_as_failed() {
        let (_dir, out, files) = setup();
        let wanted = keys(&[KEY_1001]);
        let reader = CountingReader {
            refuse: true,
            ..Default::default()
        };

        let outcome = Splitter::new(&reader, &wanted, &out, "-procCTe").run(&files[..1], 1, &NoopHooks);
        assert_eq!(outcome.files_failed, 1);
        assert_eq!(outcome.pages_scanned, 0);
        assert!(crate::files::locator::list_pdfs(&out).is_empty());
    }

    #[test]
    fn test_cancel_stops_before_first_page() {
        let (_dir, out, files) = setup();
        let wanted = keys(&[KEY_1001]);
        let hooks = TracingHooks::new(CancelFlag::new());
        hooks.cancel_flag().cancel();

        let outcome = Splitter::new(&TextLayerReader, &wanted, &out, "-procCTe").run(&files, 1, &hooks);
        assert!(outcome.cancelled);
        assert_eq!(outcome.pages_scanned, 0);
        assert!(crate::files::locator::list_pdfs(&out).is_empty());
        assert_eq!(hooks.snapshot().maximum, 4);
    }
}
