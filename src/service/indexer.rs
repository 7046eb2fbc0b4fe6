use crate::files::xml_record;
use crate::models::{Classification, DocumentIndex};
use crate::service::hooks::RunHooks;
use std::path::{Path, PathBuf};

/// 索引结果及各类被拒绝的计数
#[derive(Debug, Default)]
pub struct IndexOutcome {
    pub index: DocumentIndex,
    pub ignored_complement: usize,
    pub duplicate: usize,
    pub invalid: usize,
}

/// 目录下的 XML 文件, 按文件名排序 (先到先得依赖此顺序)
pub fn list_record_files(dir: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = std::fs::read_dir(dir)
        .map(|entries| {
            entries
                .flatten()
                .map(|e| e.path())
                .filter(|p| {
                    p.is_file()
                        && p.extension()
                            .map(|e| e.eq_ignore_ascii_case("xml"))
                            .unwrap_or(false)
                })
                .collect()
        })
        .unwrap_or_else(|e| {
            tracing::warn!("Cannot list records folder {}: {}", dir.display(), e);
            Vec::new()
        });
    files.sort();
    files
}

/// 建立 nCT -> 记录 索引
///
/// 只收录 tpCTe = 0 且无 infCteComp 的记录; 重复编号保留第一条。
pub fn build_index(files: &[PathBuf], hooks: &dyn RunHooks) -> IndexOutcome {
    let mut outcome = IndexOutcome::default();

    for path in files {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        let record = match xml_record::read_record(path) {
            Ok(record) => record,
            Err(err) => {
                outcome.invalid += 1;
                tracing::warn!("Record {} skipped: {}", name, err);
                continue;
            }
        };

        match record.classification() {
            Classification::Normal => {}
            Classification::Adjustment(code) => {
                outcome.ignored_complement += 1;
                hooks.log(&format!(
                    "ℹ️ CT-e {} ignorado — complemento/ajuste (tpCTe {})",
                    record.document_number, code
                ));
                continue;
            }
            Classification::Unknown => {
                outcome.ignored_complement += 1;
                hooks.log(&format!(
                    "ℹ️ CT-e {} ignorado: tpCTe ausente",
                    record.document_number
                ));
                continue;
            }
        }

        let number = record.document_number.clone();
        let key = record.fiscal_key.clone();
        if !outcome.index.insert_first(record) {
            outcome.duplicate += 1;
            tracing::info!("Duplicate CT-e {} in {} ignored (key {})", number, name, key);
        }
    }

    hooks.log(&format!("📌 XMLs indexados: {}", outcome.index.len()));
    tracing::info!(
        "Indexed {} records ({} complement, {} duplicate, {} invalid)",
        outcome.index.len(),
        outcome.ignored_complement,
        outcome.duplicate,
        outcome.invalid
    );
    outcome
}
