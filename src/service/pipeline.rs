use crate::config::RateioSettings;
use crate::error::{RateioError, Result};
use crate::files::locator::list_batch_pdfs;
use crate::files::{export_to_csv, DocumentLocator, OutputFilter, UnifiedOutput};
use crate::models::{GroupStatus, RunOutcome, RunSummary};
use crate::service::annotator::Annotator;
use crate::service::grouper;
use crate::service::hooks::RunHooks;
use crate::service::indexer;
use crate::service::reconciler::Reconciler;
use crate::service::scanner::BarcodeReader;
use crate::service::splitter::Splitter;
use chrono::Local;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// 一次运行的输入
#[derive(Debug, Clone, Deserialize)]
pub struct RunRequest {
    pub spreadsheet: PathBuf,
    /// 扫描件所在目录
    pub batch_dir: PathBuf,
    /// XML 目录, 缺省与 batch_dir 相同
    #[serde(default)]
    pub records_dir: Option<PathBuf>,
    pub output_dir: PathBuf,
    #[serde(default)]
    pub unified_output: bool,
    /// 成功后把 XML 移到 <output>/xml/
    #[serde(default)]
    pub move_records: bool,
    #[serde(default)]
    pub report_csv: bool,
}

impl RunRequest {
    pub fn records_dir(&self) -> &Path {
        self.records_dir.as_deref().unwrap_or(&self.batch_dir)
    }
}

/// 索引 -> 拆分 -> 核对, 三个阶段顺序执行
pub struct Pipeline {
    settings: RateioSettings,
    reader: Arc<dyn BarcodeReader>,
}

impl Pipeline {
    pub fn new(settings: RateioSettings, reader: Arc<dyn BarcodeReader>) -> Self {
        Self { settings, reader }
    }

    /// 只有前置条件失败返回 Err; 取消时返回 cancelled = true 的结果
    pub fn run(&self, request: &RunRequest, hooks: &dyn RunHooks) -> Result<RunOutcome> {
        let started_at = Local::now();
        tracing::info!(
            "Run started: spreadsheet {}, batch {}",
            request.spreadsheet.display(),
            request.batch_dir.display()
        );

        if !request.batch_dir.is_dir() {
            return Err(RateioError::BatchDirMissing(request.batch_dir.clone()));
        }
        hooks.status("Lendo planilha...");
        let groups = grouper::load_groups(&request.spreadsheet, &self.settings.columns)?;
        std::fs::create_dir_all(&request.output_dir).map_err(|source| RateioError::OutputDir {
            path: request.output_dir.clone(),
            source,
        })?;

        let outputs = OutputFilter::new(
            &request.output_dir,
            &self.settings.output_suffix,
            &self.settings.unified_file_name,
        );
        let mut summary = RunSummary::default();

        // 1. 索引 XML
        hooks.status("Indexando XMLs...");
        let record_files = indexer::list_record_files(request.records_dir());
        let indexed = indexer::build_index(&record_files, hooks);
        summary.records_indexed = indexed.index.len();
        summary.records_ignored_complement = indexed.ignored_complement;
        summary.records_duplicate = indexed.duplicate;
        summary.records_invalid = indexed.invalid;
        let index = indexed.index;

        // 2. 按条码拆分
        let split_dir = request.batch_dir.join(&self.settings.split_dir_name);
        let mut split_created = false;
        if !index.is_empty() {
            match std::fs::create_dir_all(&split_dir) {
                Ok(()) => {
                    split_created = true;
                    let keys = index.fiscal_keys();
                    let batch_files = list_batch_pdfs(&request.batch_dir, &outputs);
                    hooks.log(&format!("📄 PDFs para leitura: {}", batch_files.len()));
                    let splitter = Splitter::new(
                        self.reader.as_ref(),
                        &keys,
                        &split_dir,
                        &self.settings.split_suffix,
                    );
                    let split = splitter.run(&batch_files, self.settings.split_workers.max(1), hooks);
                    summary.pages_scanned = split.pages_scanned;
                    summary.pages_split = split.pages_split + split.prenamed_copied;
                    summary.batch_files_failed = split.files_failed;

                    if split.cancelled {
                        hooks.log("⛔ Processamento cancelado durante a leitura dos PDFs");
                        remove_split_dir(&split_dir);
                        return Ok(finish(summary, Vec::new(), true, None, started_at));
                    }
                }
                Err(e) => {
                    hooks.log(&format!("❌ Não foi possível criar {}: {}", split_dir.display(), e));
                    tracing::error!("Cannot create split folder {}: {}", split_dir.display(), e);
                }
            }
        } else {
            tracing::warn!("No structured records indexed, skipping split");
        }

        // 3. 逐组核对
        let locator = DocumentLocator::build(
            &[split_dir.as_path(), request.batch_dir.as_path()],
            &outputs,
        );
        let reconciler = Reconciler::new(
            &index,
            &locator,
            Annotator::new(&self.settings.overlay),
            &request.output_dir,
            &self.settings.output_suffix,
            self.settings.tolerance(),
        );
        let mut unified = request
            .unified_output
            .then(|| UnifiedOutput::new(request.output_dir.join(&self.settings.unified_file_name)));
        let xml_dir = request.output_dir.join("xml");

        let mut report = Vec::with_capacity(groups.len());
        let mut cancelled = false;
        hooks.set_progress_max(groups.len());
        hooks.set_progress(0);

        for (position, (document_number, rows)) in groups.iter().enumerate() {
            if hooks.cancelled() {
                hooks.log("⛔ Processamento cancelado");
                cancelled = true;
                break;
            }
            hooks.status(&format!(
                "Processando CT-e {} ({} de {})",
                document_number,
                position + 1,
                groups.len()
            ));

            let outcome = reconciler.process_group(document_number, rows, hooks);
            summary.groups += 1;
            summary.record(outcome.status());
            if outcome.adjusted {
                summary.adjusted += 1;
            }
            if outcome.complement_flagged {
                summary.complement_flagged += 1;
            }

            if outcome.status() == GroupStatus::Success {
                if let (Some(acc), Some(output)) = (unified.as_mut(), outcome.output.as_deref()) {
                    if let Err(e) = acc.append_file(output) {
                        tracing::warn!("CT-e {}: not added to unified output: {}", document_number, e);
                    }
                }
                if request.move_records {
                    if let Some(record) = outcome.record_path.as_deref() {
                        move_record(record, &xml_dir);
                    }
                }
            }
            report.push(outcome.row);
            hooks.set_progress(position + 1);
        }

        let unified_output = match unified {
            Some(acc) => match acc.flush() {
                Ok(path) => {
                    if let Some(p) = &path {
                        hooks.log(&format!("📚 PDF unificado: {}", p.display()));
                    }
                    path
                }
                Err(e) => {
                    hooks.log(&format!("❌ Erro ao gerar PDF unificado: {}", e));
                    tracing::error!("Unified output failed: {}", e);
                    None
                }
            },
            None => None,
        };

        if request.report_csv {
            let path = request.output_dir.join(&self.settings.report_file_name);
            match export_to_csv(&report, &path) {
                Ok(()) => tracing::info!("Report written to {}", path.display()),
                Err(e) => tracing::warn!("Report {} not written: {}", path.display(), e),
            }
        }

        if split_created {
            remove_split_dir(&split_dir);
        }

        let outcome = finish(summary, report, cancelled, unified_output, started_at);
        hooks.log(&format!(
            "🏁 Concluído em {}: {} sucesso, {} sem chave, {} sem PDF, {} divergentes, {} erros",
            outcome.elapsed_text(),
            outcome.summary.success,
            outcome.summary.key_not_found,
            outcome.summary.document_not_found,
            outcome.summary.divergent,
            outcome.summary.exceptions
        ));
        Ok(outcome)
    }
}

fn finish(
    summary: RunSummary,
    report: Vec<crate::models::ReportRow>,
    cancelled: bool,
    unified_output: Option<PathBuf>,
    started_at: chrono::DateTime<Local>,
) -> RunOutcome {
    let outcome = RunOutcome {
        summary,
        report,
        cancelled,
        unified_output,
        started_at,
        finished_at: Local::now(),
    };
    tracing::info!(
        "Run finished in {}{}: {:?}",
        outcome.elapsed_text(),
        if cancelled { " (cancelled)" } else { "" },
        outcome.summary
    );
    outcome
}

fn remove_split_dir(dir: &Path) {
    if let Err(e) = std::fs::remove_dir_all(dir) {
        tracing::warn!("Split folder {} not removed: {}", dir.display(), e);
    }
}

/// rename 失败 (跨设备等) 时退回 copy + remove
fn move_record(record: &Path, xml_dir: &Path) {
    let Some(name) = record.file_name() else {
        return;
    };
    if let Err(e) = std::fs::create_dir_all(xml_dir) {
        tracing::warn!("Cannot create {}: {}", xml_dir.display(), e);
        return;
    }
    let target = xml_dir.join(name);
    if std::fs::rename(record, &target).is_ok() {
        return;
    }
    match std::fs::copy(record, &target).and_then(|_| std::fs::remove_file(record)) {
        Ok(()) => {}
        Err(e) => tracing::warn!("Record {} not moved: {}", record.display(), e),
    }
}
