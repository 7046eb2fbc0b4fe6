use crate::files::pdf;
use crate::files::spreadsheet::SheetRow;
use crate::files::DocumentLocator;
use crate::models::{AllocationGroup, CategoryPrefix, DocumentIndex, GroupStatus, ReportRow};
use crate::service::annotator::{annotation_lines, Annotator};
use crate::service::currency;
use crate::service::hooks::RunHooks;
use bigdecimal::{BigDecimal, Zero};
use std::path::{Path, PathBuf};

/// DACTE 首页出现该文字时视为补充单据
const COMPLEMENT_TEXT: &str = "COMPLEMENTO";

/// 金额核对结果
#[derive(Debug, Clone, PartialEq)]
pub enum Reconciliation {
    /// 没有权威金额, 不做核对
    Unchecked,
    Balanced,
    /// 差额整体加到 index 行
    Adjusted { index: usize, difference: BigDecimal },
    Divergent { difference: BigDecimal },
}

/// 把分组内的行转成分摊行: 金额无效或 <= 0, 或操作类型不认识的行丢弃
pub fn build_lines(document_number: &str, rows: &[SheetRow]) -> AllocationGroup {
    let mut group = AllocationGroup::new(document_number);
    for row in rows {
        let Some(value) = currency::parse(row.amount.as_amount()) else {
            tracing::debug!("CT-e {} line {}: no amount", document_number, row.line);
            continue;
        };
        if value <= BigDecimal::zero() {
            continue;
        }
        let Some(prefix) = CategoryPrefix::classify(&row.operation) else {
            tracing::debug!(
                "CT-e {} line {}: operation '{}' not allocated",
                document_number,
                row.line,
                row.operation
            );
            continue;
        };
        group.push(prefix, currency::round_cents(&value));
    }
    group
}

/// 差额 = 权威金额 - 分摊合计 (都按两位小数 HALF_UP)
///
/// |差额| <= tolerance 时整个差额加到金额最小的一行 (并列取第一行);
/// 超出时为 Divergent, 分摊行保持不变。
pub fn reconcile(
    group: &mut AllocationGroup,
    authoritative: Option<&BigDecimal>,
    tolerance: &BigDecimal,
) -> Reconciliation {
    let Some(total) = authoritative else {
        return Reconciliation::Unchecked;
    };
    let sum = currency::round_cents(&group.total());
    let difference = currency::round_cents(&(currency::round_cents(total) - sum));

    if difference.is_zero() {
        return Reconciliation::Balanced;
    }
    if difference.abs() > *tolerance {
        return Reconciliation::Divergent { difference };
    }

    let Some(index) = group.smallest_line() else {
        return Reconciliation::Divergent { difference };
    };
    let line = &mut group.lines[index];
    line.value = currency::round_cents(&(&line.value + &difference));
    Reconciliation::Adjusted { index, difference }
}

/// 单个分组的处理结果
#[derive(Debug, Clone)]
pub struct GroupOutcome {
    pub row: ReportRow,
    /// 成功时生成的 PDF
    pub output: Option<PathBuf>,
    /// 成功时对应的 XML
    pub record_path: Option<PathBuf>,
    pub adjusted: bool,
    pub complement_flagged: bool,
}

impl GroupOutcome {
    fn failed(row: ReportRow) -> Self {
        Self {
            row,
            output: None,
            record_path: None,
            adjusted: false,
            complement_flagged: false,
        }
    }

    pub fn status(&self) -> GroupStatus {
        self.row.status
    }
}

pub struct Reconciler<'a> {
    index: &'a DocumentIndex,
    locator: &'a DocumentLocator,
    annotator: Annotator<'a>,
    output_dir: &'a Path,
    output_suffix: &'a str,
    tolerance: BigDecimal,
}

impl<'a> Reconciler<'a> {
    pub fn new(
        index: &'a DocumentIndex,
        locator: &'a DocumentLocator,
        annotator: Annotator<'a>,
        output_dir: &'a Path,
        output_suffix: &'a str,
        tolerance: BigDecimal,
    ) -> Self {
        Self {
            index,
            locator,
            annotator,
            output_dir,
            output_suffix,
            tolerance,
        }
    }

    /// "<stem><suffix>.pdf"
    pub fn output_path(&self, located: &Path) -> PathBuf {
        let stem = located
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        self.output_dir.join(format!("{}{}.pdf", stem, self.output_suffix))
    }

    pub fn process_group(
        &self,
        document_number: &str,
        rows: &[SheetRow],
        hooks: &dyn RunHooks,
    ) -> GroupOutcome {
        let Some(record) = self.index.get(document_number) else {
            hooks.log(&format!("❌ Chave não encontrada para CT-e {}", document_number));
            tracing::warn!("CT-e {}: no structured record", document_number);
            return GroupOutcome::failed(ReportRow::new(
                document_number,
                GroupStatus::KeyMissing,
                "fiscal key not found",
            ));
        };
        let key = &record.fiscal_key;

        let Some(located) = self.locator.locate(key) else {
            hooks.log(&format!("❌ PDF não encontrado para CT-e {} ({})", document_number, key));
            tracing::warn!("CT-e {}: no PDF for key {}", document_number, key);
            let mut row = ReportRow::new(document_number, GroupStatus::DocMissing, "document not found");
            row.authoritative_value = record.authoritative_total.clone();
            return GroupOutcome::failed(row);
        };

        let complement_flagged = pdf::first_page_text(located)
            .map(|text| text.to_uppercase().contains(COMPLEMENT_TEXT))
            .unwrap_or(false);
        if complement_flagged {
            hooks.log(&format!("⚠️ CT-e {} parece ser complemento", document_number));
        }

        let mut group = build_lines(document_number, rows);
        if group.is_empty() {
            hooks.log(&format!("⚠️ CT-e {} sem linhas válidas", document_number));
            tracing::info!("CT-e {}: no valid allocation lines", document_number);
            let mut row = ReportRow::new(document_number, GroupStatus::NoValidLines, "no valid lines");
            row.authoritative_value = record.authoritative_total.clone();
            let mut outcome = GroupOutcome::failed(row);
            outcome.complement_flagged = complement_flagged;
            return outcome;
        }

        let reconciliation = reconcile(
            &mut group,
            record.authoritative_total.as_ref(),
            &self.tolerance,
        );
        let mut row = ReportRow::new(document_number, GroupStatus::Success, "");
        row.authoritative_value = record.authoritative_total.clone();
        row.allocated_sum = Some(currency::round_cents(&group.total()));

        let mut adjusted = false;
        match &reconciliation {
            Reconciliation::Unchecked => {
                tracing::info!("CT-e {}: no authoritative total, values not checked", document_number);
                row.message = "authoritative total unavailable".to_string();
            }
            Reconciliation::Balanced => {}
            Reconciliation::Adjusted { index, difference } => {
                adjusted = true;
                row.difference = Some(difference.clone());
                let line = &group.lines[*index];
                hooks.log(&format!(
                    "🔧 CT-e {}: ajuste de {} aplicado na linha {}",
                    document_number,
                    currency::format(Some(difference)),
                    line.prefix
                ));
                row.message = format!("rounding adjustment {} on {}", currency::format(Some(difference)), line.prefix);
            }
            Reconciliation::Divergent { difference } => {
                hooks.log(&format!(
                    "❌ CT-e {}: divergência de R$ {} (XML {} x planilha {})",
                    document_number,
                    currency::format(Some(difference)),
                    currency::format(record.authoritative_total.as_ref()),
                    currency::format(row.allocated_sum.as_ref())
                ));
                tracing::warn!("CT-e {}: divergence {}", document_number, difference);
                row.status = GroupStatus::Divergent;
                row.difference = Some(difference.clone());
                row.message = format!("difference {} exceeds tolerance", currency::format(Some(difference)));
                let mut outcome = GroupOutcome::failed(row);
                outcome.complement_flagged = complement_flagged;
                return outcome;
            }
        }
        if complement_flagged {
            append_message(&mut row.message, "document mentions COMPLEMENTO");
        }

        let lines = annotation_lines(&group);
        let output = self.output_path(located);
        if let Err(e) = self.annotator.annotate(&lines, located, &output) {
            hooks.log(&format!("❌ Erro ao gerar PDF do CT-e {}: {}", document_number, e));
            tracing::error!("CT-e {}: annotation failed: {}", document_number, e);
            row.status = GroupStatus::Exception;
            append_message(&mut row.message, &e.to_string());
            let mut outcome = GroupOutcome::failed(row);
            outcome.adjusted = adjusted;
            outcome.complement_flagged = complement_flagged;
            return outcome;
        }

        hooks.log(&format!("✅ CT-e {} rateado", document_number));
        tracing::info!("CT-e {} -> {}", document_number, output.display());
        row.output_file = output
            .file_name()
            .map(|n| n.to_string_lossy().into_owned());
        GroupOutcome {
            row,
            output: Some(output),
            record_path: Some(record.path.clone()),
            adjusted,
            complement_flagged,
        }
    }
}

fn append_message(message: &mut String, extra: &str) {
    if !message.is_empty() {
        message.push_str("; ");
    }
    message.push_str(extra);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RateioSettings;
    use crate::files::pdf::tests::create_test_pdf;
    use crate::files::spreadsheet::CellValue;
    use crate::files::OutputFilter;
    use crate::models::{FiscalKey, StructuredRecord};
    use crate::service::hooks::NoopHooks;
    use pretty_assertions::assert_eq;
    use std::str::FromStr;

    const KEY_1001: &str = "35240112345678000190570010000010011000010010";

    fn dec(s: &str) -> BigDecimal {
        BigDecimal::from_str(s).unwrap()
    }

    fn cent() -> BigDecimal {
        dec("0.01")
    }

    fn row(line: usize, amount: &str, operation: &str) -> SheetRow {
        SheetRow {
            line,
            document_number: "1001".to_string(),
            amount: CellValue::Text(amount.to_string()),
            operation: operation.to_string(),
        }
    }

    fn values(group: &AllocationGroup) -> Vec<BigDecimal> {
        group.lines.iter().map(|l| l.value.clone()).collect()
    }

    #[test]
    fn test_build_lines_filters_rows() {
        let group = build_lines(
            "1001",
            &[
                row(2, "150,00", "VENDA MERCADORIA"),
                row(3, "-", "VENDA"),
                row(4, "0,00", "VENDA"),
                row(5, "-3,00", "VENDA"),
                row(6, "10,00", "DEVOLUCAO"),
                row(7, "0,01", "Bonificação"),
                row(8, "2,345", "amostra grátis"),
            ],
        );
        let prefixes: Vec<CategoryPrefix> = group.lines.iter().map(|l| l.prefix).collect();
        assert_eq!(prefixes, vec![CategoryPrefix::V, CategoryPrefix::B, CategoryPrefix::A]);
        assert_eq!(values(&group), vec![dec("150.00"), dec("0.01"), dec("2.35")]);
    }

    #[test]
    fn test_balanced_group_unchanged() {
        let mut group = build_lines("1001", &[row(2, "100,00", "VENDA"), row(3, "50,02", "BONIF")]);
        let result = reconcile(&mut group, Some(&dec("150.02")), &cent());
        assert_eq!(result, Reconciliation::Balanced);
        assert_eq!(values(&group), vec![dec("100.00"), dec("50.02")]);
    }

    #[test]
    fn test_one_cent_goes_to_smallest_line() {
        let mut group = build_lines("1001", &[row(2, "150,00", "VENDA"), row(3, "0,01", "BONIFICAÇÃO")]);
        let result = reconcile(&mut group, Some(&dec("150.02")), &cent());
        assert_eq!(
            result,
            Reconciliation::Adjusted {
                index: 1,
                difference: dec("0.01")
            }
        );
        assert_eq!(values(&group), vec![dec("150.00"), dec("0.02")]);
        assert_eq!(group.total(), dec("150.02"));
    }

    #[test]
    fn test_negative_adjustment_and_tie_takes_first() {
        let mut group = build_lines(
            "1001",
            &[row(2, "5,00", "VENDA"), row(3, "5,00", "BONIF"), row(4, "9,00", "AMOSTRA")],
        );
        let result = reconcile(&mut group, Some(&dec("18.99")), &cent());
        assert_eq!(
            result,
            Reconciliation::Adjusted {
                index: 0,
                difference: dec("-0.01")
            }
        );
        assert_eq!(values(&group), vec![dec("4.99"), dec("5.00"), dec("9.00")]);
    }

    #[test]
    fn test_beyond_tolerance_is_divergent() {
        let mut group = build_lines("1001", &[row(2, "150,00", "VENDA")]);
        let result = reconcile(&mut group, Some(&dec("200.00")), &cent());
        assert_eq!(result, Reconciliation::Divergent { difference: dec("50.00") });
        assert_eq!(values(&group), vec![dec("150.00")]);

        // 两分钱也超出容差
        let result = reconcile(&mut group, Some(&dec("150.02")), &cent());
        assert_eq!(result, Reconciliation::Divergent { difference: dec("0.02") });
    }

    #[test]
    fn test_missing_total_is_unchecked() {
        let mut group = build_lines("1001", &[row(2, "1,00", "VENDA")]);
        assert_eq!(reconcile(&mut group, None, &cent()), Reconciliation::Unchecked);
    }

    struct Fixture {
        dir: tempfile::TempDir,
        index: DocumentIndex,
        settings: RateioSettings,
    }

    impl Fixture {
        fn new(total: Option<&str>, first_page: &str) -> Self {
            let dir = tempfile::tempdir().unwrap();
            std::fs::create_dir_all(dir.path().join("split")).unwrap();
            std::fs::create_dir_all(dir.path().join("out")).unwrap();
            std::fs::write(
                dir.path().join("split").join(format!("{}-procCTe.pdf", KEY_1001)),
                create_test_pdf(&[first_page]),
            )
            .unwrap();

            let mut index = DocumentIndex::new();
            index.insert_first(StructuredRecord {
                path: dir.path().join("1001.xml"),
                fiscal_key: FiscalKey::parse(KEY_1001).unwrap(),
                document_number: "1001".to_string(),
                authoritative_total: total.map(dec),
                classification: Some("0".to_string()),
                has_complement_marker: false,
            });
            Self {
                dir,
                index,
                settings: RateioSettings::default(),
            }
        }

        fn run(&self, doc: &str, rows: &[SheetRow]) -> GroupOutcome {
            let split = self.dir.path().join("split");
            let out = self.dir.path().join("out");
            let locator = DocumentLocator::build(&[&split], &OutputFilter::default());
            let reconciler = Reconciler::new(
                &self.index,
                &locator,
                Annotator::new(&self.settings.overlay),
                &out,
                &self.settings.output_suffix,
                self.settings.tolerance(),
            );
            reconciler.process_group(doc, rows, &NoopHooks)
        }

        fn output_files(&self) -> Vec<PathBuf> {
            crate::files::locator::list_pdfs(&self.dir.path().join("out"))
        }
    }

    #[test]
    fn test_success_writes_annotated_pdf() {
        let fx = Fixture::new(Some("150.02"), "DACTE");
        let outcome = fx.run("1001", &[row(2, "150,00", "VENDA"), row(3, "0,01", "BONIFICAÇÃO")]);

        assert_eq!(outcome.status(), GroupStatus::Success);
        assert!(outcome.adjusted);
        assert!(!outcome.complement_flagged);
        let expected = fx
            .dir
            .path()
            .join("out")
            .join(format!("{}-procCTe_rateado.pdf", KEY_1001));
        assert_eq!(outcome.output.as_deref(), Some(expected.as_path()));
        assert_eq!(outcome.row.allocated_sum, Some(dec("150.02")));
        assert_eq!(fx.output_files(), vec![expected.clone()]);

        let text = pdf::load(&expected).unwrap().extract_text(&[1]).unwrap();
        assert!(text.contains("V: R$ 150,00"));
        assert!(text.contains("B: R$ 0,02"));
    }

    #[test]
    fn test_divergent_produces_no_output() {
        let fx = Fixture::new(Some("200.00"), "DACTE");
        let outcome = fx.run("1001", &[row(2, "150,00", "VENDA")]);
        assert_eq!(outcome.status(), GroupStatus::Divergent);
        assert_eq!(outcome.row.difference, Some(dec("50.00")));
        assert!(outcome.output.is_none());
        assert!(fx.output_files().is_empty());
    }

    #[test]
    fn test_unknown_document_number_is_key_missing() {
        let fx = Fixture::new(Some("10.00"), "DACTE");
        let outcome = fx.run("9999", &[row(2, "10,00", "VENDA")]);
        assert_eq!(outcome.status(), GroupStatus::KeyMissing);
    }

    #[test]
    fn test_missing_pdf_is_doc_missing() {
        let fx = Fixture::new(Some("10.00"), "DACTE");
        std::fs::remove_file(
            fx.dir
                .path()
                .join("split")
                .join(format!("{}-procCTe.pdf", KEY_1001)),
        )
        .unwrap();
        let outcome = fx.run("1001", &[row(2, "10,00", "VENDA")]);
        assert_eq!(outcome.status(), GroupStatus::DocMissing);
    }

    #[test]
    fn test_no_valid_lines() {
        let fx = Fixture::new(Some("10.00"), "DACTE");
        let outcome = fx.run("1001", &[row(2, "10,00", "FRETE"), row(3, "", "VENDA")]);
        assert_eq!(outcome.status(), GroupStatus::NoValidLines);
        assert!(fx.output_files().is_empty());
    }

    #[test]
    fn test_complement_text_is_flagged() {
        let fx = Fixture::new(Some("10.00"), "DACTE COMPLEMENTO DE VALORES");
        let outcome = fx.run("1001", &[row(2, "10,00", "VENDA")]);
        assert_eq!(outcome.status(), GroupStatus::Success);
        assert!(outcome.complement_flagged);
        assert!(outcome.row.message.contains("COMPLEMENTO"));
    }

    #[test]
    fn test_corrupt_pdf_is_exception() {
        let fx = Fixture::new(Some("10.00"), "DACTE");
        std::fs::write(
            fx.dir
                .path()
                .join("split")
                .join(format!("{}-procCTe.pdf", KEY_1001)),
            b"%PDF-1.5 broken",
        )
        .unwrap();
        let outcome = fx.run("1001", &[row(2, "10,00", "VENDA")]);
        assert_eq!(outcome.status(), GroupStatus::Exception);
        assert!(outcome.output.is_none());
    }
}
