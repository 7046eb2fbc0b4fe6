use crate::models::ReportRow;
use crate::service::currency;
use std::path::Path;

const HEADER: &[&str] = &[
    "document_number",
    "status",
    "authoritative_value",
    "allocated_sum",
    "difference",
    "message",
    "output_file",
];

/// 导出单据报告到 CSV
pub fn export_to_csv(
    rows: &[ReportRow],
    output_path: &Path,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    use csv::Writer;
    use std::fs::File;

    let file = File::create(output_path)?;
    let mut writer = Writer::from_writer(file);
    writer.write_record(HEADER)?;

    for row in rows {
        let status = serde_json::to_value(row.status)?
            .as_str()
            .unwrap_or_default()
            .to_string();
        writer.write_record(&[
            row.document_number.clone(),
            status,
            money_to_csv(row.authoritative_value.as_ref()),
            money_to_csv(row.allocated_sum.as_ref()),
            money_to_csv(row.difference.as_ref()),
            row.message.clone(),
            row.output_file.clone().unwrap_or_default(),
        ])?;
    }

    writer.flush()?;
    Ok(())
}

fn money_to_csv(value: Option<&bigdecimal::BigDecimal>) -> String {
    value.map(|v| currency::format(Some(v))).unwrap_or_default()
}
