pub mod allocation;
pub mod fiscal_key;
pub mod record;
pub mod summary;

pub use allocation::{AllocationGroup, AllocationLine, CategoryPrefix};
pub use fiscal_key::{
    is_valid_fiscal_key, normalize_document_number, FiscalKey, KeyError, FISCAL_KEY_LEN,
};
pub use record::{Classification, DocumentIndex, StructuredRecord};
pub use summary::{format_elapsed, GroupStatus, ReportRow, RunOutcome, RunSummary};
