pub mod locator;
pub mod pdf;
pub mod report;
pub mod spreadsheet;
pub mod xml_record;

pub use locator::{DocumentLocator, OutputFilter};
pub use pdf::UnifiedOutput;
pub use report::export_to_csv;
pub use spreadsheet::{load_rows, CellValue, SheetRow};
pub use xml_record::read_record;
