pub mod export;
pub mod get_status;

pub use export::{ExportQuery, ExportTarget};
pub use get_status::{GetStatusError, GetStatusQuery};
