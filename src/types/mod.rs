pub mod errors;
pub mod query_options;
pub mod record_id;
pub mod test_types;

pub use record_id::{LogAddress, RecordId};
