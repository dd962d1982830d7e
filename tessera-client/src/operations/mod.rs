mod check_object;
mod delete_object;
mod link_object;
mod read_object;
mod repair_object;
mod write_object;

pub use check_object::{CheckObjectOperation, CheckObjectOperationRequest};
pub use delete_object::{
    DeleteObjectOperation, DeleteObjectOperationOutcome, DeleteObjectOperationRequest,
};
pub use link_object::{
    LinkObjectOperation, LinkObjectOperationRequest, LinkObjectOperationResult,
};
pub use read_object::{ReadByteRange, ReadObjectOperation, ReadObjectOperationRequest};
pub use repair_object::{RepairObjectOperation, RepairObjectOperationRequest};
pub use write_object::{WriteObjectOperation, WriteObjectOperationRequest};

/// Current time as nanoseconds since the Unix epoch.
pub fn epoch_now() -> i64 {
    chrono::Utc::now()
        .timestamp_nanos_opt()
        .unwrap_or(i64::MAX)
}
