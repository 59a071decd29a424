//! Mapping of driver errors onto [`DocumentStoreError`].

use mongodb::error::{Error as MongoError, ErrorKind, WriteFailure};

use docbase_core::error::{DocumentStoreError, IndexedWriteFailure};

const DUPLICATE_KEY_CODE: i32 = 11000;
const NOT_SUPPORTED_IN_TRANSACTION: &str = "OperationNotSupportedInTransaction";

pub(crate) fn map_error(error: MongoError) -> DocumentStoreError {
    match error.kind.as_ref() {
        ErrorKind::Command(command) if command.code_name == NOT_SUPPORTED_IN_TRANSACTION => {
            DocumentStoreError::NotSupportedInTransaction(command.message.clone())
        }
        ErrorKind::InsertMany(failure) => match &failure.write_errors {
            Some(write_errors) if !write_errors.is_empty() => DocumentStoreError::PartialWrite(
                write_errors
                    .iter()
                    .map(|write_error| IndexedWriteFailure {
                        index: write_error.index,
                        code: write_error.code,
                        message: write_error.message.clone(),
                    })
                    .collect()
            ),
            _ => DocumentStoreError::Backend(error.to_string()),
        },
        ErrorKind::Write(WriteFailure::WriteError(write_error)) if write_error.code == DUPLICATE_KEY_CODE => {
            DocumentStoreError::DuplicateKey(write_error.message.clone())
        }
        ErrorKind::ServerSelection { .. }
        | ErrorKind::Io(_)
        | ErrorKind::DnsResolve { .. }
        | ErrorKind::Authentication { .. } => DocumentStoreError::Connection(error.to_string()),
        _ => DocumentStoreError::Backend(error.to_string()),
    }
}
