use aws_sdk_dynamodb::error::{BuildError, ProvideErrorMetadata};
use aws_sdk_dynamodb::operation::batch_write_item::BatchWriteItemError;
use aws_sdk_dynamodb::operation::create_table::CreateTableError;
use aws_sdk_dynamodb::operation::describe_table::DescribeTableError;
use aws_sdk_dynamodb::operation::list_tables::ListTablesError;
use aws_sdk_dynamodb::operation::put_item::PutItemError;
use aws_sdk_dynamodb::operation::query::QueryError;
use aws_sdk_dynamodb::operation::scan::ScanError;
use aws_sdk_dynamodb::operation::update_table::UpdateTableError;
use aws_smithy_runtime_api::client::result::SdkError;
use aws_smithy_runtime_api::http::Response;
use serde_dynamo::Error as SerdeDynamoError;
use std::error::Error as StdError;
use std::fmt;

use crate::schema::KeyElement;
use crate::table::Chunk;

type DynamoListTablesError = SdkError<ListTablesError, Response>;
type DynamoDescribeTableError = SdkError<DescribeTableError, Response>;
type DynamoCreateTableError = SdkError<CreateTableError, Response>;
type DynamoUpdateTableError = SdkError<UpdateTableError, Response>;
type DynamoQueryError = SdkError<QueryError, Response>;
type DynamoScanError = SdkError<ScanError, Response>;
type DynamoPutError = SdkError<PutItemError, Response>;
type DynamoBatchWriteItemError = SdkError<BatchWriteItemError, Response>;

/// Boxed source error carried by the classified variants
pub type BoxError = Box<dyn StdError + Send + Sync + 'static>;

/// Error codes the store uses to signal throttling or exhausted capacity
const THROTTLING_CODES: [&str; 3] = [
    "ProvisionedThroughputExceededException",
    "ThrottlingException",
    "RequestLimitExceeded",
];

/// Table client error
#[derive(Debug)]
pub enum Error {
    /// Serde DynamoDB serialization/deserialization error
    SerdeDynamo(SerdeDynamoError),
    /// DynamoDB request builder error
    BuildError(BuildError),
    /// The client could not be constructed or could not reach the store
    Connection(BoxError),
    /// The live key schema differs from the declared one
    SchemaConflict {
        /// Table name
        table: String,
        /// Declared key schema
        expected: Vec<KeyElement>,
        /// Key schema reported by the store
        live: Vec<KeyElement>,
    },
    /// The table did not become active within the polling bound
    ProvisioningTimeout {
        /// Table name
        table: String,
        /// Number of status polls issued
        polls: u32,
    },
    /// Transient capacity error from the store
    Throttling {
        /// Store operation that was throttled
        operation: &'static str,
        /// Underlying cause
        source: BoxError,
    },
    /// One or more chunks of a bulk write failed or were never dispatched
    PartialWrite(PartialWriteError),
    /// The declared schema is malformed
    InvalidSchema(String),
    /// An item is missing a key attribute or carries one with the wrong type
    InvalidItem {
        /// Position of the item in the submitted sequence
        index: usize,
        /// What is wrong with it
        reason: String,
    },
    /// A caller-supplied argument is out of range
    InvalidArgument(String),
    /// The table is already being created by someone else
    TableInUse(String),
    /// DynamoDB ListTables operation error
    DynamoListTablesError(DynamoListTablesError),
    /// DynamoDB DescribeTable operation error
    DynamoDescribeTableError(DynamoDescribeTableError),
    /// DynamoDB CreateTable operation error
    DynamoCreateTableError(DynamoCreateTableError),
    /// DynamoDB UpdateTable operation error
    DynamoUpdateTableError(DynamoUpdateTableError),
    /// DynamoDB Query operation error
    DynamoQueryError(DynamoQueryError),
    /// DynamoDB Scan operation error
    DynamoScanError(DynamoScanError),
    /// DynamoDB PutItem operation error
    DynamoPutError(DynamoPutError),
    /// DynamoDB BatchWriteItem operation error
    DynamoBatchWriteItemError(DynamoBatchWriteItemError),
}

impl Error {
    /// Builds a throttling error from a message
    pub fn throttling(operation: &'static str, message: impl Into<String>) -> Self {
        Error::Throttling {
            operation,
            source: message.into().into(),
        }
    }

    /// Builds a connection error from a message
    pub fn connection(message: impl Into<String>) -> Self {
        Error::Connection(message.into().into())
    }

    /// Check if the error signals throttling or exhausted capacity
    pub fn is_throttling(&self) -> bool {
        matches!(self, Error::Throttling { .. })
    }

    /// Check if the error is a connection failure
    pub fn is_connection_error(&self) -> bool {
        matches!(self, Error::Connection(_))
    }

    /// Check if retrying the same request may succeed
    pub fn is_retryable(&self) -> bool {
        self.is_throttling()
    }

    /// Check if the error is a serialization/deserialization error
    pub fn is_serialization_error(&self) -> bool {
        matches!(self, Error::SerdeDynamo(_))
    }

    /// Returns the partial write report, if this is a partial write
    pub fn as_partial_write(&self) -> Option<&PartialWriteError> {
        match self {
            Error::PartialWrite(partial) => Some(partial),
            _ => None,
        }
    }

    /// Classifies an SDK error into connection, throttling or operation errors
    pub(crate) fn from_sdk<E>(operation: &'static str, err: SdkError<E, Response>) -> Self
    where
        E: ProvideErrorMetadata + StdError + Send + Sync + 'static,
        Error: From<SdkError<E, Response>>,
    {
        if matches!(
            err,
            SdkError::DispatchFailure(_)
                | SdkError::TimeoutError(_)
                | SdkError::ConstructionFailure(_)
        ) {
            return Error::Connection(Box::new(err));
        }

        let throttled = err
            .as_service_error()
            .and_then(|e| e.code())
            .is_some_and(|code| THROTTLING_CODES.contains(&code));

        if throttled {
            return Error::Throttling {
                operation,
                source: Box::new(err),
            };
        }

        err.into()
    }
}

/// Chunk that exhausted its retries or hit a non-retryable error
#[derive(Debug)]
pub struct FailedChunk {
    /// The chunk, items included, for re-submission
    pub chunk: Chunk,
    /// Why it failed
    pub error: Error,
}

/// Aggregated failure report of a bulk write
#[derive(Debug, Default)]
pub struct PartialWriteError {
    /// Number of chunks written completely
    pub succeeded_chunks: usize,
    /// Chunks that were attempted and failed
    pub failed_chunks: Vec<FailedChunk>,
    /// Chunks never dispatched because the deadline elapsed
    pub undispatched_chunks: Vec<Chunk>,
}

impl PartialWriteError {
    /// Total number of chunks that need re-submission
    pub fn unwritten_chunk_count(&self) -> usize {
        self.failed_chunks.len() + self.undispatched_chunks.len()
    }

    /// Consumes the report and returns every chunk that needs re-submission
    pub fn into_resubmittable(self) -> Vec<Chunk> {
        self.failed_chunks
            .into_iter()
            .map(|failed| failed.chunk)
            .chain(self.undispatched_chunks)
            .collect()
    }
}

impl fmt::Display for PartialWriteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} chunks written, {} failed, {} not dispatched",
            self.succeeded_chunks,
            self.failed_chunks.len(),
            self.undispatched_chunks.len()
        )
    }
}

macro_rules! impl_from_error {
    ($name:ident, $variant:ident) => {
        impl From<$name> for Error {
            fn from(e: $name) -> Self {
                Error::$variant(e)
            }
        }
    };
    ($name:ident) => {
        impl From<$name> for Error {
            fn from(e: $name) -> Self {
                Error::$name(e)
            }
        }
    };
}

impl_from_error!(SerdeDynamoError, SerdeDynamo);
impl_from_error!(BuildError);
impl_from_error!(PartialWriteError, PartialWrite);
impl_from_error!(DynamoListTablesError);
impl_from_error!(DynamoDescribeTableError);
impl_from_error!(DynamoCreateTableError);
impl_from_error!(DynamoUpdateTableError);
impl_from_error!(DynamoQueryError);
impl_from_error!(DynamoScanError);
impl_from_error!(DynamoPutError);
impl_from_error!(DynamoBatchWriteItemError);

fn key_names(keys: &[KeyElement]) -> String {
    keys.iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::SerdeDynamo(e) => write!(f, "DynamoDB serialization error: {}", e),
            Error::BuildError(e) => write!(f, "DynamoDB request builder error: {}", e),
            Error::Connection(e) => write!(f, "DynamoDB connection failed: {}", e),
            Error::SchemaConflict {
                table,
                expected,
                live,
            } => write!(
                f,
                "key schema of table '{}' is [{}] but [{}] was declared",
                table,
                key_names(live),
                key_names(expected)
            ),
            Error::ProvisioningTimeout { table, polls } => write!(
                f,
                "table '{}' did not become active after {} polls",
                table, polls
            ),
            Error::Throttling { operation, source } => {
                write!(f, "DynamoDB {} throttled: {}", operation, source)
            }
            Error::PartialWrite(e) => write!(f, "bulk write incomplete: {}", e),
            Error::InvalidSchema(e) => write!(f, "invalid table schema: {}", e),
            Error::InvalidItem { index, reason } => {
                write!(f, "invalid item at position {}: {}", index, reason)
            }
            Error::InvalidArgument(e) => write!(f, "invalid argument: {}", e),
            Error::TableInUse(table) => write!(f, "table '{}' is already being created", table),
            Error::DynamoListTablesError(e) => {
                write!(f, "DynamoDB ListTables operation failed: {}", e)
            }
            Error::DynamoDescribeTableError(e) => {
                write!(f, "DynamoDB DescribeTable operation failed: {}", e)
            }
            Error::DynamoCreateTableError(e) => {
                write!(f, "DynamoDB CreateTable operation failed: {}", e)
            }
            Error::DynamoUpdateTableError(e) => {
                write!(f, "DynamoDB UpdateTable operation failed: {}", e)
            }
            Error::DynamoQueryError(e) => {
                write!(f, "DynamoDB Query operation failed: {}", e)
            }
            Error::DynamoScanError(e) => {
                write!(f, "DynamoDB Scan operation failed: {}", e)
            }
            Error::DynamoPutError(e) => {
                write!(f, "DynamoDB PutItem operation failed: {}", e)
            }
            Error::DynamoBatchWriteItemError(e) => {
                write!(f, "DynamoDB BatchWriteItem operation failed: {}", e)
            }
        }
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            Error::Connection(e) | Error::Throttling { source: e, .. } => Some(e.as_ref()),
            Error::SerdeDynamo(e) => Some(e),
            Error::BuildError(e) => Some(e),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_throttling_is_retryable() {
        let err = Error::throttling("BatchWriteItem", "slow down");
        assert!(err.is_throttling());
        assert!(err.is_retryable());
        assert!(!err.is_connection_error());
    }

    #[test]
    fn test_build_error_not_retryable() {
        let err: Error = BuildError::other("test").into();
        assert!(matches!(err, Error::BuildError(_)));
        assert!(!err.is_retryable());
        assert!(!err.is_serialization_error());
    }

    #[test]
    fn test_partial_write_resubmittable() {
        let partial = PartialWriteError {
            succeeded_chunks: 2,
            failed_chunks: vec![FailedChunk {
                chunk: Chunk::new(1, Vec::new()),
                error: Error::throttling("BatchWriteItem", "exhausted"),
            }],
            undispatched_chunks: vec![Chunk::new(3, Vec::new())],
        };
        assert_eq!(partial.unwritten_chunk_count(), 2);
        assert_eq!(
            partial.to_string(),
            "2 chunks written, 1 failed, 1 not dispatched"
        );

        let indexes: Vec<usize> = partial
            .into_resubmittable()
            .iter()
            .map(Chunk::index)
            .collect();
        assert_eq!(indexes, vec![1, 3]);
    }

    #[test]
    fn test_connection_display() {
        let err = Error::connection("no region configured");
        assert!(err.is_connection_error());
        assert_eq!(
            err.to_string(),
            "DynamoDB connection failed: no region configured"
        );
    }
}
