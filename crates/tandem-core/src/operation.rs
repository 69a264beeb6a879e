//! Units of work executed by the coordinator

use crate::classify::StoreError;
use crate::query::Query;
use crate::record::{Key, Record};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;

/// Fallible in-place change applied by `Mutate`
///
/// Returning an error rejects the change as a logic failure; the patch must
/// leave the body untouched in that case.
pub type Patch<T> = Arc<dyn Fn(&mut T) -> Result<(), StoreError> + Send + Sync>;

/// What a `Read` selects
#[derive(Debug, Clone)]
pub enum ReadFilter<T> {
    /// One record by key
    Key(Key),
    /// Every record a query matches
    Query(Query<T>),
}

/// One unit of work
pub enum Operation<T> {
    /// Fetch records
    Read(ReadFilter<T>),
    /// Insert (unkeyed record) or replace (keyed record)
    Write(Record<T>),
    /// Read-modify-write of one record
    Mutate(Key, Patch<T>),
    /// Remove one record
    Delete(Key),
}

/// Operation kind, for logs and events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    /// `Read`
    Read,
    /// `Write`
    Write,
    /// `Mutate`
    Mutate,
    /// `Delete`
    Delete,
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Read => write!(f, "read"),
            Self::Write => write!(f, "write"),
            Self::Mutate => write!(f, "mutate"),
            Self::Delete => write!(f, "delete"),
        }
    }
}

impl<T> Operation<T> {
    /// Read one record by key
    pub fn read_key(key: Key) -> Self {
        Self::Read(ReadFilter::Key(key))
    }

    /// Run a query
    pub fn read_query(query: Query<T>) -> Self {
        Self::Read(ReadFilter::Query(query))
    }

    /// Insert or replace a record
    pub fn write(record: Record<T>) -> Self {
        Self::Write(record)
    }

    /// Apply `patch` to the record stored under `key`
    pub fn mutate(
        key: Key,
        patch: impl Fn(&mut T) -> Result<(), StoreError> + Send + Sync + 'static,
    ) -> Self {
        Self::Mutate(key, Arc::new(patch))
    }

    /// Delete the record stored under `key`
    pub fn delete(key: Key) -> Self {
        Self::Delete(key)
    }

    /// Operation kind
    pub fn kind(&self) -> OperationKind {
        match self {
            Self::Read(_) => OperationKind::Read,
            Self::Write(_) => OperationKind::Write,
            Self::Mutate(..) => OperationKind::Mutate,
            Self::Delete(_) => OperationKind::Delete,
        }
    }

    /// Key the operation addresses, if any
    pub fn key(&self) -> Option<Key> {
        match self {
            Self::Read(ReadFilter::Key(key)) | Self::Mutate(key, _) | Self::Delete(key) => {
                Some(*key)
            }
            Self::Read(ReadFilter::Query(_)) => None,
            Self::Write(record) => record.key,
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for Operation<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Read(filter) => f.debug_tuple("Read").field(filter).finish(),
            Self::Write(record) => f.debug_tuple("Write").field(record).finish(),
            Self::Mutate(key, _) => f.debug_tuple("Mutate").field(key).field(&"<patch>").finish(),
            Self::Delete(key) => f.debug_tuple("Delete").field(key).finish(),
        }
    }
}

/// Value produced by a successful operation
#[derive(Debug, Clone, PartialEq)]
pub enum Output<T> {
    /// One record (`Read` by key, `Write`, `Mutate`)
    Record(Record<T>),
    /// Query results
    Records(Vec<Record<T>>),
    /// Key of the deleted record
    Deleted(Key),
}

impl<T> Output<T> {
    /// The single record, if this output carries one
    pub fn into_record(self) -> Option<Record<T>> {
        match self {
            Self::Record(record) => Some(record),
            _ => None,
        }
    }

    /// Every record this output carries
    pub fn into_records(self) -> Vec<Record<T>> {
        match self {
            Self::Record(record) => vec![record],
            Self::Records(records) => records,
            Self::Deleted(_) => Vec::new(),
        }
    }

    /// Key of the single record or deleted record
    pub fn key(&self) -> Option<Key> {
        match self {
            Self::Record(record) => record.key,
            Self::Records(_) => None,
            Self::Deleted(key) => Some(*key),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_and_key() {
        let op: Operation<u32> = Operation::read_key(Key::new(3));
        assert_eq!(op.kind(), OperationKind::Read);
        assert_eq!(op.key(), Some(Key::new(3)));

        let op: Operation<u32> = Operation::read_query(Query::all());
        assert_eq!(op.key(), None);

        let op = Operation::write(Record::new(1u32));
        assert_eq!(op.kind(), OperationKind::Write);
        assert_eq!(op.key(), None);

        let op = Operation::write(Record::new(1u32).with_key(Key::new(8)));
        assert_eq!(op.key(), Some(Key::new(8)));

        let op: Operation<u32> = Operation::mutate(Key::new(2), |v| {
            *v += 1;
            Ok(())
        });
        assert_eq!(op.kind(), OperationKind::Mutate);
        assert!(format!("{op:?}").contains("<patch>"));

        let op: Operation<u32> = Operation::delete(Key::new(5));
        assert_eq!(op.kind().to_string(), "delete");
    }

    #[test]
    fn test_output_accessors() {
        let record = Record::new("x").with_key(Key::new(1));
        assert_eq!(Output::Record(record.clone()).key(), Some(Key::new(1)));
        assert_eq!(Output::Record(record.clone()).into_records().len(), 1);
        assert_eq!(Output::<&str>::Deleted(Key::new(1)).into_record(), None);
        assert_eq!(Output::Records(vec![record.clone(), record]).into_records().len(), 2);
    }
}
