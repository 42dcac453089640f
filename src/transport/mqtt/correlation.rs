//! Outstanding request ids and the operation each one expects an answer to.
//!
//! Twin GET and reported PATCH responses share one topic namespace
//! (`$iothub/twin/res/{status}`), so only the request id recorded here tells
//! them apart. Entries are single-use: [`CorrelationTable::take`] removes the
//! entry it returns. Long-lived subscriptions are never recorded.

use crate::dispatch::Operation;
use crate::error::{Error, Result};
use log::debug;
use std::collections::HashMap;

/// What a correlated twin response turned out to answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TwinResponseKind {
    /// Full twin document.
    Get,
    /// Acknowledgement of a reported-properties patch.
    UpdateReported,
}

impl TwinResponseKind {
    /// The response type for a recorded operation.
    pub fn for_operation(operation: Operation) -> Result<Self> {
        match operation {
            Operation::TwinGet => Ok(TwinResponseKind::Get),
            Operation::TwinUpdateReported => Ok(TwinResponseKind::UpdateReported),
            other => Err(Error::OperationMismatch(other)),
        }
    }
}

/// `request id → expected operation` for in-flight requests.
#[derive(Debug, Default)]
pub struct CorrelationTable {
    entries: HashMap<String, Operation>,
}

impl CorrelationTable {
    /// Empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a request before it is handed to the wire.
    pub fn put(&mut self, request_id: impl Into<String>, operation: Operation) {
        self.entries.insert(request_id.into(), operation);
    }

    /// Removes and returns the entry for `request_id`.
    ///
    /// # Errors
    ///
    /// [`Error::UnknownRequestId`] if nothing was recorded under that id.
    pub fn take(&mut self, request_id: &str) -> Result<Operation> {
        self.entries
            .remove(request_id)
            .ok_or_else(|| Error::UnknownRequestId(request_id.to_string()))
    }

    /// Drops an entry without resolving it, e.g. after a failed publish.
    pub fn forget(&mut self, request_id: &str) {
        self.entries.remove(request_id);
    }

    /// Drops every entry; used when the session they belong to is gone.
    pub fn clear(&mut self) -> usize {
        let dropped = self.entries.len();
        if dropped > 0 {
            debug!("dropping {dropped} outstanding request id(s)");
        }
        self.entries.clear();
        dropped
    }

    /// A request is outstanding under `request_id`.
    pub fn contains(&self, request_id: &str) -> bool {
        self.entries.contains_key(request_id)
    }

    /// Outstanding requests.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Nothing outstanding.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entries_are_single_use() {
        let mut table = CorrelationTable::new();
        table.put("1", Operation::TwinGet);
        assert_eq!(table.take("1").unwrap(), Operation::TwinGet);
        assert!(matches!(table.take("1"), Err(Error::UnknownRequestId(id)) if id == "1"));
    }

    #[test]
    fn unknown_id_is_reported() {
        let mut table = CorrelationTable::new();
        table.put("1", Operation::TwinGet);
        assert!(table.take("2").is_err());
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn recorded_operation_selects_response_kind() {
        assert_eq!(
            TwinResponseKind::for_operation(Operation::TwinGet).unwrap(),
            TwinResponseKind::Get
        );
        assert_eq!(
            TwinResponseKind::for_operation(Operation::TwinUpdateReported).unwrap(),
            TwinResponseKind::UpdateReported
        );
        assert!(matches!(
            TwinResponseKind::for_operation(Operation::MethodResponse),
            Err(Error::OperationMismatch(Operation::MethodResponse))
        ));
    }

    #[test]
    fn clear_reports_dropped_count() {
        let mut table = CorrelationTable::new();
        table.put("1", Operation::TwinGet);
        table.put("2", Operation::TwinUpdateReported);
        assert_eq!(table.clear(), 2);
        assert!(table.is_empty());
    }
}
