//! One underlying scan shared by several readers in lockstep.
//!
//! When two merge branches of a parallel node both need the same source
//! scan, each branch gets its own [`MultiScanNode`] reader handle over one
//! shared [`ScanNode`]. Reading proceeds in rounds:
//!
//! - the first reader to call `next()` in a round advances the real scan and
//!   caches the row
//! - every other reader's `next()` in that round returns the cached row
//! - a reader that asks for the next round before every open reader consumed
//!   the current one gets [`ExecError::ReaderOutOfStep`]
//!
//! So the real scan advances exactly once per logical row regardless of the
//! number of readers, and every reader sees the same document for a round.

use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::json;
use tracing::trace;

use super::scan::{ScanNode, ScanStats};
use crate::error::{Error, ExecError, PlanError};
use crate::storage::Span;
use dagdb_proto::Doc;

/// State shared by every handle of one multi-scan.
#[derive(Default)]
struct SharedScan {
    /// The real scan. Attached once the original scan has been lifted out of
    /// the plan tree.
    scan: Option<ScanNode>,
    /// Registered readers.
    readers: usize,
    /// Readers that have not been closed.
    open: usize,
    /// Round counter. Round 0 is the state right after `init`.
    round: u64,
    /// Open readers that consumed the current round.
    consumed: usize,
    /// Bumped every time the real scan is initialized.
    epoch: u64,
    /// Readers still expected to call `init` in the current epoch.
    pending_inits: usize,
    has_row: bool,
    current: Option<Doc>,
    /// Set once the first round was read; no readers may join after that.
    sealed: bool,
}

/// A handle onto a shared scan.
///
/// Handles created by [`MultiScanNode::add_reader`] are registered readers
/// and take part in round accounting. The handle returned by
/// [`MultiScanNode::new`] is the controller: it can add readers and report on
/// the shared scan, but cannot read.
pub struct MultiScanNode {
    shared: Arc<Mutex<SharedScan>>,
    reader: Option<usize>,
    /// Last round this reader consumed.
    seen: u64,
    /// Epoch this reader was last initialized in.
    epoch: u64,
    current: Option<Doc>,
    closed: bool,
}

impl MultiScanNode {
    /// Create the controller of a shared scan whose real scan is attached
    /// later with [`MultiScanNode::attach`].
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Mutex::new(SharedScan::default())),
            reader: None,
            seen: 0,
            epoch: 0,
            current: None,
            closed: true,
        }
    }

    /// Hand the real scan over to the shared state.
    pub fn attach(&self, scan: ScanNode) {
        self.shared.lock().scan = Some(scan);
    }

    /// Register a new reader.
    ///
    /// Fails once any reader started consuming rows.
    pub fn add_reader(&self) -> Result<MultiScanNode, PlanError> {
        let mut shared = self.shared.lock();
        if shared.sealed {
            return Err(PlanError::ReadersSealed);
        }
        let reader = shared.readers;
        shared.readers += 1;
        shared.open += 1;
        trace!(reader, readers = shared.readers, "Registered multiScanNode reader");

        Ok(Self {
            shared: Arc::clone(&self.shared),
            reader: Some(reader),
            seen: 0,
            epoch: shared.epoch,
            current: None,
            closed: false,
        })
    }

    /// Whether this handle is a registered reader.
    pub fn is_reader(&self) -> bool {
        self.reader.is_some()
    }

    /// Number of registered readers.
    pub fn readers(&self) -> usize {
        self.shared.lock().readers
    }

    /// Whether both handles share the same underlying scan.
    pub fn shares_scan_with(&self, other: &MultiScanNode) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }

    /// Counters of the real scan.
    pub fn stats(&self) -> ScanStats {
        self.shared
            .lock()
            .scan
            .as_ref()
            .map(ScanNode::stats)
            .unwrap_or_default()
    }

    /// Spans are forwarded to the real scan; readers share one span list.
    pub fn set_spans(&mut self, spans: Vec<Span>) {
        if let Some(scan) = self.shared.lock().scan.as_mut() {
            scan.set_spans(spans);
        }
    }

    /// The first reader to init in an epoch initializes the real scan; the
    /// remaining readers join that epoch.
    pub fn init(&mut self) -> Result<(), Error> {
        let reader = self.reader.ok_or(ExecError::UnregisteredReader)?;
        let mut guard = self.shared.lock();
        let shared = &mut *guard;

        if self.closed {
            shared.open += 1;
            self.closed = false;
        }

        if shared.pending_inits == 0 {
            let scan = shared
                .scan
                .as_mut()
                .ok_or(ExecError::NotInitialized("multiScanNode"))?;
            scan.init()?;
            shared.epoch += 1;
            shared.round = 0;
            shared.consumed = 0;
            shared.has_row = false;
            shared.current = None;
            shared.pending_inits = shared.readers.saturating_sub(1);
            trace!(reader, epoch = shared.epoch, "Initialized shared scan");
        } else {
            shared.pending_inits -= 1;
        }

        self.epoch = shared.epoch;
        self.seen = 0;
        self.current = None;
        Ok(())
    }

    pub fn next(&mut self) -> Result<bool, Error> {
        let reader = self.reader.ok_or(ExecError::UnregisteredReader)?;
        let mut guard = self.shared.lock();
        let shared = &mut *guard;

        if self.closed || self.epoch != shared.epoch {
            return Err(ExecError::NotInitialized("multiScanNode").into());
        }

        if self.seen == shared.round {
            // This reader is done with the current round and wants a new row
            if shared.round > 0 && shared.consumed < shared.open {
                return Err(ExecError::ReaderOutOfStep {
                    reader,
                    round: shared.round,
                }
                .into());
            }
            let scan = shared
                .scan
                .as_mut()
                .ok_or(ExecError::NotInitialized("multiScanNode"))?;
            let has_row = scan.next()?;
            shared.current = if has_row {
                Some(scan.values()?.clone())
            } else {
                None
            };
            shared.has_row = has_row;
            shared.round += 1;
            shared.consumed = 0;
            shared.sealed = true;
            trace!(reader, round = shared.round, has_row, "Advanced shared scan");
        }

        shared.consumed += 1;
        self.seen = shared.round;
        self.current = shared.current.clone();
        Ok(shared.has_row)
    }

    pub fn values(&self) -> Result<&Doc, Error> {
        self.current
            .as_ref()
            .ok_or_else(|| ExecError::NoCurrentRow.into())
    }

    /// Close this reader. The real scan is closed with the last open reader.
    pub fn close(&mut self) {
        if self.reader.is_none() || self.closed {
            return;
        }
        self.closed = true;
        self.current = None;

        let mut guard = self.shared.lock();
        let shared = &mut *guard;
        if self.epoch == shared.epoch && self.seen == shared.round && shared.round > 0 {
            shared.consumed = shared.consumed.saturating_sub(1);
        }
        shared.open = shared.open.saturating_sub(1);
        if shared.open == 0 {
            if let Some(scan) = shared.scan.as_mut() {
                scan.close();
            }
            shared.pending_inits = 0;
            trace!("Closed shared scan");
        }
    }

    pub fn explain(&self) -> serde_json::Value {
        let shared = self.shared.lock();
        let scan = shared
            .scan
            .as_ref()
            .map(ScanNode::explain)
            .unwrap_or(serde_json::Value::Null);
        json!({
            "multiScanNode": {
                "readers": shared.readers,
                "source": scan,
            }
        })
    }
}

impl Default for MultiScanNode {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MultiScanNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MultiScanNode")
            .field("reader", &self.reader)
            .field("seen", &self.seen)
            .field("closed", &self.closed)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{StorageConfig, StorageEngine};
    use dagdb_proto::Value;

    fn shared_scan(docs: usize) -> MultiScanNode {
        let engine = StorageEngine::open(StorageConfig::temporary()).unwrap();
        for i in 0..docs {
            engine
                .put_field("users", &format!("bae-{i}"), "n", &Value::Int(i as i64))
                .unwrap();
        }
        let controller = MultiScanNode::new();
        controller.attach(ScanNode::new(Arc::new(engine), "users"));
        controller
    }

    #[test]
    fn test_lockstep_rounds() {
        let controller = shared_scan(3);
        let mut a = controller.add_reader().unwrap();
        let mut b = controller.add_reader().unwrap();
        a.init().unwrap();
        b.init().unwrap();

        let mut rows = 0;
        loop {
            let more_a = a.next().unwrap();
            let more_b = b.next().unwrap();
            assert_eq!(more_a, more_b);
            if !more_a {
                break;
            }
            assert_eq!(a.values().unwrap(), b.values().unwrap());
            rows += 1;
        }

        assert_eq!(rows, 3);
        // One real advance per row plus the exhausting call
        assert_eq!(controller.stats().next_calls, 4);
    }

    #[test]
    fn test_reader_out_of_step() {
        let controller = shared_scan(2);
        let mut a = controller.add_reader().unwrap();
        let mut b = controller.add_reader().unwrap();
        a.init().unwrap();
        b.init().unwrap();

        assert!(a.next().unwrap());
        let err = a.next().unwrap_err();
        assert!(matches!(
            err,
            Error::Execution(ExecError::ReaderOutOfStep { reader: 0, round: 1 })
        ));

        // Once the other reader catches up the round completes
        assert!(b.next().unwrap());
        assert!(a.next().unwrap());
        assert_eq!(controller.stats().next_calls, 2);
    }

    #[test]
    fn test_readers_sealed_after_first_round() {
        let controller = shared_scan(1);
        let mut a = controller.add_reader().unwrap();
        a.init().unwrap();
        a.next().unwrap();

        assert_eq!(controller.add_reader().unwrap_err(), PlanError::ReadersSealed);
    }

    #[test]
    fn test_controller_cannot_read() {
        let mut controller = shared_scan(1);
        assert!(!controller.is_reader());
        assert!(matches!(
            controller.next(),
            Err(Error::Execution(ExecError::UnregisteredReader))
        ));
        // Closing the controller does nothing
        controller.close();
    }

    #[test]
    fn test_scan_closed_by_last_reader_only() {
        let controller = shared_scan(2);
        let mut a = controller.add_reader().unwrap();
        let mut b = controller.add_reader().unwrap();
        a.init().unwrap();
        b.init().unwrap();
        a.next().unwrap();
        b.next().unwrap();

        a.close();
        a.close();
        assert_eq!(controller.stats().releases, 0);

        // The remaining reader keeps going on its own
        assert!(b.next().unwrap());
        assert!(!b.next().unwrap());

        b.close();
        b.close();
        assert_eq!(controller.stats().releases, 1);
    }

    #[test]
    fn test_reinit_starts_a_new_epoch() {
        let controller = shared_scan(2);
        let mut a = controller.add_reader().unwrap();
        a.init().unwrap();
        assert!(a.next().unwrap());
        assert!(a.next().unwrap());
        assert!(!a.next().unwrap());

        a.init().unwrap();
        assert!(a.next().unwrap());
        assert_eq!(a.values().unwrap().key(), Some("bae-0"));
    }
}
