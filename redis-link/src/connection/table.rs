//! Pending request table
//!
//! Rows map the send order of pipelined batches to their waiting callers.
//! The controller inserts rows with strictly increasing counters and the
//! socket owner consumes replies front-to-back, so reply N on the wire
//! always lands in the oldest open row.
//!
//! The reply channel is stored as an `Option` and taken exactly once:
//! either by the timeout path (which leaves the row in place so the wire
//! accounting stays aligned) or when the final reply of the batch arrives.

use redis_link_core::{
    error::{Error, Result},
    value::RespValue,
};
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::{oneshot, Mutex};

pub(crate) type ReplySender = oneshot::Sender<Result<Vec<RespValue>>>;

/// Table handle shared between the controller and the socket owner
pub(crate) type SharedTable = Arc<Mutex<PendingTable>>;

pub(crate) fn shared() -> SharedTable {
    Arc::new(Mutex::new(PendingTable::new()))
}

struct PendingRow {
    counter: u64,
    sender: Option<ReplySender>,
    remaining: usize,
    replies: Vec<RespValue>,
    timed_out: bool,
}

/// A completed row: the batch's replies plus the caller channel, if the
/// caller has not already been answered by the timeout path.
pub(crate) struct CompletedRow {
    pub(crate) sender: Option<ReplySender>,
    pub(crate) replies: Vec<RespValue>,
    pub(crate) timed_out: bool,
}

/// Ordered table of in-flight pipeline batches
pub(crate) struct PendingTable {
    rows: VecDeque<PendingRow>,
}

impl PendingTable {
    fn new() -> Self {
        Self {
            rows: VecDeque::new(),
        }
    }

    /// Insert a new row. `counter` must be larger than any existing key.
    pub(crate) fn insert(&mut self, counter: u64, sender: ReplySender, ncommands: usize) {
        debug_assert!(ncommands > 0);
        debug_assert!(self.rows.back().map_or(true, |row| row.counter < counter));
        self.rows.push_back(PendingRow {
            counter,
            sender: Some(sender),
            remaining: ncommands,
            replies: Vec::with_capacity(ncommands),
            timed_out: false,
        });
    }

    /// Mark the row as timed out and take its reply channel, if the row is
    /// still present. The row itself stays in the table so later replies
    /// are consumed in order and then discarded.
    pub(crate) fn set_timed_out(&mut self, counter: u64) -> Option<ReplySender> {
        let row = self.rows.iter_mut().find(|row| row.counter == counter)?;
        row.timed_out = true;
        row.sender.take()
    }

    /// Feed one decoded reply into the oldest open row. Returns the
    /// completed row once its final reply has been gathered.
    ///
    /// # Errors
    ///
    /// Returns `Error::Protocol` when a reply arrives with no row open,
    /// which means the server sent more replies than were requested.
    pub(crate) fn push_reply(&mut self, reply: RespValue) -> Result<Option<CompletedRow>> {
        let Some(row) = self.rows.front_mut() else {
            return Err(Error::Protocol(
                "server sent a reply with no request pending".to_string(),
            ));
        };
        row.replies.push(reply);
        row.remaining -= 1;
        if row.remaining > 0 {
            return Ok(None);
        }
        Ok(self.rows.pop_front().map(|row| CompletedRow {
            sender: row.sender,
            replies: row.replies,
            timed_out: row.timed_out,
        }))
    }

    /// Remove every row, returning the reply channels of rows that have
    /// not been answered by the timeout path, in counter order.
    pub(crate) fn drain(&mut self) -> Vec<ReplySender> {
        self.rows
            .drain(..)
            .filter_map(|row| row.sender)
            .collect()
    }

    #[cfg(test)]
    pub(crate) fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn channel() -> (ReplySender, oneshot::Receiver<Result<Vec<RespValue>>>) {
        oneshot::channel()
    }

    #[test]
    fn completes_rows_in_insertion_order() {
        let mut table = PendingTable::new();
        let (tx1, mut rx1) = channel();
        let (tx2, mut rx2) = channel();
        table.insert(0, tx1, 1);
        table.insert(1, tx2, 2);

        let done = table.push_reply(RespValue::Integer(1)).unwrap().unwrap();
        done.sender.unwrap().send(Ok(done.replies)).unwrap();
        assert_eq!(rx1.try_recv().unwrap().unwrap(), vec![RespValue::Integer(1)]);

        assert!(table.push_reply(RespValue::Integer(2)).unwrap().is_none());
        assert!(rx2.try_recv().is_err());
        let done = table.push_reply(RespValue::Integer(3)).unwrap().unwrap();
        assert_eq!(
            done.replies,
            vec![RespValue::Integer(2), RespValue::Integer(3)]
        );
        assert!(table.is_empty());
    }

    #[test]
    fn timed_out_row_keeps_consuming_replies() {
        let mut table = PendingTable::new();
        let (tx1, _rx1) = channel();
        let (tx2, _rx2) = channel();
        table.insert(0, tx1, 2);
        table.insert(1, tx2, 1);

        let sender = table.set_timed_out(0).expect("row present");
        drop(sender);

        // Both replies for the dead row are still consumed by it.
        assert!(table.push_reply(RespValue::Null).unwrap().is_none());
        let done = table.push_reply(RespValue::Null).unwrap().unwrap();
        assert!(done.timed_out);
        assert!(done.sender.is_none());

        // The next reply lands in the second row, not past it.
        let done = table.push_reply(RespValue::Integer(9)).unwrap().unwrap();
        assert!(!done.timed_out);
        assert_eq!(done.replies, vec![RespValue::Integer(9)]);
    }

    #[test]
    fn set_timed_out_reports_missing_rows() {
        let mut table = PendingTable::new();
        assert!(table.set_timed_out(7).is_none());

        let (tx, _rx) = channel();
        table.insert(3, tx, 1);
        let _ = table.push_reply(RespValue::Null).unwrap();
        assert!(table.set_timed_out(3).is_none());
    }

    #[test]
    fn drain_skips_timed_out_rows() {
        let mut table = PendingTable::new();
        let (tx1, _rx1) = channel();
        let (tx2, _rx2) = channel();
        let (tx3, _rx3) = channel();
        table.insert(0, tx1, 1);
        table.insert(1, tx2, 1);
        table.insert(2, tx3, 1);

        let timeout_sender = table.set_timed_out(1).unwrap();
        drop(timeout_sender);

        let senders = table.drain();
        assert_eq!(senders.len(), 2);
        assert!(table.is_empty());
    }

    #[test]
    fn unexpected_reply_is_a_protocol_error() {
        let mut table = PendingTable::new();
        assert!(table.push_reply(RespValue::Null).is_err());
    }
}
