//! Correlation of outgoing commands with their responses.
//!
//! An entry is registered before its command is sent and removed when the
//! response arrives, when the caller gives up waiting, or when the channel
//! dies. Once [`PendingTable::fail_all`] has run, new registrations fail
//! immediately with the same code so nothing waits on a dead channel.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use svbridge_ipc::Payload;
use tokio::sync::oneshot;

/// A response payload, or the error code it carried.
pub type Reply = Result<Payload, String>;

#[derive(Default)]
struct Entries {
    waiters: HashMap<u64, oneshot::Sender<Reply>>,
    failed: Option<String>,
}

/// In-flight commands keyed by id.
#[derive(Default)]
pub struct PendingTable {
    next_id: AtomicU64,
    entries: Mutex<Entries>,
}

impl PendingTable {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> MutexGuard<'_, Entries> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// A fresh id that is never registered, for fire-and-forget commands.
    pub fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Allocate an id and the handle its response will arrive on.
    pub fn register(&self) -> (u64, oneshot::Receiver<Reply>) {
        let id = self.next_id();
        let (tx, rx) = oneshot::channel();
        let mut entries = self.entries();
        match &entries.failed {
            Some(code) => {
                let _ = tx.send(Err(code.clone()));
            }
            None => {
                entries.waiters.insert(id, tx);
            }
        }
        (id, rx)
    }

    /// Deliver a response. Returns `false` when nobody is waiting for `id`
    /// any more, which is the case for late responses after a timeout.
    pub fn resolve(&self, id: u64, reply: Reply) -> bool {
        let waiter = self.entries().waiters.remove(&id);
        waiter.is_some_and(|tx| tx.send(reply).is_ok())
    }

    /// Drop an entry whose caller stopped waiting.
    pub fn forget(&self, id: u64) {
        self.entries().waiters.remove(&id);
    }

    /// Fail every pending entry and all future registrations with `code`.
    /// Returns how many entries were waiting.
    pub fn fail_all(&self, code: &str) -> usize {
        let waiters = {
            let mut entries = self.entries();
            entries.failed.get_or_insert_with(|| code.to_string());
            std::mem::take(&mut entries.waiters)
        };
        let count = waiters.len();
        for (_, tx) in waiters {
            let _ = tx.send(Err(code.to_string()));
        }
        count
    }

    pub fn len(&self) -> usize {
        self.entries().waiters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Debug for PendingTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let entries = self.entries();
        f.debug_struct("PendingTable")
            .field("pending", &entries.waiters.len())
            .field("failed", &entries.failed)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use svbridge_ipc::codes;

    #[tokio::test]
    async fn response_resolves_its_entry() {
        let table = PendingTable::new();
        let (first, _rx1) = table.register();
        let (second, rx2) = table.register();
        assert!(second > first);
        assert_eq!(table.len(), 2);

        let mut payload = Payload::new();
        payload.insert("status".into(), "ok".into());
        assert!(table.resolve(second, Ok(payload.clone())));
        assert_eq!(rx2.await.unwrap(), Ok(payload));
        assert_eq!(table.len(), 1);
    }

    #[tokio::test]
    async fn late_response_is_discarded() {
        let table = PendingTable::new();
        let (id, rx) = table.register();
        table.forget(id);
        drop(rx);
        assert!(!table.resolve(id, Ok(Payload::new())));
        assert!(!table.resolve(999, Ok(Payload::new())));
        assert!(table.is_empty());
    }

    #[tokio::test]
    async fn fail_all_releases_every_waiter() {
        let table = PendingTable::new();
        let (_, a) = table.register();
        let (_, b) = table.register();

        assert_eq!(table.fail_all(codes::CONNECTION_CLOSED), 2);
        assert_eq!(a.await.unwrap(), Err("connectionClosed".to_string()));
        assert_eq!(b.await.unwrap(), Err("connectionClosed".to_string()));

        // Nothing can wait on a dead channel afterwards.
        let (_, late) = table.register();
        assert_eq!(late.await.unwrap(), Err("connectionClosed".to_string()));
        assert!(table.is_empty());
    }

    #[test]
    fn first_failure_code_sticks() {
        let table = PendingTable::new();
        table.fail_all(codes::RECEIVER_EXCEPTION);
        table.fail_all(codes::CONNECTION_CLOSED);
        assert!(format!("{table:?}").contains("receiverException"));
    }
}
