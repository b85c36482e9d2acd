//! In-memory session registry with load-on-first-touch and flush-on-evict.
//!
//! One coarse mutex guards a single map holding both the conversation
//! window and the last-activity instant for each user, so an append and
//! the eviction decision that reads its timestamp can never interleave for
//! the same user. Snapshot I/O always happens outside the lock, and the
//! session stays resident (and loadable) while its flush is in flight.

use parking_lot::Mutex;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::history::{HistoryWindow, Message, SnapshotStore};

struct UserSession {
    window: HistoryWindow,
    last_activity: Instant,
    /// Registry-unique mutation stamp; compared after a flush to decide
    /// whether eviction is still safe.
    revision: u64,
}

/// Owns every resident conversation window and activity timestamp.
///
/// Request handlers and the eviction sweeper are the only mutators; both go
/// through the methods here. Activity is tracked with the tokio clock so
/// timing behavior is testable under a paused runtime.
pub struct SessionRegistry {
    capacity: usize,
    store: SnapshotStore,
    sessions: Mutex<HashMap<String, UserSession>>,
    revisions: AtomicU64,
}

impl SessionRegistry {
    pub fn new(capacity: usize, store: SnapshotStore) -> Self {
        Self {
            capacity,
            store,
            sessions: Mutex::new(HashMap::new()),
            revisions: AtomicU64::new(0),
        }
    }

    /// Globally unique per-mutation stamp. Uniqueness (not ordering) is
    /// what matters: a session recreated during an in-flight flush can
    /// never collide with the revision captured before the write.
    fn next_revision(&self) -> u64 {
        self.revisions.fetch_add(1, Ordering::Relaxed)
    }

    fn fresh_session(&self, window: HistoryWindow) -> UserSession {
        UserSession {
            window,
            last_activity: Instant::now(),
            revision: self.next_revision(),
        }
    }

    /// Bring a user's session into memory if it is not already resident.
    ///
    /// Returns `false` without side effects when the session is already
    /// loaded. Otherwise the snapshot is read (outside the lock), a missing
    /// or unreadable snapshot falls open to an empty window, the activity
    /// timestamp is stamped, and `true` is returned.
    pub async fn ensure_loaded(&self, user_id: &str) -> bool {
        if self.sessions.lock().contains_key(user_id) {
            return false;
        }

        let window = match self.store.read(user_id).await {
            Ok(messages) => {
                debug!(user_id, messages = messages.len(), "loaded history snapshot");
                HistoryWindow::from_messages(self.capacity, messages)
            }
            Err(err) if err.is_not_found() => {
                debug!(user_id, "no history snapshot, starting fresh");
                HistoryWindow::new(self.capacity)
            }
            Err(err) => {
                warn!(user_id, error = %err, "unreadable history snapshot, starting fresh");
                HistoryWindow::new(self.capacity)
            }
        };

        let session = self.fresh_session(window);
        let mut sessions = self.sessions.lock();
        match sessions.entry(user_id.to_string()) {
            // Another handler loaded the session while we were reading the
            // snapshot; keep theirs.
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(session);
                true
            }
        }
    }

    /// Append a message to the user's window and stamp activity. Never
    /// fails: a missing session is auto-initialized empty.
    pub fn record(&self, user_id: &str, message: Message) {
        let revision = self.next_revision();
        let mut sessions = self.sessions.lock();
        let session = sessions
            .entry(user_id.to_string())
            .or_insert_with(|| UserSession {
                window: HistoryWindow::new(self.capacity),
                last_activity: Instant::now(),
                revision,
            });
        session.window.append(message);
        session.last_activity = Instant::now();
        session.revision = revision;
    }

    /// Ordered clone of the user's current window, empty if not resident.
    pub fn context(&self, user_id: &str) -> Vec<Message> {
        self.sessions
            .lock()
            .get(user_id)
            .map(|session| session.window.to_vec())
            .unwrap_or_default()
    }

    /// Stamp activity without appending.
    pub fn touch(&self, user_id: &str) {
        let revision = self.next_revision();
        if let Some(session) = self.sessions.lock().get_mut(user_id) {
            session.last_activity = Instant::now();
            session.revision = revision;
        }
    }

    pub fn is_resident(&self, user_id: &str) -> bool {
        self.sessions.lock().contains_key(user_id)
    }

    pub fn resident_users(&self) -> Vec<String> {
        self.sessions.lock().keys().cloned().collect()
    }

    /// Stable snapshot of users idle longer than `threshold`. The sweeper
    /// iterates this copy, never the live map.
    pub fn idle_users(&self, threshold: Duration) -> Vec<String> {
        let now = Instant::now();
        self.sessions
            .lock()
            .iter()
            .filter(|(_, session)| now.duration_since(session.last_activity) > threshold)
            .map(|(user_id, _)| user_id.clone())
            .collect()
    }

    /// Flush the user's window to disk, then drop the session.
    ///
    /// The window is cloned under the lock and written while the session
    /// stays resident, so a load arriving mid-flush sees the full in-memory
    /// window rather than a stale or missing snapshot. Eviction afterwards
    /// happens only if the session's revision is unchanged: a racing append
    /// (or touch) keeps the session resident and nothing is lost. A missing
    /// session is a no-op; an empty window is evicted without creating a
    /// file; a failed write is logged and the window is dropped regardless,
    /// matching the bounded data-loss window accepted in the design.
    pub async fn flush_and_evict(&self, user_id: &str) {
        let (messages, revision) = {
            let mut sessions = self.sessions.lock();
            let Some(session) = sessions.get(user_id) else {
                return;
            };
            if session.window.is_empty() {
                sessions.remove(user_id);
                debug!(user_id, "evicted empty session without flushing");
                return;
            }
            (session.window.to_vec(), session.revision)
        };

        if let Err(err) = self.store.write(user_id, &messages).await {
            warn!(user_id, error = %err, "history flush failed; window dropped from memory");
        }

        let mut sessions = self.sessions.lock();
        match sessions.get(user_id) {
            Some(session) if session.revision == revision => {
                sessions.remove(user_id);
                info!(user_id, messages = messages.len(), "flushed and evicted session");
            }
            Some(_) => {
                debug!(user_id, "session touched during flush; left resident");
            }
            None => {}
        }
    }

    /// Flush every resident non-empty session without evicting. Used once
    /// at shutdown; per-user write failures are isolated and logged.
    pub async fn flush_all(&self) {
        let pending: Vec<(String, Vec<Message>)> = self
            .sessions
            .lock()
            .iter()
            .filter(|(_, session)| !session.window.is_empty())
            .map(|(user_id, session)| (user_id.clone(), session.window.to_vec()))
            .collect();

        let total = pending.len();
        for (user_id, messages) in pending {
            if let Err(err) = self.store.write(&user_id, &messages).await {
                warn!(%user_id, error = %err, "shutdown flush failed for session");
            }
        }
        info!(sessions = total, "flushed all resident sessions");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::{MessageContent, Role};
    use tempfile::TempDir;

    fn registry(tmp: &TempDir, capacity: usize) -> SessionRegistry {
        SessionRegistry::new(capacity, SnapshotStore::new(tmp.path()))
    }

    fn text(role: Role, s: &str) -> Message {
        Message::text(role, s)
    }

    #[tokio::test]
    async fn ensure_loaded_is_idempotent() {
        let tmp = TempDir::new().unwrap();
        let reg = registry(&tmp, 10);

        assert!(reg.ensure_loaded("U1").await);
        reg.record("U1", text(Role::User, "hello"));

        assert!(!reg.ensure_loaded("U1").await);
        assert_eq!(reg.context("U1").len(), 1);
    }

    #[tokio::test]
    async fn ensure_loaded_rehydrates_from_snapshot() {
        let tmp = TempDir::new().unwrap();
        let store = SnapshotStore::new(tmp.path());
        let stored = vec![
            text(Role::User, "earlier question"),
            text(Role::Assistant, "earlier answer"),
        ];
        store.write("U1", &stored).await.unwrap();

        let reg = registry(&tmp, 10);
        assert!(reg.ensure_loaded("U1").await);
        assert_eq!(reg.context("U1"), stored);
    }

    #[tokio::test]
    async fn corrupt_snapshot_falls_open_to_empty_window() {
        let tmp = TempDir::new().unwrap();
        let store = SnapshotStore::new(tmp.path());
        tokio::fs::write(store.path_for("UB"), b"\x00\x01 garbage")
            .await
            .unwrap();

        let reg = registry(&tmp, 10);
        assert!(reg.ensure_loaded("UB").await);
        assert!(reg.context("UB").is_empty());
        assert!(reg.is_resident("UB"));
    }

    #[tokio::test]
    async fn record_auto_initializes_missing_session() {
        let tmp = TempDir::new().unwrap();
        let reg = registry(&tmp, 10);

        reg.record("Unew", text(Role::User, "first"));
        assert!(reg.is_resident("Unew"));
        assert_eq!(reg.context("Unew").len(), 1);
    }

    #[tokio::test]
    async fn record_respects_window_capacity() {
        let tmp = TempDir::new().unwrap();
        let reg = registry(&tmp, 3);

        for i in 0..5 {
            reg.record("U1", text(Role::User, &format!("m{i}")));
        }

        let contents: Vec<String> = reg
            .context("U1")
            .into_iter()
            .map(|m| match m.content {
                MessageContent::Text { text } => text,
                _ => unreachable!(),
            })
            .collect();
        assert_eq!(contents, vec!["m2", "m3", "m4"]);
    }

    #[tokio::test]
    async fn flush_and_evict_persists_and_removes() {
        let tmp = TempDir::new().unwrap();
        let reg = registry(&tmp, 10);

        reg.ensure_loaded("U1").await;
        reg.record("U1", text(Role::User, "hello"));
        reg.record("U1", text(Role::Assistant, "hi"));
        let before = reg.context("U1");

        reg.flush_and_evict("U1").await;
        assert!(!reg.is_resident("U1"));

        let store = SnapshotStore::new(tmp.path());
        assert_eq!(store.read("U1").await.unwrap(), before);
    }

    #[tokio::test]
    async fn evicting_empty_session_creates_no_file() {
        let tmp = TempDir::new().unwrap();
        let reg = registry(&tmp, 10);

        reg.ensure_loaded("Uempty").await;
        reg.flush_and_evict("Uempty").await;

        assert!(!reg.is_resident("Uempty"));
        let store = SnapshotStore::new(tmp.path());
        assert!(!store.path_for("Uempty").exists());
    }

    #[tokio::test]
    async fn evicting_absent_user_is_a_noop() {
        let tmp = TempDir::new().unwrap();
        let reg = registry(&tmp, 10);

        reg.flush_and_evict("Ughost").await;
        assert!(!SnapshotStore::new(tmp.path()).path_for("Ughost").exists());
    }

    #[tokio::test(start_paused = true)]
    async fn idle_users_reports_only_stale_sessions() {
        let tmp = TempDir::new().unwrap();
        let reg = registry(&tmp, 10);

        reg.record("Uactive", text(Role::User, "hi"));
        reg.record("Ustale", text(Role::User, "hi"));

        tokio::time::advance(Duration::from_secs(11 * 60)).await;
        reg.touch("Uactive");

        let idle = reg.idle_users(Duration::from_secs(10 * 60));
        assert_eq!(idle, vec!["Ustale".to_string()]);
    }

    #[tokio::test]
    async fn record_after_evict_lands_in_fresh_window() {
        let tmp = TempDir::new().unwrap();
        let reg = registry(&tmp, 10);

        reg.record("UC", text(Role::User, "before evict"));
        reg.flush_and_evict("UC").await;

        // An append arriving after the eviction must never be dropped: it
        // auto-initializes a fresh window.
        reg.record("UC", text(Role::User, "after evict"));
        assert_eq!(reg.context("UC").len(), 1);
    }

    #[tokio::test]
    async fn load_during_inflight_flush_sees_full_window() {
        let tmp = TempDir::new().unwrap();
        let reg = registry(&tmp, 10);
        reg.record("U1", text(Role::User, "q1"));
        reg.record("U1", text(Role::Assistant, "a1"));

        // Drive the flush by hand so it suspends inside the snapshot
        // write, with the session still resident.
        let mut flush = tokio_test::task::spawn(reg.flush_and_evict("U1"));
        assert!(flush.poll().is_pending());

        // A load arriving mid-flush must see the full window, never a
        // fabricated empty one.
        reg.ensure_loaded("U1").await;
        assert_eq!(reg.context("U1").len(), 2);

        flush.await;

        // A later flush cycle still persists both messages; the in-flight
        // snapshot is never overwritten with a truncated window.
        reg.ensure_loaded("U1").await;
        reg.flush_and_evict("U1").await;
        let snapshot = SnapshotStore::new(tmp.path()).read("U1").await.unwrap();
        assert_eq!(snapshot.len(), 2);
    }

    #[tokio::test]
    async fn append_during_inflight_flush_keeps_session_resident() {
        let tmp = TempDir::new().unwrap();
        let reg = registry(&tmp, 10);
        reg.record("U1", text(Role::User, "q1"));

        let mut flush = tokio_test::task::spawn(reg.flush_and_evict("U1"));
        assert!(flush.poll().is_pending());

        // Racing append while the write is in flight.
        reg.record("U1", text(Role::User, "q2"));
        flush.await;

        // The revision check skips eviction; both messages survive in
        // memory and the snapshot holds the pre-append contents.
        assert!(reg.is_resident("U1"));
        assert_eq!(reg.context("U1").len(), 2);
        let snapshot = SnapshotStore::new(tmp.path()).read("U1").await.unwrap();
        assert_eq!(snapshot.len(), 1);
    }

    #[tokio::test]
    async fn flush_all_persists_without_evicting() {
        let tmp = TempDir::new().unwrap();
        let reg = registry(&tmp, 10);

        reg.record("U1", text(Role::User, "one"));
        reg.record("U2", text(Role::User, "two"));
        reg.ensure_loaded("U3").await; // stays empty, no file expected

        reg.flush_all().await;

        assert!(reg.is_resident("U1"));
        assert!(reg.is_resident("U2"));
        let store = SnapshotStore::new(tmp.path());
        assert_eq!(store.read("U1").await.unwrap().len(), 1);
        assert_eq!(store.read("U2").await.unwrap().len(), 1);
        assert!(!store.path_for("U3").exists());
    }

    #[tokio::test]
    async fn flush_failure_still_evicts_and_does_not_panic() {
        let tmp = TempDir::new().unwrap();
        // Point the store at a path that exists as a *file* so writes fail.
        let bogus = tmp.path().join("not-a-dir");
        std::fs::write(&bogus, b"x").unwrap();

        let reg = SessionRegistry::new(10, SnapshotStore::new(&bogus));
        reg.record("U1", text(Role::User, "doomed"));
        reg.flush_and_evict("U1").await;
        assert!(!reg.is_resident("U1"));
    }
}
