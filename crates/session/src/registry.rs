use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, TryLockError};
use std::time::{Duration, Instant};

use log::{debug, info};
use printbot_printing::JobContent;
use printbot_reaper::ResourceReaper;

use crate::session::{Session, Stage, UserId};

type SessionHandle = Arc<Mutex<Session>>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Owns at most one [`Session`] per user.
///
/// The map lock is only held to look up, insert or remove a handle; session
/// mutations run under the per-user lock alone, so different users never wait
/// on each other.
/// 每位使用者最多一個工作階段；不同使用者之間不會互相等待。
pub struct SessionRegistry {
    sessions: Mutex<HashMap<UserId, SessionHandle>>,
    reaper: ResourceReaper,
}

impl SessionRegistry {
    pub fn new(reaper: ResourceReaper) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            reaper,
        }
    }

    pub fn reaper(&self) -> &ResourceReaper {
        &self.reaper
    }

    fn handle(&self, user_id: UserId) -> Option<SessionHandle> {
        lock(&self.sessions).get(&user_id).cloned()
    }

    /// Starts a fresh session for `user_id`, replacing any existing one.
    /// A replaced session is cancelled and its artifact queued for deletion.
    pub fn put(&self, user_id: UserId, content: JobContent) -> Session {
        let session = Session::new(user_id, content);
        let snapshot = session.clone();
        let previous = lock(&self.sessions).insert(user_id, Arc::new(Mutex::new(session)));

        if let Some(previous) = previous {
            let mut old = lock(&previous);
            if !old.stage.is_terminal() {
                info!("Replacing session of user {user_id} in stage {:?}", old.stage);
                self.cancel(&mut old);
            }
        }
        snapshot
    }

    /// Snapshot of the current session.
    pub fn get(&self, user_id: UserId) -> Option<Session> {
        let handle = self.handle(user_id)?;
        let session = lock(&handle).clone();
        Some(session)
    }

    /// Runs `mutation` under the user's lock and returns its result, or `None`
    /// when the user has no live session.
    ///
    /// A mutation that leaves the session terminal releases its artifact and
    /// removes it, unless a newer session has replaced it in the meantime.
    pub fn advance<R>(&self, user_id: UserId, mutation: impl FnOnce(&mut Session) -> R) -> Option<R> {
        let handle = self.handle(user_id)?;
        let mut session = lock(&handle);
        if session.stage.is_terminal() {
            debug!("Session of user {user_id} already ended");
            return None;
        }

        let before = session.stage;
        let result = mutation(&mut session);
        if session.stage != before {
            session.touch();
        }

        if session.stage.is_terminal() {
            if let Some(path) = session.artifact() {
                self.reaper.schedule(path);
            }
            drop(session);
            self.remove_if_current(user_id, &handle);
        }
        Some(result)
    }

    /// Drops the user's session, cancelling it if still live.
    pub fn remove(&self, user_id: UserId) -> Option<Session> {
        let handle = lock(&self.sessions).remove(&user_id)?;
        let mut session = lock(&handle);
        if !session.stage.is_terminal() {
            self.cancel(&mut session);
        }
        Some(session.clone())
    }

    /// Cancels every session idle for longer than `max_idle` and returns the
    /// affected users. Sessions whose lock is held are skipped rather than
    /// waited on.
    pub fn expire_idle(&self, max_idle: Duration) -> Vec<UserId> {
        let handles: Vec<(UserId, SessionHandle)> = lock(&self.sessions)
            .iter()
            .map(|(user_id, handle)| (*user_id, Arc::clone(handle)))
            .collect();

        let now = Instant::now();
        let mut expired = Vec::new();
        for (user_id, handle) in handles {
            // A locked session is mid-step (possibly printing), so it is not idle.
            let mut session = match handle.try_lock() {
                Ok(session) => session,
                Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
                Err(TryLockError::WouldBlock) => {
                    debug!("Session of user {user_id} is busy; not expiring");
                    continue;
                }
            };
            if session.stage.is_terminal() || session.idle_for(now) <= max_idle {
                continue;
            }
            info!(
                "Session of user {user_id} idle for {:?}; expiring",
                session.idle_for(now)
            );
            self.cancel(&mut session);
            drop(session);
            self.remove_if_current(user_id, &handle);
            expired.push(user_id);
        }
        expired.sort_unstable();
        expired
    }

    pub fn len(&self) -> usize {
        lock(&self.sessions).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn cancel(&self, session: &mut Session) {
        if let Some(path) = session.artifact() {
            self.reaper.schedule(path);
        }
        session.stage = Stage::Cancelled;
    }

    fn remove_if_current(&self, user_id: UserId, handle: &SessionHandle) {
        let mut sessions = lock(&self.sessions);
        if sessions
            .get(&user_id)
            .is_some_and(|current| Arc::ptr_eq(current, handle))
        {
            sessions.remove(&user_id);
        }
    }
}
