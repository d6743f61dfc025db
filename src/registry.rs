// 🗂️ Session Registry - one YearSession per connected client
//
// Sessions share the year source and the selection store, nothing else.
// Each one keeps its own catalog, selection and guard.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use tracing::{debug, info};

use crate::store::{SelectionStore, YearSource};
use crate::session::YearSession;

pub struct SessionRegistry<S, P> {
    source: S,
    store: P,
    sessions: RwLock<HashMap<String, Arc<YearSession<S, P>>>>,
}

impl<S, P> SessionRegistry<S, P>
where
    S: YearSource + Clone,
    P: SelectionStore + Clone,
{
    pub fn new(source: S, store: P) -> Self {
        SessionRegistry {
            source,
            store,
            sessions: RwLock::new(HashMap::new()),
        }
    }

    /// Open a fresh session (no school, nothing selected) and return its id
    pub fn create(&self) -> (String, Arc<YearSession<S, P>>) {
        let id = uuid::Uuid::new_v4().to_string();
        let session = Arc::new(YearSession::new(self.source.clone(), self.store.clone()));

        let mut sessions = self.sessions.write().unwrap_or_else(PoisonError::into_inner);
        sessions.insert(id.clone(), Arc::clone(&session));
        info!(session_id = %id, open = sessions.len(), "year session opened");

        (id, session)
    }

    pub fn get(&self, session_id: &str) -> Option<Arc<YearSession<S, P>>> {
        let sessions = self.sessions.read().unwrap_or_else(PoisonError::into_inner);
        let session = sessions.get(session_id).cloned();
        if session.is_none() {
            debug!(session_id, "unknown year session");
        }
        session
    }

    /// End and forget a session; false when the id is unknown
    ///
    /// Holders of the `Arc` see an ended session: empty catalog, nothing selected.
    pub fn end(&self, session_id: &str) -> bool {
        let removed = self
            .sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(session_id);

        match removed {
            Some(session) => {
                session.end_session();
                info!(session_id, "year session closed");
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.sessions.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
