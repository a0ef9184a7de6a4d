//! Scripted in-memory adapter shared by the scenario tests.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use projsync_adapters::SourceAdapter;
use projsync_core::{Attributes, IdentitySet, ProjectIdentity, SourceId, SourceRead};

#[derive(Debug, Default)]
struct State {
    read: SourceRead,
    reject: IdentitySet,
    calls: Vec<(ProjectIdentity, Attributes)>,
    writable: bool,
    /// Successful creations show up in later reads.
    persist: bool,
}

/// Handle to a scripted source. Clone it before boxing; both halves share
/// state, so tests can change the script between cycles.
#[derive(Clone)]
pub struct Scripted {
    id: SourceId,
    state: Arc<Mutex<State>>,
}

impl Scripted {
    pub fn new(id: &str, live: &[&str]) -> Self {
        Self {
            id: SourceId::from(id),
            state: Arc::new(Mutex::new(State {
                read: SourceRead::available(set(live)),
                writable: true,
                ..State::default()
            })),
        }
    }

    pub fn read_only(id: &str, read: SourceRead) -> Self {
        let s = Self::new(id, &[]);
        s.state.lock().unwrap().writable = false;
        s.set_read(read);
        s
    }

    /// Successful creations are added to the live set.
    pub fn persisting(self) -> Self {
        self.state.lock().unwrap().persist = true;
        self
    }

    pub fn id(&self) -> SourceId {
        self.id.clone()
    }

    pub fn boxed(&self) -> Box<dyn SourceAdapter> {
        Box::new(self.clone())
    }

    pub fn set_live(&self, live: &[&str]) {
        self.set_read(SourceRead::available(set(live)));
    }

    pub fn set_read(&self, read: SourceRead) {
        self.state.lock().unwrap().read = read;
    }

    pub fn go_down(&self) {
        self.set_read(SourceRead::unavailable());
    }

    pub fn reject(&self, ids: &[&str]) {
        self.state.lock().unwrap().reject = set(ids);
    }

    pub fn calls(&self) -> Vec<ProjectIdentity> {
        self.state
            .lock()
            .unwrap()
            .calls
            .iter()
            .map(|(id, _)| id.clone())
            .collect()
    }

    pub fn calls_with_attributes(&self) -> Vec<(ProjectIdentity, Attributes)> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.state.lock().unwrap().calls.clear();
    }
}

impl SourceAdapter for Scripted {
    fn id(&self) -> &SourceId {
        &self.id
    }

    fn list_identities(&self) -> SourceRead {
        self.state.lock().unwrap().read.clone()
    }

    fn create_identity(&self, identity: &ProjectIdentity, attributes: &Attributes) -> bool {
        let mut state = self.state.lock().unwrap();
        state.calls.push((identity.clone(), attributes.clone()));
        if state.reject.contains(identity) {
            return false;
        }
        if state.persist && state.read.available {
            state.read.identities.insert(identity.clone());
        }
        true
    }

    fn writable(&self) -> bool {
        self.state.lock().unwrap().writable
    }
}

pub fn set(ids: &[&str]) -> IdentitySet {
    ids.iter().map(|s| ProjectIdentity::from(*s)).collect()
}

pub fn id(s: &str) -> ProjectIdentity {
    ProjectIdentity::from(s)
}
