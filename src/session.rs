//! Build-session state for the component composition protocol.
//!
//! The once-key registry, the auto-naming counter and the established root
//! are owned by a single `Session` value that is threaded into every
//! registration call. One session per build invocation; the run-time bundle
//! embeds its own independent instances inside the generated text.

use std::cell::RefCell;
use std::collections::HashSet;
use std::rc::Rc;

use crate::component::Component;
use crate::error::{ProtocolError, ERR_DOUBLE_ESTABLISH};

struct SessionState {
    once_keys: HashSet<String>,
    next_ordinal: u64,
    root: Option<Component>,
}

/// Shared handle to one build session. Cheap to clone; single-writer for the
/// duration of one build and never shared across concurrent builds.
#[derive(Clone)]
pub struct Session(Rc<RefCell<SessionState>>);

impl Session {
    pub fn new() -> Self {
        Session(Rc::new(RefCell::new(SessionState {
            once_keys: HashSet::new(),
            next_ordinal: 0,
            root: None,
        })))
    }

    /// Claim a once-key. Returns true if this is the first time the key is
    /// seen in this session's lifetime; later claims of the same key return
    /// false and leave the registry unchanged.
    pub fn claim_once_key(&self, key: &str) -> bool {
        self.0.borrow_mut().once_keys.insert(key.to_string())
    }

    /// Next auto-generated artifact name. The counter is shared across all
    /// artifact kinds, so names are build-global and strictly increasing.
    pub fn next_auto_name(&self) -> String {
        let mut state = self.0.borrow_mut();
        let ordinal = state.next_ordinal;
        state.next_ordinal += 1;
        ordinal.to_string()
    }

    /// Designate the addon root. Calling this a second time in the same
    /// session is a protocol violation.
    pub fn establish_addon(&self, root: Component) -> Result<(), ProtocolError> {
        let mut state = self.0.borrow_mut();
        if state.root.is_some() {
            return Err(ProtocolError::new(
                ERR_DOUBLE_ESTABLISH,
                "establishAddon() called twice within one session",
            ));
        }
        state.root = Some(root);
        Ok(())
    }

    pub fn is_established(&self) -> bool {
        self.0.borrow().root.is_some()
    }

    /// Take the established root out of the session, if any.
    pub fn take_root(&self) -> Option<Component> {
        self.0.borrow_mut().root.take()
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}
