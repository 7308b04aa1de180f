//! Component Composition Protocol.
//!
//! Components are immutable snapshots of file artifacts and deferred script
//! callbacks, produced exactly once by invoking a component factory with a
//! fresh registration handle. The handle is valid only for the duration of
//! the factory call; `implement` copies an already-built component's
//! sequences in front of the current component's own registrations.
//!
//! Pure logic, no I/O. The sandboxed executor and the Rust-facing factory
//! API both drive this module; the run-time bundle carries its own
//! behaviorally-identical re-implementation (see `bootstrap.rs`).

use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::rc::Rc;

use crate::error::{ProtocolError, ERR_FACTORY_AFTER_ESTABLISH};
use crate::session::Session;

// ═══════════════════════════════════════════════════════════════════════════════
// ARTIFACT KINDS
// ═══════════════════════════════════════════════════════════════════════════════

/// Top-level output area an artifact belongs to. The orchestrator maps areas
/// to real output directories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputArea {
    Data,
    Presentation,
}

/// Closed enumeration of registration kinds. Every kind maps to one
/// (area, root directory, default extension, serialization mode) descriptor;
/// a single generic routine performs the registration for all of them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ArtifactKind {
    Entity,
    Item,
    Block,
    Recipe,
    LootTable,
    Particle,
    Animation,
    Raw,
}

#[derive(Debug, Clone, Copy)]
pub struct KindSpec {
    pub area: OutputArea,
    /// None for `Raw`, whose root directory must be given explicitly.
    pub root_dir: Option<&'static str>,
    pub default_ext: &'static str,
    pub canonical_json: bool,
}

impl ArtifactKind {
    pub fn spec(self) -> KindSpec {
        use OutputArea::{Data, Presentation};
        match self {
            ArtifactKind::Entity => KindSpec {
                area: Data,
                root_dir: Some("data/entities"),
                default_ext: "json",
                canonical_json: true,
            },
            ArtifactKind::Item => KindSpec {
                area: Data,
                root_dir: Some("data/items"),
                default_ext: "json",
                canonical_json: true,
            },
            ArtifactKind::Block => KindSpec {
                area: Data,
                root_dir: Some("data/blocks"),
                default_ext: "json",
                canonical_json: true,
            },
            ArtifactKind::Recipe => KindSpec {
                area: Data,
                root_dir: Some("data/recipes"),
                default_ext: "json",
                canonical_json: true,
            },
            ArtifactKind::LootTable => KindSpec {
                area: Data,
                root_dir: Some("data/loot_tables"),
                default_ext: "json",
                canonical_json: true,
            },
            ArtifactKind::Particle => KindSpec {
                area: Presentation,
                root_dir: Some("assets/particles"),
                default_ext: "json",
                canonical_json: true,
            },
            ArtifactKind::Animation => KindSpec {
                area: Presentation,
                root_dir: Some("assets/animations"),
                default_ext: "json",
                canonical_json: true,
            },
            ArtifactKind::Raw => KindSpec {
                area: Data,
                root_dir: None,
                default_ext: "json",
                canonical_json: false,
            },
        }
    }

    /// The function name this kind is exposed under on a registration handle.
    pub fn handle_name(self) -> &'static str {
        match self {
            ArtifactKind::Entity => "entity",
            ArtifactKind::Item => "item",
            ArtifactKind::Block => "block",
            ArtifactKind::Recipe => "recipe",
            ArtifactKind::LootTable => "lootTable",
            ArtifactKind::Particle => "particle",
            ArtifactKind::Animation => "animation",
            ArtifactKind::Raw => "raw",
        }
    }

    pub fn from_handle_name(name: &str) -> Option<ArtifactKind> {
        match name {
            "entity" => Some(ArtifactKind::Entity),
            "item" => Some(ArtifactKind::Item),
            "block" => Some(ArtifactKind::Block),
            "recipe" => Some(ArtifactKind::Recipe),
            "lootTable" => Some(ArtifactKind::LootTable),
            "particle" => Some(ArtifactKind::Particle),
            "animation" => Some(ArtifactKind::Animation),
            "raw" => Some(ArtifactKind::Raw),
            _ => None,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// ARTIFACTS & OPTIONS
// ═══════════════════════════════════════════════════════════════════════════════

/// A (path, content) pair destined for the output file tree. The path is
/// relative and rooted under `data/` or `assets/`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileArtifact {
    pub path: String,
    pub content: String,
}

impl FileArtifact {
    pub fn area(&self) -> OutputArea {
        if self.path.starts_with("assets/") {
            OutputArea::Presentation
        } else {
            OutputArea::Data
        }
    }
}

/// A registered script callback, captured as source text at build time and
/// never executed in the sandbox.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeferredCallback {
    pub source: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OnceOption {
    pub key: String,
}

/// Options accepted by every registration function.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterOptions {
    pub name: Option<String>,
    pub root_dir: Option<String>,
    pub ext: Option<String>,
    pub once: Option<OnceOption>,
}

impl RegisterOptions {
    pub fn once_key(key: &str) -> Self {
        RegisterOptions {
            once: Some(OnceOption {
                key: key.to_string(),
            }),
            ..Default::default()
        }
    }

    pub fn named(name: &str) -> Self {
        RegisterOptions {
            name: Some(name.to_string()),
            ..Default::default()
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// COMPONENT
// ═══════════════════════════════════════════════════════════════════════════════

/// Immutable snapshot of one factory invocation: the file artifacts and
/// deferred callbacks the component owns, implemented entries first.
#[derive(Debug, Clone, Default)]
pub struct Component {
    artifacts: Vec<FileArtifact>,
    callbacks: Vec<DeferredCallback>,
}

impl Component {
    pub fn empty() -> Self {
        Component::default()
    }

    pub fn artifacts(&self) -> &[FileArtifact] {
        &self.artifacts
    }

    pub fn callbacks(&self) -> &[DeferredCallback] {
        &self.callbacks
    }

    pub fn into_artifacts(self) -> Vec<FileArtifact> {
        self.artifacts
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// REGISTRATION HANDLE
// ═══════════════════════════════════════════════════════════════════════════════

struct HandleState {
    session: Session,
    inherited_artifacts: Vec<FileArtifact>,
    inherited_callbacks: Vec<DeferredCallback>,
    own_artifacts: Vec<FileArtifact>,
    own_callbacks: Vec<DeferredCallback>,
    inert: bool,
}

/// Scoped registration surface passed into a component factory. Clonable and
/// internally shared because sandboxed scripts can stash it; inertness after
/// the factory returns is therefore enforced dynamically, not by borrows.
#[derive(Clone)]
pub struct RegistrationHandle(Rc<RefCell<HandleState>>);

impl RegistrationHandle {
    fn new(session: Session) -> Self {
        RegistrationHandle(Rc::new(RefCell::new(HandleState {
            session,
            inherited_artifacts: Vec::new(),
            inherited_callbacks: Vec::new(),
            own_artifacts: Vec::new(),
            own_callbacks: Vec::new(),
            inert: false,
        })))
    }

    fn guard(&self, function: &str) -> Result<(), ProtocolError> {
        if self.0.borrow().inert {
            return Err(ProtocolError::handle_inert(function));
        }
        Ok(())
    }

    /// Once-key gate shared by every registration function. Returns true when
    /// the registration must be dropped.
    fn once_key_missed(&self, opts: &RegisterOptions) -> bool {
        match &opts.once {
            Some(once) => !self.0.borrow().session.claim_once_key(&once.key),
            None => false,
        }
    }

    fn resolve_name(&self, opts: &RegisterOptions) -> String {
        match &opts.name {
            Some(name) => name.clone(),
            None => self.0.borrow().session.next_auto_name(),
        }
    }

    /// Generic registration routine behind all structured artifact kinds.
    /// Returns the resolved name, or None when a once-key was already
    /// claimed.
    pub fn register(
        &self,
        kind: ArtifactKind,
        payload: &serde_json::Value,
        opts: &RegisterOptions,
    ) -> Result<Option<String>, ProtocolError> {
        let spec = kind.spec();
        debug_assert!(spec.canonical_json, "raw payloads go through register_raw");
        self.guard(kind.handle_name())?;
        if self.once_key_missed(opts) {
            return Ok(None);
        }
        let content =
            serde_json::to_string_pretty(payload).expect("JSON value serialization is infallible");
        Ok(Some(self.push_artifact(
            kind,
            opts.root_dir.as_deref().or(spec.root_dir).unwrap_or_default(),
            content,
            opts,
        )))
    }

    /// Raw registration: pre-serialized text with an explicit root directory
    /// and extension.
    pub fn register_raw(
        &self,
        content: &str,
        root_dir: &str,
        ext: &str,
        opts: &RegisterOptions,
    ) -> Result<Option<String>, ProtocolError> {
        self.guard("raw")?;
        if self.once_key_missed(opts) {
            return Ok(None);
        }
        let opts = RegisterOptions {
            ext: Some(ext.to_string()),
            ..opts.clone()
        };
        Ok(Some(self.push_artifact(
            ArtifactKind::Raw,
            root_dir,
            content.to_string(),
            &opts,
        )))
    }

    fn push_artifact(
        &self,
        kind: ArtifactKind,
        root_dir: &str,
        content: String,
        opts: &RegisterOptions,
    ) -> String {
        let name = self.resolve_name(opts);
        let ext = opts.ext.as_deref().unwrap_or(kind.spec().default_ext);
        let path = format!("{}/{}.{}", root_dir, name, ext);
        self.0
            .borrow_mut()
            .own_artifacts
            .push(FileArtifact { path, content });
        name
    }

    /// Register a deferred script callback. The callback is carried as source
    /// text and only ever executed by the run-time bootstrap. Returns false
    /// on a once-key miss.
    pub fn script(
        &self,
        callback_source: &str,
        opts: &RegisterOptions,
    ) -> Result<bool, ProtocolError> {
        self.guard("script")?;
        if self.once_key_missed(opts) {
            return Ok(false);
        }
        self.0.borrow_mut().own_callbacks.push(DeferredCallback {
            source: callback_source.to_string(),
        });
        Ok(true)
    }

    /// Splice an already-built component's sequences in front of this
    /// component's own registrations. Repeated calls keep implement-call
    /// order: oldest implemented first, own registrations last.
    pub fn implement(&self, other: &Component) -> Result<(), ProtocolError> {
        self.guard("implement")?;
        let mut state = self.0.borrow_mut();
        state
            .inherited_artifacts
            .extend(other.artifacts.iter().cloned());
        state
            .inherited_callbacks
            .extend(other.callbacks.iter().cloned());
        Ok(())
    }

    fn finish(self) -> Component {
        let mut state = self.0.borrow_mut();
        state.inert = true;
        let mut artifacts = std::mem::take(&mut state.inherited_artifacts);
        artifacts.append(&mut state.own_artifacts);
        let mut callbacks = std::mem::take(&mut state.inherited_callbacks);
        callbacks.append(&mut state.own_callbacks);
        Component {
            artifacts,
            callbacks,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// FACTORIES
// ═══════════════════════════════════════════════════════════════════════════════

/// Run one composition step: allocate a fresh handle bound to the session,
/// invoke the factory body, mark the handle inert, snapshot the component.
///
/// This is the single entry point both the Rust factory API and the sandboxed
/// executor go through, so the lifecycle rules live in exactly one place.
pub fn produce_component<E, F>(session: &Session, body: F) -> Result<Component, E>
where
    E: From<ProtocolError>,
    F: FnOnce(&RegistrationHandle) -> Result<(), E>,
{
    if session.is_established() {
        return Err(E::from(ProtocolError::new(
            ERR_FACTORY_AFTER_ESTABLISH,
            "component factory invoked after establishAddon()",
        )));
    }
    let handle = RegistrationHandle::new(session.clone());
    body(&handle)?;
    Ok(handle.finish())
}

/// Rust-facing equivalent of the sandbox's `defineComponentFactory` host
/// binding: wraps a callback into a reusable factory.
pub fn define_component_factory<F>(session: &Session, callback: F) -> ComponentFactory
where
    F: Fn(&RegistrationHandle, &[serde_json::Value]) -> Result<(), ProtocolError> + 'static,
{
    ComponentFactory {
        session: session.clone(),
        callback: Rc::new(callback),
    }
}

#[derive(Clone)]
pub struct ComponentFactory {
    session: Session,
    #[allow(clippy::type_complexity)]
    callback: Rc<dyn Fn(&RegistrationHandle, &[serde_json::Value]) -> Result<(), ProtocolError>>,
}

impl ComponentFactory {
    pub fn invoke(&self, args: &[serde_json::Value]) -> Result<Component, ProtocolError> {
        produce_component(&self.session, |handle| (self.callback)(handle, args))
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════════
