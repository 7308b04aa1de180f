//! Run-time Bootstrap Synthesizer.
//!
//! Emits a self-contained JavaScript re-implementation of the component
//! composition protocol, specialized for the engine environment: file
//! registrations materialize nothing and report `false`, script callbacks
//! are collected and invoked exactly once when `establishAddon` runs. The
//! emitted text never executes during the build; it is embedded inside the
//! banner wrapper, where `__modules` is in scope.
//!
//! This duplication of `component.rs` is deliberate. The two environments
//! have disjoint capabilities (file system vs. real modules) and disjoint
//! lifetimes (one build vs. one engine session); the implementations are
//! kept behaviorally identical by the shared property tests instead of a
//! shared abstraction across the source-text boundary.

/// Protocol re-implementation embedded in every shipped bundle. Expects a
/// `__modules` binding in scope (supplied by the banner wrapper) and
/// publishes the two host bindings on `globalThis` for the appended bundle.
const RUNTIME_BOOTSTRAP: &str = r#"const { defineComponentFactory, establishAddon } = (() => {
  const onceKeys = new Set();
  let ordinal = 0;
  let established = false;
  const missedOnceKey = (opts) => {
    if (opts && opts.once) {
      if (onceKeys.has(opts.once.key)) return true;
      onceKeys.add(opts.once.key);
    }
    return false;
  };
  const makeHandle = (component) => {
    const state = { inert: false };
    const guard = (fn) => {
      if (state.inert) {
        throw new Error("[CB-ERR-HANDLE-INERT] " + fn + "() called on an inert registration handle after its factory returned");
      }
    };
    const fileKind = (fn) => (content, opts) => {
      guard(fn);
      if (missedOnceKey(opts)) return false;
      if (!(opts && opts.name !== undefined)) ordinal += 1;
      return false;
    };
    const handle = {
      entity: fileKind("entity"),
      item: fileKind("item"),
      block: fileKind("block"),
      recipe: fileKind("recipe"),
      lootTable: fileKind("lootTable"),
      particle: fileKind("particle"),
      animation: fileKind("animation"),
      raw: fileKind("raw"),
      script(callback, opts) {
        guard("script");
        if (missedOnceKey(opts)) return false;
        component.own.push(callback);
        return true;
      },
      implement(other) {
        guard("implement");
        component.inherited.push(...other.callbacks);
      },
    };
    return { handle, state };
  };
  function defineComponentFactory(callback) {
    return (...args) => {
      if (established) {
        throw new Error("[CB-ERR-FACTORY-AFTER-ESTABLISH] component factory invoked after establishAddon()");
      }
      const component = { inherited: [], own: [] };
      const { handle, state } = makeHandle(component);
      callback(handle, ...args);
      state.inert = true;
      return { callbacks: [...component.inherited, ...component.own] };
    };
  }
  function establishAddon(root) {
    if (established) {
      throw new Error("[CB-ERR-DOUBLE-ESTABLISH] establishAddon() called twice within one session");
    }
    established = true;
    for (const callback of root.callbacks) {
      callback(__modules);
    }
  }
  return { defineComponentFactory, establishAddon };
})();
globalThis.defineComponentFactory = defineComponentFactory;
globalThis.establishAddon = establishAddon;
"#;

/// The bootstrap source text to embed in the banner wrapper.
pub fn synthesize_bootstrap() -> &'static str {
    RUNTIME_BOOTSTRAP
}

// ═══════════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════════
