use procdeck::models::debug::{DebugSession, DebugSessionId};
use procdeck::reconcile::DebugRegistry;

#[test]
fn debug_active_requires_matching_adapter() {
    let registry = DebugRegistry::new();
    assert!(!registry.is_debug_active("SRV", "rdbg"));

    assert!(registry
        .register("SRV", DebugSession::new("rdbg", "Attach SRV"))
        .is_none());
    assert!(registry
        .register("JOBS", DebugSession::new("node", "Attach JOBS"))
        .is_none());

    assert!(registry.is_debug_active("SRV", "rdbg"));
    assert!(!registry.is_debug_active("JOBS", "rdbg"));
    assert!(registry.is_debug_active("JOBS", "node"));
}

#[test]
fn unregister_by_id() {
    let registry = DebugRegistry::new();
    let session = DebugSession::new("rdbg", "SRV");
    let id = session.id;
    assert!(registry.register("SRV", session).is_none());

    assert_eq!(registry.unregister(DebugSessionId::new_v4()), None);
    assert_eq!(registry.unregister(id).as_deref(), Some("SRV"));
    assert!(registry.session("SRV").is_none());
    assert!(!registry.is_debug_active("SRV", "rdbg"));
}

#[test]
fn register_replaces_and_clones_share() {
    let registry = DebugRegistry::new();
    let shared = registry.clone();

    let first = DebugSession::new("rdbg", "first");
    let first_id = first.id;
    assert!(registry.register("SRV", first).is_none());
    let replaced = shared
        .register("SRV", DebugSession::new("rdbg", "second"))
        .expect("previous session returned");

    assert_eq!(replaced.id, first_id);
    assert_eq!(registry.session("SRV").expect("session").name, "second");
}
