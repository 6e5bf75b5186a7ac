use procdeck::models::command_state::CommandState;
use procdeck::models::process_state::{ProcessStateRecord, TerminationReason};
use procdeck::workspace::{workspace_hash, WorkspaceIdentity};

fn state(code: &str) -> CommandState {
    CommandState {
        code: code.to_owned(),
        alive: false,
        termination_reason: TerminationReason::None,
        recorded_reason: TerminationReason::None,
        has_output: false,
        locked: false,
        workspace_hash: None,
        owned_by_workspace: false,
        debug_active: false,
    }
}

#[test]
fn differs_on_observed_fields_only() {
    let base = state("SRV");

    let mut alive = base.clone();
    alive.alive = true;
    assert!(alive.differs_from(&base));

    let mut locked = base.clone();
    locked.locked = true;
    assert!(locked.differs_from(&base));

    let mut debugging = base.clone();
    debugging.debug_active = true;
    assert!(debugging.differs_from(&base));

    let mut crashed = base.clone();
    crashed.termination_reason = TerminationReason::Crashed;
    assert!(crashed.differs_from(&base));

    let mut cosmetic = base.clone();
    cosmetic.has_output = true;
    cosmetic.workspace_hash = Some("h".into());
    cosmetic.recorded_reason = TerminationReason::Crashed;
    assert!(!cosmetic.differs_from(&base));
}

#[test]
fn termination_reason_labels() {
    assert_eq!(TerminationReason::default(), TerminationReason::None);
    assert_eq!(TerminationReason::None.as_str(), "none");
    assert_eq!(TerminationReason::UserRequested.as_str(), "user_requested");
    assert_eq!(TerminationReason::Crashed.as_str(), "crashed");
    assert_eq!(
        serde_json::to_string(&TerminationReason::UserRequested).expect("json"),
        "\"user_requested\""
    );
}

#[test]
fn empty_record_detection() {
    let mut record = ProcessStateRecord::default();
    assert!(record.is_empty());
    record.additional_forbidden_vars.push("X".into());
    assert!(!record.is_empty());
}

#[test]
fn workspace_hash_is_sha256_hex() {
    let temp = tempfile::tempdir().expect("tempdir");
    let identity = WorkspaceIdentity::new(temp.path());

    assert_eq!(identity.hash().len(), 64);
    assert!(identity.hash().chars().all(|c| c.is_ascii_hexdigit()));
    assert_eq!(identity.hash(), workspace_hash(identity.root()));
    assert!(identity.owns(Some(identity.hash())));
    assert!(!identity.owns(None));
    assert!(!identity.owns(Some("other")));
}

#[test]
fn same_directory_same_hash() {
    let temp = tempfile::tempdir().expect("tempdir");
    let nested = temp.path().join("project");
    std::fs::create_dir(&nested).expect("mkdir");

    let direct = WorkspaceIdentity::new(&nested);
    let dotted = WorkspaceIdentity::new(nested.join("..").join("project"));
    assert_eq!(direct.hash(), dotted.hash());

    let other = WorkspaceIdentity::new(temp.path());
    assert_ne!(direct.hash(), other.hash());
}
