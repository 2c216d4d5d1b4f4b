//! Tests for the authorization collaborators

use sagco_core::core::{authorize, Action, ActionKind, AllowAll, AllowList, Authorizer, Caller, CoreError};

#[test]
fn test_allow_all_permits_everything() {
    let caller = Caller::new("anyone");
    assert!(AllowAll.allowed(&caller, &Action::Publish { topic: "x" }));
    assert!(authorize(&AllowAll, &caller, &Action::Schedule).is_ok());
}

#[test]
fn test_allow_list_grants_per_kind() {
    let policy = AllowList::new()
        .grant(Caller::new("writer"), [ActionKind::Put, ActionKind::Remove])
        .grant(Caller::new("ops"), [ActionKind::Schedule, ActionKind::Cancel]);

    let writer = Caller::new("writer");
    assert!(policy.allowed(&writer, &Action::Put { key: "a" }));
    assert!(!policy.allowed(&writer, &Action::Schedule));

    let ops = Caller::new("ops");
    assert!(policy.allowed(&ops, &Action::Cancel));
    assert!(!policy.allowed(&ops, &Action::Subscribe { pattern: "*" }));
}

#[test]
fn test_refusal_names_caller_and_action() {
    let err = authorize(&AllowList::new(), &Caller::new("guest"), &Action::Publish { topic: "a.b" })
        .unwrap_err();
    match err {
        CoreError::PermissionDenied { caller, action } => {
            assert_eq!(caller, "guest");
            assert_eq!(action, "publish on `a.b`");
        }
        other => panic!("unexpected error {other:?}"),
    }
}
