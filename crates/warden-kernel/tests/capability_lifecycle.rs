//! Capability lifecycle: grant, use, revoke, and the restart guarantee.
//!
//! Verifies the no-zombie-token property end to end: a revocation
//! persists a tombstone before returning, and a broker rebuilt over the
//! same store refuses the request with `revoked`, not `no_grant`, for
//! any `(op, resource)` the dead capability covered.

use std::sync::Arc;

use tempfile::TempDir;
use warden_kernel::audit::AuditLog;
use warden_kernel::capability::{
    CapabilityBroker, CapabilityError, CheckContext, Constraints, DenyReason, RevocationStore,
    RiskTier,
};

fn broker_at(dir: &TempDir) -> CapabilityBroker {
    let audit = Arc::new(AuditLog::in_memory().unwrap());
    let store = RevocationStore::open(dir.path().join("revocations.db")).unwrap();
    CapabilityBroker::new(audit, store).unwrap()
}

#[test]
fn grant_use_revoke_then_restart() {
    let dir = tempfile::tempdir().unwrap();

    {
        let broker = broker_at(&dir);
        broker
            .grant(
                "agent:1",
                "tab.read",
                "tab:*",
                RiskTier::Read,
                None,
                Constraints::none(),
            )
            .unwrap();
        let tier = broker
            .require("agent:1", "tab.read", "tab:42", CheckContext::default())
            .unwrap();
        assert_eq!(tier, RiskTier::Read);

        assert_eq!(broker.revoke_all("agent:1").unwrap(), 1);
    }

    // Process restart: fresh broker, same revocation store.
    let broker = broker_at(&dir);
    let err = broker
        .require("agent:1", "tab.read", "tab:42", CheckContext::default())
        .unwrap_err();
    assert!(
        matches!(
            err,
            CapabilityError::Denied {
                reason: DenyReason::Revoked,
                ..
            }
        ),
        "restart must not resurrect nor forget the revocation: {err}"
    );
}

#[test]
fn revoked_token_fails_for_every_op_resource_pair() {
    let dir = tempfile::tempdir().unwrap();
    let token = {
        let broker = broker_at(&dir);
        let cap = broker
            .grant(
                "agent:1",
                "tab.**",
                "*",
                RiskTier::Stateful,
                None,
                Constraints::none(),
            )
            .unwrap();
        broker.revoke(cap.token, "user request").unwrap();
        cap.token
    };

    let broker = broker_at(&dir);
    for (op, resource) in [
        ("tab.read", "tab:1"),
        ("tab.navigate", "tab:999"),
        ("tab.extract.links", "tab:7"),
    ] {
        assert!(
            !broker
                .check("agent:1", op, resource, CheckContext::default())
                .unwrap(),
            "revoked {token} must not satisfy {op} on {resource}"
        );
    }
}

#[test]
fn revocation_is_durable_even_without_restart() {
    let dir = tempfile::tempdir().unwrap();
    let broker = broker_at(&dir);
    let cap = broker
        .grant(
            "agent:1",
            "form.fill",
            "form:*",
            RiskTier::Stateful,
            None,
            Constraints::none(),
        )
        .unwrap();
    broker.revoke(cap.token, "test").unwrap();

    // The tombstone row is already on disk.
    let store = RevocationStore::open(dir.path().join("revocations.db")).unwrap();
    assert!(store.is_revoked(&cap.token.to_string()).unwrap());
}

#[test]
fn expiry_tombstones_rather_than_deletes() {
    let dir = tempfile::tempdir().unwrap();
    let broker = broker_at(&dir);
    broker
        .grant(
            "agent:1",
            "tab.read",
            "tab:*",
            RiskTier::Read,
            Some(-1.0),
            Constraints::none(),
        )
        .unwrap();

    let err = broker
        .require("agent:1", "tab.read", "tab:1", CheckContext::default())
        .unwrap_err();
    assert!(matches!(
        err,
        CapabilityError::Denied {
            reason: DenyReason::Expired,
            ..
        }
    ));
    // The record survives as a tombstone; listing excludes it.
    assert!(broker.list("agent:1").is_empty());
}

#[test]
fn wildcard_semantics_match_segment_rules() {
    let dir = tempfile::tempdir().unwrap();
    let broker = broker_at(&dir);
    broker
        .grant(
            "agent:1",
            "tab.*",
            "tab:*",
            RiskTier::Read,
            None,
            Constraints::none(),
        )
        .unwrap();

    let ctx = CheckContext::default();
    assert!(broker.check("agent:1", "tab.read", "tab:1", ctx).unwrap());
    // One segment only: deeper ops need `**`.
    assert!(!broker
        .check("agent:1", "tab.extract.links", "tab:1", ctx)
        .unwrap());
    // Resource kind must match.
    assert!(!broker.check("agent:1", "tab.read", "form:1", ctx).unwrap());
}
