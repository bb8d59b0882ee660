//! Hybrid snapshot strategy: the inline/shared boundary and the cost of
//! checkpointing large state.

use std::time::Instant;

use serde_json::Value;
use warden_kernel::config::{Kernel, KernelConfig};
use warden_kernel::object::{tab_attrs, AttrMap, ObjectKind};
use warden_kernel::renderer::Renderer;
use warden_kernel::txn::PreImageKind;

fn kernel() -> Kernel {
    Kernel::init(KernelConfig::default()).unwrap()
}

// Returns only the id: an outstanding `ObjectView` would hold a second
// reference to the attribute map and skew the refcount assertions.
fn tab_with_payload(kernel: &Kernel, bytes: usize) -> warden_kernel::object::ObjectId {
    let mut attrs = tab_attrs("about:blank", None);
    attrs.insert("dom".into(), Value::String("x".repeat(bytes)));
    kernel.objects.create(ObjectKind::Tab, attrs).id
}

#[test]
fn small_pre_images_are_value_copies() {
    let kernel = kernel();
    let tab = tab_with_payload(&kernel, 9 * 1024);
    let tx = kernel.txns.begin().unwrap();
    kernel.renderer.navigate(tab, "https://example.com/").unwrap();

    let pending = kernel.txns.pending_pre_images(tx);
    let (_, kind, refcount) = pending
        .iter()
        .find(|(id, _, _)| *id == tab)
        .expect("mutation captured a pre-image");
    assert_eq!(*kind, PreImageKind::Inline);
    assert_eq!(*refcount, None);
    kernel.txns.abort(tx).unwrap();
}

#[test]
fn large_pre_images_are_references_with_refcount() {
    let kernel = kernel();
    let tab = tab_with_payload(&kernel, 12 * 1024);
    let tx = kernel.txns.begin().unwrap();
    kernel.renderer.navigate(tab, "https://example.com/").unwrap();

    let pending = kernel.txns.pending_pre_images(tx);
    let (_, kind, refcount) = pending
        .iter()
        .find(|(id, _, _)| *id == tab)
        .expect("mutation captured a pre-image");
    assert_eq!(*kind, PreImageKind::Shared);
    // The checkpoint chain holds the only reference to the old version:
    // the object manager already points at the new one.
    assert_eq!(*refcount, Some(1));
    kernel.txns.abort(tx).unwrap();
}

#[test]
fn five_megabyte_checkpoint_is_fast_and_does_not_copy() {
    let kernel = kernel();
    let tab = tab_with_payload(&kernel, 5 * 1024 * 1024);
    let tx = kernel.txns.begin().unwrap();

    let started = Instant::now();
    kernel.renderer.navigate(tab, "https://example.com/").unwrap();
    let pending = kernel.txns.pending_pre_images(tx);
    kernel.txns.checkpoint(tx, "big").unwrap();
    let elapsed = started.elapsed();

    let (_, kind, _) = pending
        .iter()
        .find(|(id, _, _)| *id == tab)
        .expect("mutation captured a pre-image");
    assert_eq!(*kind, PreImageKind::Shared, "5 MiB must take the reference path");
    assert!(
        elapsed.as_millis() < 100,
        "capture + checkpoint took {elapsed:?}"
    );
    kernel.txns.commit(tx).unwrap();
}

#[test]
fn rollback_restores_large_state_bit_identical() {
    let kernel = kernel();
    let payload = "y".repeat(64 * 1024);
    let mut attrs = tab_attrs("about:blank", None);
    attrs.insert("dom".into(), Value::String(payload.clone()));
    let tab = kernel.objects.create(ObjectKind::Tab, attrs);

    let tx = kernel.txns.begin().unwrap();
    kernel.txns.checkpoint(tx, "pre").unwrap();
    kernel.renderer.navigate(tab.id, "https://example.com/").unwrap();
    kernel.txns.rollback(tx, Some("pre")).unwrap();

    let restored = kernel.objects.get(tab.id).unwrap();
    assert_eq!(restored.attr_str("dom"), Some(payload.as_str()));
    assert_eq!(restored.attr_str("url"), Some("about:blank"));
    kernel.txns.commit(tx).unwrap();
}

#[test]
fn untouched_objects_are_not_captured() {
    let kernel = kernel();
    let touched = kernel
        .objects
        .create(ObjectKind::Tab, tab_attrs("about:blank", None));
    let untouched = kernel
        .objects
        .create(ObjectKind::Tab, tab_attrs("about:blank", None));
    let _ = untouched;
    // A second object exists but only one is mutated; copy-on-write
    // must capture exactly the touched set.
    let mut filters = AttrMap::new();
    filters.insert("url".into(), Value::String("about:blank".into()));
    assert_eq!(kernel.objects.query(ObjectKind::Tab, &filters).len(), 2);

    let tx = kernel.txns.begin().unwrap();
    kernel.renderer.navigate(touched.id, "https://example.com/").unwrap();
    let pending = kernel.txns.pending_pre_images(tx);
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].0, touched.id);
    kernel.txns.abort(tx).unwrap();
}
