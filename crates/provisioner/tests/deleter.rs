#![forbid(unsafe_code)]

mod support;

use std::sync::atomic::Ordering;

use fuxi_core::constants::ANNOTATION_PROVISIONED_BY;
use fuxi_core::Outcome;
use k8s_openapi::api::core::v1::PersistentVolume;
use support::{claim, rig, with_phase, Rig};

/// Provision `ns/claim1` and return the PV object as the API server stored it.
async fn provisioned(r: &Rig) -> PersistentVolume {
    assert_eq!(r.provisioner.reconcile(claim("ns", "claim1", "u1", "sc1")).await, Ok(Outcome::Done));
    r.volumes.created().remove(0)
}

#[tokio::test]
async fn released_volume_is_deleted_and_name_freed() {
    let r = rig();
    let pv = provisioned(&r).await;
    assert!(r.provisioner.is_created("pvc-u1"));

    let out = r.deleter.reconcile(with_phase(pv.clone(), "Released")).await;
    assert_eq!(out, Ok(Outcome::Done));

    let deleted = r.plugin.deleted();
    assert_eq!(deleted.len(), 1);
    assert_eq!(deleted[0].metadata.name.as_deref(), Some("pvc-u1"));
    assert_eq!(r.volumes.deleted(), vec!["pvc-u1"]);
    assert!(!r.provisioner.is_created("pvc-u1"));

    // a new claim with the same uid can be provisioned again
    assert_eq!(r.provisioner.reconcile(claim("ns", "claim1", "u1", "sc1")).await, Ok(Outcome::Done));
}

#[tokio::test]
async fn only_released_delete_policy_volumes_of_ours_qualify() {
    let r = rig();
    let pv = provisioned(&r).await;

    let bound = with_phase(pv.clone(), "Bound");

    let mut retained = with_phase(pv.clone(), "Released");
    retained.spec.get_or_insert_with(Default::default).persistent_volume_reclaim_policy = Some("Retain".into());

    let mut foreign = with_phase(pv.clone(), "Released");
    foreign.metadata.annotations = None;

    let mut other_plugin = with_phase(pv, "Released");
    other_plugin
        .metadata
        .annotations
        .get_or_insert_with(Default::default)
        .insert(ANNOTATION_PROVISIONED_BY.to_string(), "kubernetes.io/gce-pd".to_string());

    for (case, pv) in [("bound", bound), ("retain", retained), ("foreign", foreign), ("other plugin", other_plugin)] {
        let out = r.deleter.reconcile(pv).await;
        assert!(matches!(out, Ok(Outcome::Skipped(_))), "{case}: {out:?}");
    }
    assert!(r.plugin.deleted().is_empty());
    assert!(r.volumes.deleted().is_empty());
    assert!(r.provisioner.is_created("pvc-u1"));
}

#[tokio::test]
async fn asset_delete_failure_keeps_the_pv() {
    let r = rig();
    let pv = with_phase(provisioned(&r).await, "Released");
    r.plugin.fail_delete.store(true, Ordering::SeqCst);

    assert!(r.deleter.reconcile(pv.clone()).await.is_err());
    assert!(r.volumes.deleted().is_empty());

    // next re-delivery succeeds
    r.plugin.fail_delete.store(false, Ordering::SeqCst);
    assert_eq!(r.deleter.reconcile(pv).await, Ok(Outcome::Done));
    assert_eq!(r.volumes.deleted(), vec!["pvc-u1"]);
}

#[tokio::test]
async fn pv_delete_failure_is_reported() {
    let r = rig();
    let pv = with_phase(provisioned(&r).await, "Released");
    r.volumes.fail_delete.store(true, Ordering::SeqCst);

    assert!(r.deleter.reconcile(pv).await.is_err());
    assert_eq!(r.plugin.deleted().len(), 1);
}
