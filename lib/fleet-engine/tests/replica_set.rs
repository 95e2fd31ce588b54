mod common;

use common::{converge, fleet, spec, Sim, NAMESPACE, PUBLIC_LAN};
use fleet_api::v1alpha1::{NicTemplate, PlacementMode, ReplicaHealth, ReplicaRole, ZonePlacement};
use fleet_api::resources::Managed;
use fleet_core::{ActiveReplicaSource, FleetError, JournalOp, ObjectStore, ReplicaSlot, StaticIdentity};
use fleet_engine::builders::ServerInput;
use std::sync::Arc;
use std::time::Duration;

#[tokio::test(start_paused = true)]
async fn test_create_fleet_from_scratch() {
    let sim = Sim::start();
    sim.shared_lan(PUBLIC_LAN).await;
    let reconciler = sim.reconciler();
    let web = fleet("web", spec(2));

    let observation = converge(&reconciler, &web).await;

    assert!(observation.resource_exists);
    assert!(observation.diff.is_empty());
    assert_eq!(observation.status.replicas, 2);
    assert!(observation.status.reconciled);
    assert_eq!(
        Sim::names(&sim.servers, "web").await,
        vec!["web-server-0-0", "web-server-1-0"]
    );
    assert_eq!(
        Sim::names(&sim.firewall_rules, "web").await,
        vec!["web-fwrule-0-0-0-0", "web-fwrule-1-0-0-0"]
    );
    assert_eq!(sim.cloud.names("Server"), vec!["web-server-0-0", "web-server-1-0"]);

    for replica in &observation.status.replica_status {
        assert_eq!(replica.role, ReplicaRole::Replica);
        assert_eq!(replica.status, ReplicaHealth::Ready);
        assert!(replica.error_message.is_none());
    }

    let nic = sim.nics.get(NAMESPACE, "web-nic-0-0-0").await.unwrap().unwrap();
    assert!(!nic.spec.lan_id.is_empty());
    assert!(!nic.spec.dhcpv6);
}

#[tokio::test(start_paused = true)]
async fn test_records_are_created_in_dependency_order() {
    let sim = Sim::start();
    sim.shared_lan(PUBLIC_LAN).await;
    converge(&sim.reconciler(), &fleet("web", spec(1))).await;

    let created = |name: &str| sim.journal.position(JournalOp::Created, name).unwrap();
    assert!(created("web-bootvolume-0-0") < created("web-server-0-0"));
    assert!(created("web-server-0-0") < created("web-nic-0-0-0"));
    assert!(created("web-nic-0-0-0") < created("web-fwrule-0-0-0-0"));
}

#[tokio::test(start_paused = true)]
async fn test_reconcile_is_idempotent() {
    let sim = Sim::start();
    sim.shared_lan(PUBLIC_LAN).await;
    let reconciler = sim.reconciler();
    let web = fleet("web", spec(2));

    let first = converge(&reconciler, &web).await;
    let created = sim.journal.entries().len();

    let second = reconciler
        .reconcile(&web, &first.status.replica_status)
        .await
        .unwrap();

    assert!(second.resource_up_to_date);
    assert_eq!(sim.journal.entries().len(), created);
    assert_eq!(sim.cloud.create_count("Server"), 2);
    assert_eq!(sim.cloud.update_count("Server"), 0);
    // Unchanged replicas keep their timestamps
    assert_eq!(second.status.replica_status, first.status.replica_status);
}

#[tokio::test(start_paused = true)]
async fn test_zone_placement() {
    let sim = Sim::start();
    sim.shared_lan(PUBLIC_LAN).await;
    let reconciler = sim.reconciler();

    converge(&reconciler, &fleet("spread", spec(3))).await;
    let zones: Vec<String> = sim
        .servers
        .snapshot()
        .await
        .into_iter()
        .map(|s| s.spec.availability_zone)
        .collect();
    assert_eq!(zones, vec!["ZONE_1", "ZONE_2", "ZONE_1"]);

    let mut pinned = spec(2);
    pinned.placement = ZonePlacement {
        mode: PlacementMode::Fixed,
        zone: Some("ZONE_2".to_string()),
    };
    converge(&reconciler, &fleet("pinned", pinned)).await;
    for name in Sim::names(&sim.servers, "pinned").await {
        let server = sim.servers.get(NAMESPACE, &name).await.unwrap().unwrap();
        assert_eq!(server.spec.availability_zone, "ZONE_2");
    }
}

#[tokio::test(start_paused = true)]
async fn test_invalid_spec_is_rejected_before_provisioning() {
    let sim = Sim::start();
    let mut invalid = spec(1);
    invalid.template.nics.clear();

    let result = sim.reconciler().reconcile(&fleet("web", invalid), &[]).await;

    assert!(matches!(result, Err(FleetError::InvalidSpec(_))));
    assert!(sim.journal.entries().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_provisioning_failure_removes_record() {
    let sim = Sim::start();
    sim.shared_lan(PUBLIC_LAN).await;
    let reconciler = sim.reconciler();
    let web = fleet("web", spec(1));

    sim.cloud.reject("Server", "quota exceeded");
    let observation = reconciler.reconcile(&web, &[]).await.unwrap();

    assert!(!observation.resource_up_to_date);
    assert!(observation.diff.iter().any(|d| d.contains("quota exceeded")));
    assert_eq!(observation.status.replicas, 0);

    sim.settle().await;
    assert!(Sim::names(&sim.servers, "web").await.is_empty());
    assert_eq!(Sim::names(&sim.volumes, "web").await, vec!["web-bootvolume-0-0"]);

    sim.cloud.clear_rejections();
    converge(&reconciler, &web).await;

    // The boot volume from the failed attempt is reused
    assert_eq!(sim.cloud.create_count("Volume"), 1);
    assert_eq!(Sim::names(&sim.servers, "web").await, vec!["web-server-0-0"]);
}

#[tokio::test(start_paused = true)]
async fn test_nic_waits_for_lan() {
    let sim = Sim::start();
    let reconciler = sim.reconciler();
    let web = fleet("web", spec(1));

    let observation = reconciler.reconcile(&web, &[]).await.unwrap();

    assert!(!observation.resource_up_to_date);
    assert!(observation
        .diff
        .iter()
        .any(|d| d.contains(&format!("{} not found", PUBLIC_LAN))));
    assert!(Sim::names(&sim.nics, "web").await.is_empty());
    // Not a failure of the replica itself
    assert!(observation.status.replica_status[0].error_message.is_none());

    sim.shared_lan(PUBLIC_LAN).await;
    converge(&reconciler, &web).await;
    assert_eq!(Sim::names(&sim.nics, "web").await, vec!["web-nic-0-0-0"]);
}

#[tokio::test(start_paused = true)]
async fn test_rolling_update_creates_before_destroying() {
    let sim = Sim::start();
    sim.shared_lan(PUBLIC_LAN).await;
    let reconciler = sim.reconciler();
    converge(&reconciler, &fleet("web", spec(2))).await;

    let mut bigger = spec(2);
    bigger.template.cores = 4;
    let web = fleet("web", bigger);
    let observation = converge(&reconciler, &web).await;

    assert_eq!(
        Sim::names(&sim.servers, "web").await,
        vec!["web-server-0-1", "web-server-1-1"]
    );
    for server in sim.servers.snapshot().await {
        assert_eq!(server.spec.cores, 4);
    }
    assert_eq!(observation.status.replicas, 2);

    for index in 0..2 {
        let next = sim
            .journal
            .position(JournalOp::Created, &format!("web-fwrule-{}-0-0-1", index))
            .unwrap();
        let retired = sim
            .journal
            .position(JournalOp::DeleteRequested, &format!("web-server-{}-0", index))
            .unwrap();
        assert!(next < retired);
    }
    assert_eq!(sim.metrics.rollouts_total.with_label_values(&["web"]).get(), 2.0);
}

#[tokio::test(start_paused = true)]
async fn test_generations_only_increase() {
    let sim = Sim::start();
    sim.shared_lan(PUBLIC_LAN).await;
    let reconciler = sim.reconciler();

    let mut current = spec(1);
    converge(&reconciler, &fleet("web", current.clone())).await;
    for cores in [4, 2] {
        current.template.cores = cores;
        converge(&reconciler, &fleet("web", current.clone())).await;
    }

    assert_eq!(Sim::names(&sim.servers, "web").await, vec!["web-server-0-2"]);
    assert_eq!(Sim::names(&sim.volumes, "web").await, vec!["web-bootvolume-0-2"]);
    assert_eq!(sim.cloud.names("Server"), vec!["web-server-0-2"]);
}

#[tokio::test(start_paused = true)]
async fn test_labels_do_not_trigger_rollout() {
    let sim = Sim::start();
    sim.shared_lan(PUBLIC_LAN).await;
    let reconciler = sim.reconciler();
    converge(&reconciler, &fleet("web", spec(1))).await;

    let mut relabelled = spec(1);
    relabelled
        .template
        .labels
        .insert("team".to_string(), "storage".to_string());
    let observation = reconciler
        .reconcile(&fleet("web", relabelled), &[])
        .await
        .unwrap();

    assert!(observation.resource_up_to_date);
    assert_eq!(Sim::names(&sim.servers, "web").await, vec!["web-server-0-0"]);
}

#[tokio::test(start_paused = true)]
async fn test_nic_topology_change_rolls_replica() {
    let sim = Sim::start();
    sim.shared_lan(PUBLIC_LAN).await;
    sim.shared_lan("private-lan").await;
    let reconciler = sim.reconciler();
    converge(&reconciler, &fleet("web", spec(1))).await;

    let mut two_nics = spec(1);
    two_nics.template.nics.push(NicTemplate {
        name: "private".to_string(),
        lan: "private-lan".to_string(),
        dhcp: true,
        ..Default::default()
    });
    converge(&reconciler, &fleet("web", two_nics)).await;

    assert_eq!(
        Sim::names(&sim.nics, "web").await,
        vec!["web-nic-0-0-1", "web-nic-0-1-1"]
    );
}

#[tokio::test(start_paused = true)]
async fn test_interrupted_update_is_resumed() {
    let sim = Sim::start();
    sim.shared_lan(PUBLIC_LAN).await;
    let reconciler = sim.reconciler();
    converge(&reconciler, &fleet("web", spec(1))).await;

    let mut bigger = spec(1);
    bigger.template.cores = 4;
    let web = fleet("web", bigger);

    // A previous pass got as far as the next generation's server
    let slot = ReplicaSlot::new(0, 1);
    let volume = reconciler
        .replicas()
        .boot_volumes
        .ensure(&web, &slot)
        .await
        .unwrap();
    let boot_volume_id = volume.external_id().unwrap().to_string();
    reconciler
        .replicas()
        .servers
        .ensure(&web, &ServerInput { slot, boot_volume_id })
        .await
        .unwrap();

    converge(&reconciler, &web).await;

    assert_eq!(Sim::names(&sim.servers, "web").await, vec!["web-server-0-1"]);
    assert_eq!(Sim::names(&sim.volumes, "web").await, vec!["web-bootvolume-0-1"]);
    // The half-built generation was completed, not started over
    assert_eq!(sim.cloud.create_count("Server"), 2);
    assert!(sim
        .journal
        .position(JournalOp::Created, "web-server-0-2")
        .is_none());
    let nic_created = sim
        .journal
        .position(JournalOp::Created, "web-nic-0-0-1")
        .unwrap();
    let old_server_deleted = sim
        .journal
        .position(JournalOp::DeleteRequested, "web-server-0-0")
        .unwrap();
    assert!(nic_created < old_server_deleted);
}

#[tokio::test(start_paused = true)]
async fn test_cleanup_resumes_after_cutover() {
    let sim = Sim::start();
    sim.shared_lan(PUBLIC_LAN).await;
    let reconciler = sim.reconciler();
    converge(&reconciler, &fleet("web", spec(1))).await;

    let mut bigger = spec(1);
    bigger.template.cores = 4;
    let web = fleet("web", bigger);

    // Next generation complete, old one never torn down
    reconciler
        .replicas()
        .ensure_slot(&web, ReplicaSlot::new(0, 1))
        .await
        .unwrap();
    let before = reconciler.observe(&web, &[]).await.unwrap();
    assert!(before.diff.iter().any(|d| d == "replica 0: 2 generations present"));

    converge(&reconciler, &web).await;

    assert_eq!(Sim::names(&sim.servers, "web").await, vec!["web-server-0-1"]);
    assert_eq!(sim.cloud.create_count("Server"), 2);
}

#[tokio::test(start_paused = true)]
async fn test_scale_up_and_down() {
    let sim = Sim::start();
    sim.shared_lan(PUBLIC_LAN).await;
    let reconciler = sim.reconciler();

    converge(&reconciler, &fleet("web", spec(1))).await;
    let observation = converge(&reconciler, &fleet("web", spec(3))).await;
    assert_eq!(observation.status.replicas, 3);
    assert_eq!(
        Sim::names(&sim.servers, "web").await,
        vec!["web-server-0-0", "web-server-1-0", "web-server-2-0"]
    );

    let observation = converge(&reconciler, &fleet("web", spec(1))).await;
    assert_eq!(observation.status.replicas, 1);
    assert_eq!(Sim::names(&sim.servers, "web").await, vec!["web-server-0-0"]);
    assert_eq!(Sim::names(&sim.nics, "web").await, vec!["web-nic-0-0-0"]);
    assert_eq!(sim.cloud.names("Server"), vec!["web-server-0-0"]);
    assert_eq!(sim.cloud.names("FirewallRule"), vec!["web-fwrule-0-0-0-0"]);
}

#[tokio::test(start_paused = true)]
async fn test_roles_and_health() {
    let sim = Sim::start();
    sim.shared_lan(PUBLIC_LAN).await;
    let reconciler = sim.reconciler();
    let identity: Arc<dyn ActiveReplicaSource> = Arc::new(StaticIdentity::active("web-server-1-0"));
    let web = fleet("web", spec(2)).with_identity(Some(identity));

    let observation = converge(&reconciler, &web).await;
    let roles: Vec<ReplicaRole> = observation
        .status
        .replica_status
        .iter()
        .map(|r| r.role)
        .collect();
    assert_eq!(roles, vec![ReplicaRole::Passive, ReplicaRole::Active]);

    sim.cloud.break_object("web-server-0-0", "CRASHED");
    sim.settle().await;

    let observation = reconciler
        .observe(&web, &observation.status.replica_status)
        .await
        .unwrap();
    let broken = &observation.status.replica_status[0];
    assert_eq!(broken.name, "web-server-0-0");
    assert_eq!(broken.status, ReplicaHealth::Error);
    assert_eq!(observation.status.replica_status[1].status, ReplicaHealth::Ready);
    assert!(!observation.resource_up_to_date);
    assert_eq!(
        sim.metrics.ready_replicas.with_label_values(&["web"]).get(),
        1.0
    );
}

#[tokio::test(start_paused = true)]
async fn test_rollout_timeout() {
    let sim = Sim::start();
    sim.shared_lan(PUBLIC_LAN).await;
    let web = fleet("web", spec(1));

    let impatient = fleet_engine::ReplicaSetReconciler::new(
        &sim.stores(),
        sim.config().with_rollout_timeout(Duration::from_secs(2)),
        sim.cancel.clone(),
        sim.metrics.clone(),
    );
    let result = impatient.reconcile(&web, &[]).await;
    assert!(matches!(result, Err(FleetError::Timeout { .. })));

    // The next pass picks up whatever the interrupted one left behind
    converge(&sim.reconciler(), &web).await;
    assert_eq!(sim.cloud.create_count("Server"), 1);
    assert_eq!(sim.cloud.create_count("Volume"), 1);
}

#[tokio::test(start_paused = true)]
async fn test_delete_fleet() {
    let sim = Sim::start();
    sim.shared_lan(PUBLIC_LAN).await;
    let reconciler = sim.reconciler();
    let web = fleet("web", spec(2));
    converge(&reconciler, &web).await;

    reconciler.delete(&web).await.unwrap();

    assert!(Sim::names(&sim.servers, "web").await.is_empty());
    assert!(Sim::names(&sim.volumes, "web").await.is_empty());
    assert!(Sim::names(&sim.nics, "web").await.is_empty());
    assert!(Sim::names(&sim.firewall_rules, "web").await.is_empty());
    assert!(sim.cloud.names("Server").is_empty());

    let observation = reconciler.observe(&web, &[]).await.unwrap();
    assert!(!observation.resource_exists);

    // Deleting again is a no-op
    reconciler.delete(&web).await.unwrap();
}
