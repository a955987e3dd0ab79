//! Integration tests for the publisher and consumer.

use mirrorsync_engine::{
    ChangeKind, ChangePublisher, Consumer, ConsumerConfig, DeadLetterReason, DependencyProbe,
    DependencyRequirement, DispatchOutcome, EntityEvent, FieldRule, FnProbe, HandlerRegistry,
    MemoryBus, MemoryDeadLetters, MemoryMirrorStore, MessageSink, MirrorHandler, MirrorRecord,
    MirrorSchema, MirrorStore, PublishOutcome, RetryConfig,
};
use mirrorsync_protocol::{EntityKey, Snapshot, SyncMessage};
use mirrorsync_testkit::{company_created, company_snapshot, employee_created, t};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

fn registry() -> HandlerRegistry {
    HandlerRegistry::new()
        .with(MirrorHandler::new(
            MirrorSchema::new("company")
                .required("name")
                .optional("country")
                .with_soft_delete_field("isDeleted"),
        ))
        .with(
            MirrorHandler::new(
                MirrorSchema::new("employee")
                    .required("name")
                    .required("companyId")
                    .with_soft_delete_field("isDeleted"),
            )
            .requires(DependencyRequirement::required("companyId", "company")),
        )
}

fn consumer() -> (Arc<Consumer<MemoryMirrorStore>>, Arc<MemoryDeadLetters>) {
    consumer_with_probe(None)
}

fn consumer_with_probe(
    probe: Option<Arc<dyn DependencyProbe>>,
) -> (Arc<Consumer<MemoryMirrorStore>>, Arc<MemoryDeadLetters>) {
    let dead = Arc::new(MemoryDeadLetters::new());
    let mut consumer = Consumer::new(
        ConsumerConfig::default(),
        registry(),
        Arc::new(MemoryMirrorStore::new()),
    )
    .with_dead_letters(dead.clone());
    if let Some(probe) = probe {
        consumer = consumer.with_probe(probe);
    }
    (Arc::new(consumer), dead)
}

fn company(consumer: &Consumer<MemoryMirrorStore>, id: &str) -> Option<MirrorRecord> {
    consumer.store().get(&EntityKey::new("company", id))
}

#[tokio::test]
async fn created_message_creates_live_record() {
    let (consumer, _) = consumer();

    let outcome = consumer.dispatch(company_created("c-1", "Acme", 1)).await.unwrap();
    assert_eq!(outcome, DispatchOutcome::Applied(ChangeKind::Inserted));

    let record = company(&consumer, "c-1").unwrap();
    assert_eq!(record.last_synced_at, t(1));
    assert!(!record.is_deleted);
    assert_eq!(record.fields.get_str("name"), Some("Acme"));
}

#[tokio::test]
async fn older_update_leaves_record_unchanged() {
    let (consumer, _) = consumer();
    consumer
        .dispatch(SyncMessage::updated("company", "c-1", company_snapshot("New"), t(2)))
        .await
        .unwrap();

    let outcome = consumer
        .dispatch(SyncMessage::updated("company", "c-1", company_snapshot("Old"), t(1)))
        .await
        .unwrap();
    assert_eq!(outcome, DispatchOutcome::Stale);

    let record = company(&consumer, "c-1").unwrap();
    assert_eq!(record.last_synced_at, t(2));
    assert_eq!(record.fields.get_str("name"), Some("New"));
}

#[tokio::test]
async fn newer_delete_marks_record_deleted() {
    let (consumer, _) = consumer();
    consumer.dispatch(company_created("c-1", "Acme", 1)).await.unwrap();

    let outcome = consumer
        .dispatch(SyncMessage::deleted("company", "c-1", Snapshot::new(), t(2)))
        .await
        .unwrap();
    assert_eq!(outcome, DispatchOutcome::Applied(ChangeKind::SoftDeleted));

    let record = company(&consumer, "c-1").unwrap();
    assert!(record.is_deleted);
    assert_eq!(record.last_synced_at, t(2));
    // Fields are kept for audit.
    assert_eq!(record.fields.get_str("name"), Some("Acme"));
    assert_eq!(consumer.store().list("company", false).await.unwrap().len(), 0);
    assert_eq!(consumer.store().list("company", true).await.unwrap().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn organic_message_is_dropped_after_missing_dependency() {
    let (consumer, dead) =
        consumer_with_probe(Some(Arc::new(FnProbe::new(|_key: EntityKey| async { false }))));

    let started = Instant::now();
    let outcome = consumer
        .dispatch(employee_created("e-1", "Ada", "c-1", 1))
        .await
        .unwrap();

    assert_eq!(
        outcome,
        DispatchOutcome::Dropped {
            missing: EntityKey::new("company", "c-1")
        }
    );
    assert!(started.elapsed() <= Duration::from_secs(301));
    assert!(started.elapsed() >= Duration::from_secs(300));
    assert!(consumer.store().is_empty());
    assert!(dead.is_empty());
    assert_eq!(consumer.stats().dropped, 1);
}

#[tokio::test(start_paused = true)]
async fn force_sync_message_is_escalated_within_short_budget() {
    let (consumer, dead) = consumer();

    let started = Instant::now();
    let outcome = consumer
        .dispatch(employee_created("e-1", "Ada", "c-9", 1).with_force_sync(true))
        .await
        .unwrap();

    assert!(matches!(outcome, DispatchOutcome::Escalated { .. }));
    assert!(started.elapsed() <= Duration::from_secs(30));
    assert_eq!(dead.letters()[0].reason, DeadLetterReason::DependencyTimeout);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_writers_converge_on_newest() {
    for round in 0..50 {
        let (consumer, _) = consumer();
        let older = SyncMessage::updated("company", "c-1", company_snapshot("T1"), t(1));
        let newer = SyncMessage::updated("company", "c-1", company_snapshot("T2"), t(2));

        let (a, b) = if round % 2 == 0 {
            (older, newer)
        } else {
            (newer, older)
        };
        let first = {
            let consumer = Arc::clone(&consumer);
            tokio::spawn(async move { consumer.dispatch(a).await })
        };
        let second = {
            let consumer = Arc::clone(&consumer);
            tokio::spawn(async move { consumer.dispatch(b).await })
        };
        first.await.unwrap().unwrap();
        second.await.unwrap().unwrap();

        let record = company(&consumer, "c-1").unwrap();
        assert_eq!(record.last_synced_at, t(2));
        assert_eq!(record.fields.get_str("name"), Some("T2"));
    }
}

#[tokio::test]
async fn redelivery_is_idempotent() {
    let (consumer, _) = consumer();
    let msg = company_created("c-1", "Acme", 1);

    consumer.dispatch(msg.clone()).await.unwrap();
    let before = consumer.store().snapshot();
    assert_eq!(consumer.dispatch(msg).await.unwrap(), DispatchOutcome::Stale);
    assert_eq!(consumer.store().snapshot(), before);
}

#[tokio::test]
async fn soft_deleted_update_and_restore() {
    let (consumer, _) = consumer();
    consumer.dispatch(company_created("c-1", "Acme", 1)).await.unwrap();

    let outcome = consumer
        .dispatch(SyncMessage::updated(
            "company",
            "c-1",
            company_snapshot("Acme").with("isDeleted", true),
            t(2),
        ))
        .await
        .unwrap();
    assert_eq!(outcome, DispatchOutcome::Applied(ChangeKind::SoftDeleted));

    let outcome = consumer
        .dispatch(SyncMessage::updated("company", "c-1", company_snapshot("Acme"), t(3)))
        .await
        .unwrap();
    assert_eq!(outcome, DispatchOutcome::Applied(ChangeKind::Restored));
    assert!(company(&consumer, "c-1").unwrap().is_live());
}

#[tokio::test]
async fn delete_of_unknown_entity_is_noop() {
    let (consumer, _) = consumer();
    let outcome = consumer
        .dispatch(SyncMessage::deleted("company", "c-1", Snapshot::new(), t(1)))
        .await
        .unwrap();
    assert_eq!(outcome, DispatchOutcome::NoOp);
    assert!(consumer.store().list("company", false).await.unwrap().is_empty());
}

#[tokio::test]
async fn delete_before_create_converges_on_deleted() {
    let (consumer, _) = consumer();
    let delete = SyncMessage::deleted("company", "c-1", Snapshot::new(), t(2));

    assert_eq!(consumer.dispatch(delete.clone()).await.unwrap(), DispatchOutcome::NoOp);
    let outcome = consumer.dispatch(company_created("c-1", "Acme", 1)).await.unwrap();
    assert_eq!(outcome, DispatchOutcome::Stale);
    assert_eq!(consumer.dispatch(delete).await.unwrap(), DispatchOutcome::Stale);

    let record = company(&consumer, "c-1").unwrap();
    assert!(record.is_deleted);
    assert_eq!(record.last_synced_at, t(2));
}

#[tokio::test(start_paused = true)]
async fn cascade_soft_delete_after_dependency_deleted() {
    let (consumer, dead) = consumer();
    consumer.dispatch(company_created("c-1", "Acme", 1)).await.unwrap();
    consumer
        .dispatch(employee_created("e-1", "Ada", "c-1", 2))
        .await
        .unwrap();
    consumer
        .dispatch(SyncMessage::deleted("company", "c-1", Snapshot::new(), t(3)))
        .await
        .unwrap();

    let started = Instant::now();
    let outcome = consumer
        .dispatch(SyncMessage::updated(
            "employee",
            "e-1",
            Snapshot::new()
                .with("name", "Ada")
                .with("companyId", "c-1")
                .with("isDeleted", true),
            t(4),
        ))
        .await
        .unwrap();

    assert_eq!(outcome, DispatchOutcome::Applied(ChangeKind::SoftDeleted));
    assert_eq!(started.elapsed(), Duration::ZERO);
    let employee = consumer
        .store()
        .get(&EntityKey::new("employee", "e-1"))
        .unwrap();
    assert!(employee.is_deleted);
    assert_eq!(employee.last_synced_at, t(4));
    assert!(dead.is_empty());
}

#[tokio::test(start_paused = true)]
async fn deleted_dependency_does_not_satisfy_dependent() {
    let (consumer, _) = consumer();
    consumer.dispatch(company_created("c-1", "Acme", 1)).await.unwrap();
    consumer
        .dispatch(SyncMessage::deleted("company", "c-1", Snapshot::new(), t(2)))
        .await
        .unwrap();

    let outcome = consumer
        .dispatch(employee_created("e-1", "Ada", "c-1", 3))
        .await
        .unwrap();
    assert!(matches!(outcome, DispatchOutcome::Dropped { .. }));
    assert!(consumer
        .store()
        .load(&EntityKey::new("employee", "e-1"))
        .await
        .unwrap()
        .is_none());
}

#[tokio::test(start_paused = true)]
async fn end_to_end_out_of_order_delivery() {
    let dead: Arc<MemoryDeadLetters> = Arc::new(MemoryDeadLetters::new());
    let (bus, deliveries) = MemoryBus::new(16, RetryConfig::default(), dead.clone());
    let bus = Arc::new(bus);

    let publisher = ChangePublisher::new(Arc::clone(&bus))
        .with_rule(FieldRule::new("company").with_fields(["name"]))
        .with_rule(FieldRule::new("employee").with_fields(["name", "companyId"]));

    let consumer = Arc::new(
        Consumer::new(
            ConsumerConfig::default(),
            registry(),
            Arc::new(MemoryMirrorStore::new()),
        )
        .with_dead_letters(dead.clone()),
    );
    let running = tokio::spawn(Arc::clone(&consumer).run(deliveries));

    // The employee overtakes its company.
    assert!(publisher
        .publish(EntityEvent::created(
            "employee",
            "e-1",
            Snapshot::new()
                .with("name", "Ada")
                .with("companyId", "c-1")
                .with("salary", 100),
        ))
        .await
        .is_published());
    tokio::time::sleep(Duration::from_secs(2)).await;
    assert!(publisher
        .publish(EntityEvent::created("company", "c-1", company_snapshot("Acme")))
        .await
        .is_published());
    assert_eq!(
        publisher
            .publish(
                EntityEvent::created("company", "seed", company_snapshot("Seed"))
                    .with_test_data(true)
            )
            .await,
        PublishOutcome::Filtered
    );

    bus.settled().await;

    let employee = consumer
        .store()
        .get(&EntityKey::new("employee", "e-1"))
        .unwrap();
    assert_eq!(employee.fields.get_str("companyId"), Some("c-1"));
    assert!(employee.fields.get("salary").is_none());
    assert!(company(&consumer, "seed").is_none());
    assert!(dead.is_empty());

    let stats = consumer.stats();
    assert_eq!(stats.applied, 2);
    assert_eq!(stats.received, 2);

    drop(publisher);
    drop(bus);
    running.abort();
}

#[tokio::test(start_paused = true)]
async fn storage_failure_is_redelivered_by_bus() {
    let dead = Arc::new(MemoryDeadLetters::new());
    let (bus, deliveries) = MemoryBus::new(16, RetryConfig::default(), dead.clone());
    let bus = Arc::new(bus);

    let store = Arc::new(MemoryMirrorStore::new());
    store.fail_next_writes(2);
    let consumer = Arc::new(
        Consumer::new(ConsumerConfig::default(), registry(), store).with_dead_letters(dead.clone()),
    );
    let running = tokio::spawn(Arc::clone(&consumer).run(deliveries));

    let publisher = ChangePublisher::new(Arc::clone(&bus)).with_rule(FieldRule::new("company"));
    publisher
        .publish(EntityEvent::created("company", "c-1", company_snapshot("Acme")))
        .await;

    bus.settled().await;
    assert!(company(&consumer, "c-1").is_some());
    assert!(dead.is_empty());

    let stats = consumer.stats();
    assert_eq!(stats.transient_failures, 2);
    assert_eq!(stats.applied, 1);

    running.abort();
}

#[tokio::test]
async fn malformed_message_is_dead_lettered_and_acknowledged() {
    let dead = Arc::new(MemoryDeadLetters::new());
    let (bus, deliveries) = MemoryBus::new(16, RetryConfig::default(), dead.clone());
    let consumer = Arc::new(
        Consumer::new(
            ConsumerConfig::default(),
            registry(),
            Arc::new(MemoryMirrorStore::new()),
        )
        .with_dead_letters(dead.clone()),
    );
    let running = tokio::spawn(Arc::clone(&consumer).run(deliveries));

    bus.send(SyncMessage::created("company", "c-1", Snapshot::new(), t(1)))
        .await
        .unwrap();
    bus.settled().await;

    let letters = dead.letters();
    assert_eq!(letters.len(), 1);
    assert_eq!(letters[0].reason, DeadLetterReason::MalformedSnapshot);
    // Acknowledged on the first attempt.
    assert_eq!(consumer.stats().received, 1);

    running.abort();
}
