//! End-to-end control loop tests over the in-memory bus and repositories.
//!
//! Engine, detector, decider and orchestrator are wired exactly as in
//! production, with the NATS and Postgres adapters swapped for their
//! in-memory counterparts.

use axum::extract::{Json, State};
use futures_util::StreamExt;
use microcloud_agent::Decider;
use microcloud_bus::{
    codec, BusDriver, MemoryBus, Publisher, Subscriber, SUBJECT_OPS_ACTIONS,
    SUBJECT_OPS_INCIDENTS,
};
use microcloud_core::types::{
    Action, ActionStatus, ActionType, Incident, MetricSnapshot, Service, ServiceHealth,
    SimulationTimestamp, TrafficStats,
};
use microcloud_engine::{Engine, SimState};
use microcloud_orchestrator::actions::{
    approve_action, ApproveActionRequest, UuidValue,
};
use microcloud_orchestrator::hub::StreamHub;
use microcloud_signal::Detector;
use microcloud_storage::{ActionStore, IncidentStore, MemoryStore};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

struct Loop {
    driver: Arc<dyn BusDriver>,
    store: Arc<MemoryStore>,
    engine: Engine,
    detector: Arc<Detector>,
    cancel: CancellationToken,
}

impl Loop {
    /// Wire the four services over one memory bus and one memory store,
    /// with consumer loops running like production.
    async fn start() -> Self {
        let driver: Arc<dyn BusDriver> = Arc::new(MemoryBus::new());
        let store = Arc::new(MemoryStore::new());
        let publisher = Publisher::new(driver.clone());
        let subscriber = Subscriber::new(driver.clone());
        let cancel = CancellationToken::new();

        let engine = Engine::with_state(publisher.clone(), SimState::seeded(42));
        let detector = Arc::new(Detector::new(publisher.clone(), store.clone()));
        let decider = Arc::new(Decider::new(publisher.clone(), store.clone(), store.clone()));

        // agent-service consumer
        {
            let subscriber = subscriber.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move {
                subscriber
                    .consume_incidents("agent-service", cancel, move |incident| {
                        let decider = decider.clone();
                        async move { decider.process_incident(&incident).await }
                    })
                    .await
            });
        }

        // sim-engine command consumer
        {
            let subscriber = subscriber.clone();
            let cancel = cancel.clone();
            let engine = engine.clone();
            tokio::spawn(async move {
                subscriber
                    .consume_commands("sim-engine", cancel, move |cmd| {
                        let engine = engine.clone();
                        async move { engine.apply_command(cmd).await }
                    })
                    .await
            });
        }

        // Give the consumers a chance to subscribe before anything publishes.
        tokio::time::sleep(Duration::from_millis(20)).await;

        Self {
            driver,
            store,
            engine,
            detector,
            cancel,
        }
    }

    async fn seed_service(&self, error_rate: f64) -> Uuid {
        let id = Uuid::new_v4();
        self.engine.state().write().await.insert_service(Service {
            id,
            name: "payment-service".to_string(),
            node_id: Uuid::new_v4(),
            health: ServiceHealth::Healthy,
            requests_per_second: 250.0,
            error_rate_percent: error_rate,
            latency_p50_ms: 12.0,
            latency_p99_ms: 60.0,
            replica_count: 2,
            desired_replicas: 2,
        });
        id
    }

    fn snapshot(&self, tick_id: i64, service_id: Uuid, error_rate: f64) -> MetricSnapshot {
        MetricSnapshot {
            timestamp: SimulationTimestamp {
                tick_id,
                wall_time_unix_ms: 0,
                sim_time_unix_ms: 0,
            },
            nodes: vec![],
            services: vec![Service {
                id: service_id,
                name: "payment-service".to_string(),
                node_id: Uuid::new_v4(),
                health: ServiceHealth::Healthy,
                requests_per_second: 250.0,
                error_rate_percent: error_rate,
                latency_p50_ms: 12.0,
                latency_p99_ms: 60.0,
                replica_count: 2,
                desired_replicas: 2,
            }],
            traffic: TrafficStats::default(),
        }
    }
}

impl Drop for Loop {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn settle() {
    tokio::time::sleep(Duration::from_millis(100)).await;
}

#[tokio::test]
async fn restart_on_error_surge_closes_the_loop() {
    let system = Loop::start().await;
    let service_id = system.seed_service(0.0).await;

    // Observe simulation events through the typed consumer.
    let (event_tx, mut event_rx) = tokio::sync::mpsc::unbounded_channel();
    {
        let subscriber = Subscriber::new(system.driver.clone());
        let cancel = system.cancel.clone();
        tokio::spawn(async move {
            subscriber
                .consume_events("test-events", cancel, move |event| {
                    let event_tx = event_tx.clone();
                    async move {
                        let _ = event_tx.send(event);
                        Ok(())
                    }
                })
                .await
        });
    }
    tokio::time::sleep(Duration::from_millis(20)).await;

    // Ten consecutive breaching snapshots; the windows fill and the
    // breach ratio crosses the raise threshold.
    for tick in 1..=10 {
        system
            .detector
            .process_snapshot(&system.snapshot(tick, service_id, 12.0))
            .await
            .unwrap();
    }
    settle().await;

    // The decider proposed a restart for that service.
    let pending = system.store.list_pending(50).await.unwrap();
    let restart = pending
        .iter()
        .find(|a| a.action_type == ActionType::RestartService)
        .expect("restart action proposed");
    assert_eq!(restart.target_id, service_id);
    assert_eq!(restart.status, ActionStatus::Pending);

    // Incident rows were persisted along the way.
    assert!(system.store.count_unresolved().await.unwrap() >= 1);

    // Approve; the engine applies the command and resets the service.
    let state = Arc::new(
        microcloud_orchestrator::actions::ActionServiceState::new(
            system.store.clone(),
            Publisher::new(system.driver.clone()),
        ),
    );
    let resp = approve_action(
        State(state),
        Json(ApproveActionRequest {
            action_id: UuidValue { value: restart.id },
        }),
    )
    .await
    .unwrap()
    .0;
    assert!(resp.success);
    settle().await;

    let svc_state = system.engine.state();
    let guard = svc_state.read().await;
    let svc = guard.service(service_id).unwrap();
    assert_eq!(svc.health, ServiceHealth::Healthy);
    assert_eq!(svc.error_rate_percent, 0.1);
    assert_eq!(svc.latency_p50_ms, 5.0);
    assert_eq!(svc.latency_p99_ms, 20.0);
    drop(guard);

    // And the engine announced the restart on sim.events.
    let mut saw_restart = false;
    while let Ok(Some(event)) =
        tokio::time::timeout(Duration::from_millis(200), event_rx.recv()).await
    {
        if event.event_type == "service_restarted" {
            assert_eq!(event.target_id, service_id.to_string());
            saw_restart = true;
            break;
        }
    }
    assert!(saw_restart, "expected a service_restarted event");
}

#[tokio::test]
async fn cooldown_suppresses_repeat_actions() {
    let system = Loop::start().await;
    let service_id = Uuid::new_v4();
    let mut actions = system.driver.subscribe(SUBJECT_OPS_ACTIONS, "t").await.unwrap();

    // Two distinct incidents on the same (rule, target) within the
    // cooldown window.
    let publisher = Publisher::new(system.driver.clone());
    for tick in [10, 20] {
        let incident = Incident {
            id: Uuid::new_v4(),
            detected_at: SimulationTimestamp {
                tick_id: tick,
                wall_time_unix_ms: chrono::Utc::now().timestamp_millis(),
                sim_time_unix_ms: 0,
            },
            severity: microcloud_core::types::IncidentSeverity::Warning,
            title: "high_latency: latency_p99_ms on service test".to_string(),
            description: String::new(),
            source_service: "signal-service".to_string(),
            affected_ids: vec![service_id],
            rule_name: "high_latency".to_string(),
            metrics: std::collections::HashMap::from([(
                "latency_p99_ms".to_string(),
                650.0,
            )]),
            resolved: false,
            resolved_at: None,
        };
        publisher.publish_incident(&incident).await.unwrap();
    }
    settle().await;

    // Both incidents were persisted; only the first produced an action.
    assert_eq!(
        IncidentStore::list_recent(system.store.as_ref(), 100)
            .await
            .unwrap()
            .len(),
        2
    );
    assert_eq!(system.store.list_pending(50).await.unwrap().len(), 1);

    let mut published: Vec<Action> = Vec::new();
    while let Ok(Some(delivery)) =
        tokio::time::timeout(Duration::from_millis(100), actions.next()).await
    {
        published.push(codec::decode(&delivery.payload).unwrap());
    }
    let scale_ups = published
        .iter()
        .filter(|a| a.action_type == ActionType::ScaleUp && a.target_id == service_id)
        .count();
    assert_eq!(scale_ups, 1, "cooldown must suppress the second proposal");
}

#[tokio::test]
async fn hysteresis_band_emits_nothing() {
    let system = Loop::start().await;
    let service_id = Uuid::new_v4();
    let mut incidents = system
        .driver
        .subscribe(SUBJECT_OPS_INCIDENTS, "t")
        .await
        .unwrap();

    // Alternating breach / clean samples keep the breach ratio inside the
    // hysteresis band.
    for tick in 1..=30 {
        let err = if tick % 2 == 0 { 12.0 } else { 0.0 };
        system
            .detector
            .process_snapshot(&system.snapshot(tick, service_id, err))
            .await
            .unwrap();
    }

    let silence = tokio::time::timeout(Duration::from_millis(100), incidents.next()).await;
    assert!(silence.is_err(), "no incident may be published in the band");
}

#[tokio::test]
async fn approval_commands_the_engine_with_identical_fields() {
    let system = Loop::start().await;

    // Seed one pending action directly, as if proposed earlier.
    let row = microcloud_storage::ActionRow {
        id: Uuid::new_v4(),
        incident_id: Uuid::new_v4(),
        proposed_at_tick: 99,
        action_type: ActionType::ScaleUp,
        target_id: Uuid::new_v4(),
        status: ActionStatus::Pending,
        reason: "Scale up due to high latency (650.00ms)".to_string(),
        parameters: std::collections::HashMap::from([("step".to_string(), "1".to_string())]),
        created_at: chrono::Utc::now(),
        executed_at: None,
        result_message: String::new(),
    };
    ActionStore::create(system.store.as_ref(), &row)
        .await
        .unwrap();

    let mut commands = system
        .driver
        .subscribe(microcloud_bus::SUBJECT_OPS_COMMANDS, "t")
        .await
        .unwrap();

    let state = Arc::new(
        microcloud_orchestrator::actions::ActionServiceState::new(
            system.store.clone(),
            Publisher::new(system.driver.clone()),
        ),
    );
    approve_action(
        State(state),
        Json(ApproveActionRequest {
            action_id: UuidValue { value: row.id },
        }),
    )
    .await
    .unwrap();

    assert_eq!(
        ActionStore::get(system.store.as_ref(), row.id)
            .await
            .unwrap()
            .unwrap()
            .status,
        ActionStatus::Approved
    );

    let delivery = commands.next().await.unwrap();
    let cmd: microcloud_core::types::ApplyActionCommand = codec::decode(&delivery.payload).unwrap();
    assert_eq!(cmd.action_id, row.id);
    assert_eq!(cmd.action_type, row.action_type);
    assert_eq!(cmd.target_id, row.target_id);
    assert_eq!(cmd.parameters, row.parameters);
    assert_eq!(cmd.target_tick_id, row.proposed_at_tick);
}

#[tokio::test]
async fn speed_is_clamped_to_the_legal_range() {
    let system = Loop::start().await;
    let state = system.engine.state();

    let effective = state.write().await.set_speed_multiplier(100.0);
    assert_eq!(effective, 10.0);
    assert_eq!(state.read().await.speed_multiplier(), 10.0);
}

#[tokio::test]
async fn sse_client_replays_the_latest_snapshot_on_connect() {
    let system = Loop::start().await;
    let hub = StreamHub::new(Subscriber::new(system.driver.clone()));

    {
        let hub = hub.clone();
        let cancel = system.cancel.clone();
        tokio::spawn(async move { hub.run(cancel).await });
    }
    tokio::time::sleep(Duration::from_millis(20)).await;

    // The engine publishes two snapshots before anyone connects.
    let publisher = Publisher::new(system.driver.clone());
    let service_id = Uuid::new_v4();
    publisher
        .publish_snapshot(&system.snapshot(1, service_id, 0.5))
        .await
        .unwrap();
    publisher
        .publish_snapshot(&system.snapshot(2, service_id, 0.5))
        .await
        .unwrap();
    settle().await;

    let mut client = hub.register();
    let frame = client.next().await.unwrap();
    let parsed: serde_json::Value = serde_json::from_str(&frame).unwrap();
    assert_eq!(parsed["type"], "metrics");
    assert_eq!(parsed["payload"]["timestamp"]["tick_id"], 2);
}

#[tokio::test]
async fn incidents_flow_to_the_hub_stream() {
    let system = Loop::start().await;
    let hub = StreamHub::new(Subscriber::new(system.driver.clone()));

    {
        let hub = hub.clone();
        let cancel = system.cancel.clone();
        tokio::spawn(async move { hub.run(cancel).await });
    }
    tokio::time::sleep(Duration::from_millis(20)).await;

    let mut client = hub.register();
    let service_id = Uuid::new_v4();

    for tick in 1..=5 {
        system
            .detector
            .process_snapshot(&system.snapshot(tick, service_id, 12.0))
            .await
            .unwrap();
    }

    // Drain frames until an incident arrives.
    let mut saw_incident = false;
    while let Ok(Some(frame)) =
        tokio::time::timeout(Duration::from_millis(300), client.next()).await
    {
        let parsed: serde_json::Value = serde_json::from_str(&frame).unwrap();
        if parsed["type"] == "incident" {
            let incident: Incident =
                serde_json::from_value(parsed["payload"].clone()).unwrap();
            assert_eq!(incident.affected_ids, vec![service_id]);
            assert_eq!(incident.source_service, "signal-service");
            saw_incident = true;
            break;
        }
    }
    assert!(saw_incident, "expected an incident frame on the stream");
}
