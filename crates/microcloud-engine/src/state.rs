//! Ground-truth simulation state.
//!
//! All metric mutation happens here: the per-tick bounded random walk,
//! domain clamps, derived health/status, scenario overlays and command
//! application. The [`Engine`](crate::Engine) serializes access.

use microcloud_core::types::{
    ActionType, MetricSnapshot, Node, NodeStatus, Service, ServiceHealth, SimulationEvent,
    SimulationState, SimulationTimestamp, TrafficStats,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;
use uuid::Uuid;

const MIN_SPEED: f64 = 0.1;
const MAX_SPEED: f64 = 10.0;

// Per-tick random walk amplitudes
const WALK_CPU: f64 = 5.0;
const WALK_MEM: f64 = 2.0;
const WALK_DISK: f64 = 0.5;
const WALK_RPS: f64 = 50.0;
const WALK_ERR: f64 = 0.5;
const WALK_P50: f64 = 2.0;
const WALK_P99: f64 = 10.0;

const NODE_NAMES: [&str; 6] = [
    "node-alpha",
    "node-beta",
    "node-gamma",
    "node-delta",
    "node-epsilon",
    "node-zeta",
];

const SERVICE_NAMES: [&str; 8] = [
    "api-gateway",
    "user-service",
    "order-service",
    "payment-service",
    "inventory-service",
    "notification-service",
    "analytics-service",
    "search-service",
];

const ZONES: [&str; 3] = ["us-east-1a", "us-east-1b", "us-west-2a"];

/// Named overlay biasing the random walk
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scenario {
    /// No overlay
    Normal,
    /// Adds uniform [0, 10] to node CPU each tick
    HighLoad,
    /// 5% chance per tick per service of +20% error rate
    CascadeFailure,
}

impl Scenario {
    /// Canonical scenario name
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Normal => "normal",
            Self::HighLoad => "high_load",
            Self::CascadeFailure => "cascade_failure",
        }
    }
}

impl FromStr for Scenario {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "normal" => Ok(Self::Normal),
            "high_load" => Ok(Self::HighLoad),
            "cascade_failure" => Ok(Self::CascadeFailure),
            _ => Err(()),
        }
    }
}

/// The simulation ground truth
#[derive(Debug)]
pub struct SimState {
    nodes: HashMap<Uuid, Node>,
    services: HashMap<Uuid, Service>,
    tick_id: i64,
    sim_time_unix_ms: i64,
    speed_multiplier: f64,
    run_state: SimulationState,
    scenario: Scenario,
    active_connections: i64,
    rng: StdRng,
}

impl SimState {
    /// Create a state with the default fleet
    pub fn new() -> Self {
        Self::with_rng(StdRng::from_entropy())
    }

    /// Create a state with a deterministic RNG (tests)
    pub fn seeded(seed: u64) -> Self {
        Self::with_rng(StdRng::seed_from_u64(seed))
    }

    fn with_rng(mut rng: StdRng) -> Self {
        let mut nodes = HashMap::new();
        let mut services = HashMap::new();

        for i in 0..NODE_NAMES.len() {
            let node_id = Uuid::new_v4();
            let running_services = rng.gen_range(1..=3);
            nodes.insert(
                node_id,
                Node {
                    id: node_id,
                    name: NODE_NAMES[i].to_string(),
                    status: NodeStatus::Healthy,
                    cpu_usage_percent: rng.gen_range(0.0..30.0),
                    memory_usage_percent: rng.gen_range(0.0..40.0),
                    disk_usage_percent: rng.gen_range(0.0..20.0),
                    running_services,
                    availability_zone: ZONES[i % ZONES.len()].to_string(),
                    labels: HashMap::from([("tier".to_string(), "compute".to_string())]),
                },
            );

            for j in 0..running_services as usize {
                let svc_id = Uuid::new_v4();
                services.insert(
                    svc_id,
                    Service {
                        id: svc_id,
                        name: SERVICE_NAMES[(i + j) % SERVICE_NAMES.len()].to_string(),
                        node_id,
                        health: ServiceHealth::Healthy,
                        requests_per_second: rng.gen_range(0.0..500.0),
                        error_rate_percent: rng.gen_range(0.0..0.5),
                        latency_p50_ms: rng.gen_range(5.0..15.0),
                        latency_p99_ms: rng.gen_range(20.0..70.0),
                        replica_count: rng.gen_range(1..=3),
                        desired_replicas: 3,
                    },
                );
            }
        }

        Self {
            nodes,
            services,
            tick_id: 0,
            sim_time_unix_ms: now_unix_ms(),
            speed_multiplier: 1.0,
            run_state: SimulationState::Stopped,
            scenario: Scenario::Normal,
            active_connections: 0,
            rng,
        }
    }

    /// Current tick id
    pub fn tick_id(&self) -> i64 {
        self.tick_id
    }

    /// Current run state
    pub fn run_state(&self) -> SimulationState {
        self.run_state
    }

    /// Set the run state
    pub fn set_run_state(&mut self, state: SimulationState) {
        self.run_state = state;
    }

    /// Current speed multiplier
    pub fn speed_multiplier(&self) -> f64 {
        self.speed_multiplier
    }

    /// Set the speed multiplier, clamped to [0.1, 10.0]; returns the
    /// effective value
    pub fn set_speed_multiplier(&mut self, multiplier: f64) -> f64 {
        self.speed_multiplier = multiplier.clamp(MIN_SPEED, MAX_SPEED);
        self.speed_multiplier
    }

    /// Active scenario
    pub fn scenario(&self) -> Scenario {
        self.scenario
    }

    /// Switch the active scenario
    pub fn set_scenario(&mut self, scenario: Scenario) {
        self.scenario = scenario;
    }

    /// Look up a node
    pub fn node(&self, id: Uuid) -> Option<&Node> {
        self.nodes.get(&id)
    }

    /// Look up a service
    pub fn service(&self, id: Uuid) -> Option<&Service> {
        self.services.get(&id)
    }

    /// Seed a node into the fleet, replacing any previous one with the same id
    pub fn insert_node(&mut self, node: Node) {
        self.nodes.insert(node.id, node);
    }

    /// Seed a service into the fleet, replacing any previous one with the
    /// same id
    pub fn insert_service(&mut self, service: Service) {
        self.services.insert(service.id, service);
    }

    /// Advance the simulation by one tick
    pub fn tick(&mut self, interval: Duration) {
        self.tick_id += 1;
        self.sim_time_unix_ms += (interval.as_millis() as f64 * self.speed_multiplier) as i64;

        self.walk_nodes();
        self.walk_services();
        self.active_connections = self.rng.gen_range(500..1500);
    }

    fn walk_nodes(&mut self) {
        let high_load = self.scenario == Scenario::HighLoad;
        for node in self.nodes.values_mut() {
            node.cpu_usage_percent =
                (node.cpu_usage_percent + delta(&mut self.rng, WALK_CPU)).clamp(0.0, 100.0);
            node.memory_usage_percent =
                (node.memory_usage_percent + delta(&mut self.rng, WALK_MEM)).clamp(0.0, 100.0);
            node.disk_usage_percent =
                (node.disk_usage_percent + delta(&mut self.rng, WALK_DISK)).clamp(0.0, 100.0);

            if high_load {
                node.cpu_usage_percent =
                    (node.cpu_usage_percent + self.rng.gen_range(0.0..10.0)).clamp(0.0, 100.0);
            }

            // A drained node stays offline; status is otherwise derived.
            if node.status != NodeStatus::Offline {
                node.status = derive_node_status(node);
            }
        }
    }

    fn walk_services(&mut self) {
        let cascade = self.scenario == Scenario::CascadeFailure;
        for svc in self.services.values_mut() {
            svc.requests_per_second =
                (svc.requests_per_second + delta(&mut self.rng, WALK_RPS)).clamp(0.0, 10_000.0);
            svc.error_rate_percent =
                (svc.error_rate_percent + delta(&mut self.rng, WALK_ERR)).clamp(0.0, 100.0);
            svc.latency_p50_ms =
                (svc.latency_p50_ms + delta(&mut self.rng, WALK_P50)).clamp(1.0, 1_000.0);
            svc.latency_p99_ms = (svc.latency_p99_ms + delta(&mut self.rng, WALK_P99))
                .clamp(svc.latency_p50_ms, 5_000.0);

            if cascade && self.rng.gen_bool(0.05) {
                svc.error_rate_percent = (svc.error_rate_percent + 20.0).clamp(0.0, 100.0);
            }

            svc.health = derive_service_health(svc);
        }
    }

    /// Dump the fleet with traffic aggregates
    pub fn snapshot(&self) -> MetricSnapshot {
        let nodes: Vec<Node> = self.nodes.values().cloned().collect();
        let services: Vec<Service> = self.services.values().cloned().collect();

        let total_rps: f64 = services.iter().map(|s| s.requests_per_second).sum();
        let (avg_error_rate, avg_latency) = if services.is_empty() {
            (0.0, 0.0)
        } else {
            let n = services.len() as f64;
            (
                services.iter().map(|s| s.error_rate_percent).sum::<f64>() / n,
                services.iter().map(|s| s.latency_p50_ms).sum::<f64>() / n,
            )
        };

        MetricSnapshot {
            timestamp: self.timestamp(),
            nodes,
            services,
            traffic: TrafficStats {
                total_rps,
                total_error_rate: avg_error_rate,
                avg_latency_ms: avg_latency,
                active_connections: self.active_connections,
            },
        }
    }

    /// Apply a remediation command, returning the resulting event.
    ///
    /// Unknown targets leave state untouched and produce an event with an
    /// empty `event_type`.
    pub fn apply(
        &mut self,
        action_type: ActionType,
        target_id: Uuid,
        parameters: HashMap<String, String>,
    ) -> SimulationEvent {
        let mut event = SimulationEvent {
            timestamp: self.timestamp(),
            event_type: String::new(),
            target_id: target_id.to_string(),
            description: String::new(),
            metadata: parameters,
        };

        match action_type {
            ActionType::RestartService => {
                if let Some(svc) = self.services.get_mut(&target_id) {
                    svc.health = ServiceHealth::Healthy;
                    svc.error_rate_percent = 0.1;
                    svc.latency_p50_ms = 5.0;
                    svc.latency_p99_ms = 20.0;
                    event.event_type = "service_restarted".to_string();
                    event.description = "Service restarted successfully".to_string();
                }
            }
            ActionType::ScaleUp => {
                if let Some(svc) = self.services.get_mut(&target_id) {
                    svc.replica_count += 1;
                    svc.desired_replicas = svc.replica_count;
                    event.event_type = "service_scaled_up".to_string();
                    event.description = "Service scaled up".to_string();
                }
            }
            ActionType::ScaleDown => {
                if let Some(svc) = self.services.get_mut(&target_id) {
                    if svc.replica_count > 1 {
                        svc.replica_count -= 1;
                        svc.desired_replicas = svc.replica_count;
                        event.event_type = "service_scaled_down".to_string();
                        event.description = "Service scaled down".to_string();
                    }
                }
            }
            ActionType::DrainNode => {
                if let Some(node) = self.nodes.get_mut(&target_id) {
                    node.status = NodeStatus::Offline;
                    node.running_services = 0;
                    event.event_type = "node_drained".to_string();
                    event.description = "Node drained and offline".to_string();
                }
            }
            ActionType::RebalanceTraffic => {
                // Global mutation: every service sheds 10% of its traffic.
                for svc in self.services.values_mut() {
                    svc.requests_per_second *= 0.9;
                }
                event.event_type = "traffic_rebalanced".to_string();
                event.description = "Traffic rebalanced across services".to_string();
            }
            ActionType::Unspecified => {}
        }

        event
    }

    fn timestamp(&self) -> SimulationTimestamp {
        SimulationTimestamp {
            tick_id: self.tick_id,
            wall_time_unix_ms: now_unix_ms(),
            sim_time_unix_ms: self.sim_time_unix_ms,
        }
    }
}

impl Default for SimState {
    fn default() -> Self {
        Self::new()
    }
}

fn delta(rng: &mut StdRng, amplitude: f64) -> f64 {
    rng.gen_range(-amplitude..=amplitude)
}

fn derive_node_status(node: &Node) -> NodeStatus {
    if node.cpu_usage_percent > 80.0 || node.memory_usage_percent > 85.0 {
        NodeStatus::Degraded
    } else {
        NodeStatus::Healthy
    }
}

fn derive_service_health(svc: &Service) -> ServiceHealth {
    if svc.error_rate_percent > 10.0 {
        ServiceHealth::Critical
    } else if svc.error_rate_percent > 5.0 {
        ServiceHealth::Degraded
    } else {
        ServiceHealth::Healthy
    }
}

fn now_unix_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_service(state: &mut SimState) -> Uuid {
        let id = Uuid::new_v4();
        state.insert_service(Service {
            id,
            name: "payment-service".to_string(),
            node_id: Uuid::new_v4(),
            health: ServiceHealth::Critical,
            requests_per_second: 100.0,
            error_rate_percent: 42.0,
            latency_p50_ms: 80.0,
            latency_p99_ms: 900.0,
            replica_count: 1,
            desired_replicas: 1,
        });
        id
    }

    #[test]
    fn snapshots_respect_metric_bounds() {
        let mut state = SimState::seeded(7);
        state.set_run_state(SimulationState::Running);

        for _ in 0..200 {
            state.tick(Duration::from_millis(100));
        }

        let snapshot = state.snapshot();
        for node in &snapshot.nodes {
            assert!((0.0..=100.0).contains(&node.cpu_usage_percent));
            assert!((0.0..=100.0).contains(&node.memory_usage_percent));
            assert!((0.0..=100.0).contains(&node.disk_usage_percent));
        }
        for svc in &snapshot.services {
            assert!((0.0..=10_000.0).contains(&svc.requests_per_second));
            assert!((0.0..=100.0).contains(&svc.error_rate_percent));
            assert!(svc.latency_p50_ms >= 1.0);
            assert!(svc.latency_p99_ms >= svc.latency_p50_ms);
        }
    }

    #[test]
    fn tick_id_is_strictly_increasing() {
        let mut state = SimState::seeded(1);
        let mut previous = state.tick_id();
        for _ in 0..50 {
            state.tick(Duration::from_millis(100));
            assert!(state.tick_id() > previous);
            previous = state.tick_id();
        }
    }

    #[test]
    fn sim_time_advances_by_speed() {
        let mut state = SimState::seeded(1);
        state.set_speed_multiplier(2.0);
        let before = state.snapshot().timestamp.sim_time_unix_ms;
        state.tick(Duration::from_millis(100));
        let after = state.snapshot().timestamp.sim_time_unix_ms;
        assert_eq!(after - before, 200);
    }

    #[test]
    fn speed_clamps_to_range() {
        let mut state = SimState::seeded(1);
        assert_eq!(state.set_speed_multiplier(100.0), 10.0);
        assert_eq!(state.speed_multiplier(), 10.0);
        assert_eq!(state.set_speed_multiplier(0.0), 0.1);
        assert_eq!(state.set_speed_multiplier(1.5), 1.5);
    }

    #[test]
    fn restart_resets_service_metrics() {
        let mut state = SimState::seeded(1);
        let id = test_service(&mut state);

        let event = state.apply(ActionType::RestartService, id, HashMap::new());

        assert_eq!(event.event_type, "service_restarted");
        let svc = state.service(id).unwrap();
        assert_eq!(svc.health, ServiceHealth::Healthy);
        assert_eq!(svc.error_rate_percent, 0.1);
        assert_eq!(svc.latency_p50_ms, 5.0);
        assert_eq!(svc.latency_p99_ms, 20.0);
    }

    #[test]
    fn scale_down_at_one_replica_is_a_no_op() {
        let mut state = SimState::seeded(1);
        let id = test_service(&mut state);

        let event = state.apply(ActionType::ScaleDown, id, HashMap::new());

        assert_eq!(event.event_type, "");
        assert_eq!(state.service(id).unwrap().replica_count, 1);
    }

    #[test]
    fn scale_up_tracks_desired_replicas() {
        let mut state = SimState::seeded(1);
        let id = test_service(&mut state);

        state.apply(ActionType::ScaleUp, id, HashMap::new());

        let svc = state.service(id).unwrap();
        assert_eq!(svc.replica_count, 2);
        assert_eq!(svc.desired_replicas, 2);
    }

    #[test]
    fn drained_node_goes_offline_and_stays_offline() {
        let mut state = SimState::seeded(1);
        let node_id = state.snapshot().nodes[0].id;

        let event = state.apply(ActionType::DrainNode, node_id, HashMap::new());
        assert_eq!(event.event_type, "node_drained");
        assert_eq!(state.node(node_id).unwrap().status, NodeStatus::Offline);
        assert_eq!(state.node(node_id).unwrap().running_services, 0);

        for _ in 0..20 {
            state.tick(Duration::from_millis(100));
        }
        assert_eq!(state.node(node_id).unwrap().status, NodeStatus::Offline);
    }

    #[test]
    fn rebalance_cuts_all_service_traffic() {
        let mut state = SimState::seeded(1);
        let id = test_service(&mut state);
        let before: Vec<f64> = state
            .snapshot()
            .services
            .iter()
            .map(|s| s.requests_per_second)
            .collect();

        let event = state.apply(ActionType::RebalanceTraffic, id, HashMap::new());

        assert_eq!(event.event_type, "traffic_rebalanced");
        let after: Vec<f64> = state
            .snapshot()
            .services
            .iter()
            .map(|s| s.requests_per_second)
            .collect();
        assert_eq!(before.len(), after.len());
        for (b, a) in before.iter().zip(after.iter()) {
            assert!((a - b * 0.9).abs() < 1e-9);
        }
    }

    #[test]
    fn unknown_target_is_a_no_op_with_empty_event_type() {
        let mut state = SimState::seeded(1);
        let event = state.apply(ActionType::RestartService, Uuid::new_v4(), HashMap::new());
        assert_eq!(event.event_type, "");
        assert!(event.description.is_empty());
    }

    #[test]
    fn scenario_names_round_trip() {
        for scenario in [Scenario::Normal, Scenario::HighLoad, Scenario::CascadeFailure] {
            assert_eq!(scenario.as_str().parse::<Scenario>().unwrap(), scenario);
        }
        assert!("chaos_monkey".parse::<Scenario>().is_err());
    }

    #[test]
    fn derived_health_follows_error_rate() {
        let mut state = SimState::seeded(3);
        let id = test_service(&mut state);
        // err starts at 42 -> critical after one tick regardless of walk
        state.tick(Duration::from_millis(100));
        assert_eq!(state.service(id).unwrap().health, ServiceHealth::Critical);
    }
}
