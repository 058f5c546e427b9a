//! End-to-end tests: simulated devices through the bridge into the
//! Prometheus registry.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use emberscope_bridge::config::SimulatedConfig;
use emberscope_bridge::{
    Bridge, DeviceStatus, EmberscopeConfig, SimulatedConnector, SimulatedDevice, StatusMap,
    wait_for_status,
};
use emberscope_common::{RawValue, SharedSink};
use emberscope_exporter_prometheus::collector::SeriesValue;
use emberscope_exporter_prometheus::{MetricCollector, PrometheusConfig};

const TIMEOUT: Duration = Duration::from_secs(3);

struct Harness {
    collector: Arc<MetricCollector>,
    status: watch::Receiver<StatusMap>,
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl Harness {
    fn start(config: &str, connector: SimulatedConnector) -> Self {
        let config = EmberscopeConfig::parse(config).unwrap();
        let collector = Arc::new(MetricCollector::new(PrometheusConfig::default()));
        let sink: SharedSink = collector.clone();

        let bridge = Bridge::new(&config, Arc::new(connector), sink);
        let status = bridge.status();
        let (shutdown, rx) = watch::channel(false);
        let handle = tokio::spawn(bridge.run(rx));

        Self {
            collector,
            status,
            shutdown,
            handle,
        }
    }

    async fn bridged(&mut self, device: &str) -> DeviceStatus {
        wait_for_status(&mut self.status, device, TIMEOUT, |s| {
            matches!(s, DeviceStatus::Bridged { .. })
        })
        .await
        .unwrap_or_else(|| panic!("{} was never bridged", device))
    }

    async fn gauge_eventually(&self, name: &str, labels: &[(&str, &str)], expected: f64) {
        for _ in 0..200 {
            if self.collector.value_of(name, labels) == Some(SeriesValue::Gauge(expected)) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!(
            "{} never reached {}, last value {:?}",
            name,
            expected,
            self.collector.value_of(name, labels)
        );
    }

    async fn stop(self) {
        self.shutdown.send(true).unwrap();
        tokio::time::timeout(TIMEOUT, self.handle)
            .await
            .unwrap()
            .unwrap();
    }
}

fn studio_a() -> Arc<SimulatedDevice> {
    Arc::new(SimulatedDevice::with_values(
        "10.0.0.10:9000",
        [
            ("chassis.fan1", RawValue::from("3200 rpm")),
            ("sensors.cpu.temp", RawValue::Real(41.5)),
            ("net.eth0.hostName", RawValue::from("studio-a-core")),
            ("net.eth0.linkState", RawValue::from("up")),
        ],
    ))
}

const FAN_CONFIG: &str = r#"{
    devices: {
        StudioA: {
            address: "10.0.0.10",
            name: "Studio A",
            metrics: {
                fans: [{ path: "chassis.fan1", name: "fan_1", description: "Front fan" }],
            },
        },
    },
}"#;

const FAN_LABELS: &[(&str, &str)] = &[
    ("name", "fan_1"),
    ("description", "Front fan"),
    ("source", "emberplus"),
    ("server", "10.0.0.10"),
    ("studio", "Studio A"),
    ("path", "chassis.fan1"),
];

#[tokio::test]
async fn test_fan_update_replaces_value_without_duplicate_series() {
    let device = studio_a();
    let connector = SimulatedConnector::new().with_device("StudioA", device.clone());
    let mut harness = Harness::start(FAN_CONFIG, connector);

    assert_eq!(
        harness.bridged("StudioA").await,
        DeviceStatus::Bridged {
            definitions: 1,
            resolved: 1
        }
    );
    harness.gauge_eventually("fan_speed", FAN_LABELS, 3200.0).await;
    let series = harness.collector.series_count();

    device.set("chassis.fan1", "2900 rpm");
    harness.gauge_eventually("fan_speed", FAN_LABELS, 2900.0).await;

    assert_eq!(harness.collector.series_count(), series);
    let output = harness.collector.render();
    assert_eq!(
        output.lines().filter(|l| l.starts_with("fan_speed{")).count(),
        1
    );
    assert!(output.contains("value=\"2900 rpm\""));

    harness.stop().await;
}

#[tokio::test]
async fn test_unreachable_device_does_not_affect_others() {
    let config = r#"{
        devices: {
            StudioA: {
                address: "10.0.0.10",
                name: "Studio A",
                metrics: { fans: [{ path: "chassis.fan1", name: "fan_1", description: "Front fan" }] },
            },
            StudioB: {
                address: "10.0.0.11",
                name: "Studio B",
                metrics: { fans: [{ path: "chassis.fan1", name: "fan_1" }] },
            },
        },
    }"#;
    let unreachable = SimulatedConfig {
        unreachable: true,
        ..Default::default()
    };
    let connector = SimulatedConnector::new()
        .with_device("StudioA", studio_a())
        .with_device(
            "StudioB",
            Arc::new(SimulatedDevice::new("10.0.0.11:9000", unreachable)),
        );
    let mut harness = Harness::start(config, connector);

    let failed = wait_for_status(&mut harness.status, "StudioB", TIMEOUT, |s| {
        matches!(s, DeviceStatus::Failed(_))
    })
    .await;
    match failed {
        Some(DeviceStatus::Failed(message)) => assert!(message.contains("10.0.0.11:9000")),
        other => panic!("unexpected status {:?}", other),
    }

    harness.bridged("StudioA").await;
    harness.gauge_eventually("fan_speed", FAN_LABELS, 3200.0).await;
    assert!(
        harness
            .collector
            .value_of("fan_speed", &[("studio", "Studio B")])
            .is_none()
    );

    harness.stop().await;
}

#[tokio::test]
async fn test_partial_temperature_and_bad_path_blast_radius() {
    let config = r#"{
        devices: {
            StudioA: {
                address: "10.0.0.10",
                name: "Studio A",
                metrics: {
                    fans: [{ path: "chassis.missing" }],
                    temperatures: [{
                        name: "cpu",
                        paths: { actualTemperature: "sensors.cpu.temp", highLimit: "sensors.cpu.limit" },
                    }],
                },
            },
        },
    }"#;
    let connector = SimulatedConnector::new().with_device("StudioA", studio_a());
    let mut harness = Harness::start(config, connector);

    assert_eq!(
        harness.bridged("StudioA").await,
        DeviceStatus::Bridged {
            definitions: 2,
            resolved: 1
        }
    );

    let labels = &[("name", "cpu"), ("provider", "emberplus"), ("path", "sensors.cpu")];
    harness
        .gauge_eventually("temperature_actual_temp", labels, 41.5)
        .await;
    assert!(
        harness
            .collector
            .value_of("temperature_high_limit", labels)
            .is_none()
    );
    assert!(harness.collector.value_of("fan_speed", &[]).is_none());

    harness.stop().await;
}

#[tokio::test]
async fn test_network_link_state_and_labels() {
    let config = r#"{
        devices: {
            StudioA: {
                address: "10.0.0.10",
                name: "Studio A",
                metrics: {
                    networks: [{
                        name: "eth0",
                        paths: { hostName: "net.eth0.hostName", linkState: "net.eth0.linkState" },
                    }],
                },
            },
        },
    }"#;
    let device = studio_a();
    let connector = SimulatedConnector::new().with_device("StudioA", device.clone());
    let mut harness = Harness::start(config, connector);
    harness.bridged("StudioA").await;

    harness
        .gauge_eventually(
            "network_link_state",
            &[("hostName", "studio-a-core"), ("linkState", "up")],
            1.0,
        )
        .await;

    device.set("net.eth0.linkState", "down");
    harness
        .gauge_eventually(
            "network_link_state",
            &[("hostName", "studio-a-core"), ("linkState", "down")],
            0.0,
        )
        .await;

    // The label change retired the old series
    assert!(
        harness
            .collector
            .value_of("network_link_state", &[("linkState", "up")])
            .is_none()
    );

    harness.stop().await;
}

#[tokio::test]
async fn test_transport_errors_are_not_fatal() {
    let device = studio_a();
    let connector = SimulatedConnector::new().with_device("StudioA", device.clone());
    let mut harness = Harness::start(FAN_CONFIG, connector);
    harness.bridged("StudioA").await;

    device.report_error("socket reset by peer");
    device.set("chassis.fan1", "3000 rpm");
    harness.gauge_eventually("fan_speed", FAN_LABELS, 3000.0).await;

    assert!(matches!(
        harness.status.borrow().get("StudioA"),
        Some(DeviceStatus::Bridged { .. })
    ));

    harness.stop().await;
}

#[tokio::test]
async fn test_closed_session_stays_down_without_reconnect() {
    let device = studio_a();
    let connector = SimulatedConnector::new().with_device("StudioA", device.clone());
    let mut harness = Harness::start(FAN_CONFIG, connector);
    harness.bridged("StudioA").await;

    device.close();

    let status = wait_for_status(&mut harness.status, "StudioA", TIMEOUT, |s| {
        *s == DeviceStatus::Disconnected
    })
    .await;
    assert_eq!(status, Some(DeviceStatus::Disconnected));

    // The device task has ended on its own
    tokio::time::timeout(TIMEOUT, harness.handle)
        .await
        .unwrap()
        .unwrap();
    assert!(!device.is_connected());
}

#[tokio::test]
async fn test_reconnect_resubscribes_after_close() {
    let config = r#"{
        bridge: {
            reconnect: { enabled: true, initial_delay_ms: 20, max_delay_ms: 100 },
        },
        devices: {
            StudioA: {
                address: "10.0.0.10",
                name: "Studio A",
                metrics: { fans: [{ path: "chassis.fan1", name: "fan_1", description: "Front fan" }] },
            },
        },
    }"#;
    let device = studio_a();
    let connector = SimulatedConnector::new().with_device("StudioA", device.clone());
    let mut harness = Harness::start(config, connector);
    harness.bridged("StudioA").await;
    assert_eq!(device.watcher_count("chassis.fan1"), 1);

    device.close();
    assert_eq!(device.watcher_count("chassis.fan1"), 0);

    for _ in 0..200 {
        if device.is_connected() && device.watcher_count("chassis.fan1") == 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(device.watcher_count("chassis.fan1"), 1);

    device.set("chassis.fan1", "2500 rpm");
    harness.gauge_eventually("fan_speed", FAN_LABELS, 2500.0).await;

    harness.stop().await;
}
