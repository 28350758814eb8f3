//! # Integration Tests
//!
//! 集成测试与端到端测试。
//!
//! 负责：
//! - 合约快照测试
//! - 基于脚本化 TCP 设备的端到端测试（无需真实硬件）

#[cfg(test)]
mod scripted_device;

#[cfg(test)]
mod contract_tests {
    use contracts::{DetectionEvent, DeviceId, ListeningFrequency};

    #[test]
    fn test_contracts_compile() {
        // 验证 contracts crate 可编译
        let _ = contracts::ConfigVersion::V1;
    }

    #[test]
    fn test_detection_event_wire_shape() {
        let event = DetectionEvent {
            device: DeviceId::new("gate"),
            frequency: 5658,
            time: chrono::DateTime::from_timestamp(1_700_000_000, 500_000_000).unwrap(),
            peak: 42,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["device"], "gate");
        assert_eq!(json["frequency"], 5658);
        assert_eq!(json["peak"], 42);

        let back: DetectionEvent = serde_json::from_value(json).unwrap();
        assert_eq!(back, event);
    }

    #[test]
    fn test_frequency_display() {
        assert_eq!(
            ListeningFrequency::new(5658, 1.0).to_string(),
            "5658mhz(100%)"
        );
    }
}

#[cfg(test)]
mod e2e_tests {
    use std::collections::HashMap;
    use std::sync::Arc;
    use std::time::Duration;

    use chrono::Utc;
    use config_loader::{ConfigFormat, ConfigLoader};
    use contracts::{
        to_seconds, DetectionEvent, DeviceId, ListeningFrequency, Role, SharedClock,
        SinkConfig, SinkType, SocketSettings, SystemClock, TimingSystem,
    };
    use dispatcher::create_dispatcher;
    use serde_json::json;
    use timing_devices::{SocketTimingSystem, TimingSystemManager};
    use tokio::sync::mpsc;

    use crate::scripted_device::{wait_until, ScriptedDevice};

    const WAIT: Duration = Duration::from_secs(3);

    fn settings(port: u16) -> SocketSettings {
        let mut settings = SocketSettings::new("127.0.0.1", port);
        settings.sync_window_ms = 150;
        settings.connect_timeout_ms = 1_000;
        settings
    }

    fn socket_device(settings: SocketSettings) -> SocketTimingSystem {
        let clock: SharedClock = Arc::new(SystemClock);
        SocketTimingSystem::new(DeviceId::new("gate"), Role::Primary, settings, clock)
    }

    fn frequencies() -> Vec<ListeningFrequency> {
        vec![
            ListeningFrequency::new(5658, 1.0),
            ListeningFrequency::new(5695, 1.0),
        ]
    }

    fn observe(system: &dyn TimingSystem) -> mpsc::UnboundedReceiver<DetectionEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        system.subscribe(Arc::new(move |event: &DetectionEvent| {
            let _ = tx.send(event.clone());
        }));
        rx
    }

    /// End-to-end: 连接 -> 时钟同步 -> 频率下发 -> 开始检测 -> 过线事件
    ///
    /// 设备在 T0 启动，时钟回复 (now - T0) 秒；T0 开始检测后，
    /// 设备时间 500ms 的过线应被还原为本地时间 T0 + 500ms。
    #[tokio::test]
    async fn test_socket_device_detection_flow() {
        let device = ScriptedDevice::bind().await;
        let t0 = Utc::now();

        let system = socket_device(settings(device.port()));
        let mut detections = observe(&system);

        assert!(system.connect());
        let mut session = device.accept(to_seconds(t0)).await;
        session.expect("ts_server_info").await;

        assert!(wait_until(WAIT, || system.epoch().is_some()).await, "no epoch");
        let epoch = system.epoch().unwrap();
        assert!((epoch - to_seconds(t0)).abs() < 0.05, "epoch off by {}", epoch - to_seconds(t0));
        assert!(system.connected());

        assert!(system.set_listening_frequencies(&frequencies()));
        let first = session.expect("set_frequency").await;
        let second = session.expect("set_frequency").await;
        assert_eq!(first, json!({"node": 0, "frequency": 5658}));
        assert_eq!(second, json!({"node": 1, "frequency": 5695}));

        assert!(system.start_detection(t0));
        let stage = session.expect("ts_race_stage").await;
        let start_time_s = stage["start_time_s"].as_f64().unwrap();
        assert!(start_time_s.abs() < 0.05, "start_time_s = {start_time_s}");

        session.send("pass_record", json!({"node": 0, "frequency": 5658, "timestamp": 500}));
        session.send("node_data", json!({"pass_peak_rssi": [42, 10]}));

        let event = tokio::time::timeout(WAIT, detections.recv())
            .await
            .expect("no detection")
            .unwrap();
        assert_eq!(event.device, "gate");
        assert_eq!(event.frequency, 5658);
        assert_eq!(event.peak, 42);
        let offset = to_seconds(event.time) - (to_seconds(t0) + 0.5);
        assert!(offset.abs() < 0.05, "detection off by {offset}s");
        assert!(detections.try_recv().is_err());

        assert!(system.end_detection());
        session.expect("stop_race").await;
        assert!(!system.end_detection());

        assert!(system.disconnect());
        assert!(session.closed_within(WAIT).await);
        assert!(!system.connected());
    }

    /// 连接后立即下发频率：首个时钟请求尚未回复时开始新一轮同步，
    /// 迟到的旧回复必须被丢弃，epoch 仍与设备时钟一致。
    #[tokio::test]
    async fn test_resync_while_first_reply_in_flight() {
        let device = ScriptedDevice::bind().await;
        let mut settings = settings(device.port());
        settings.sync_window_ms = 1_000;
        let system = socket_device(settings);
        let t0 = Utc::now();

        assert!(system.connect());
        let mut session = device
            .accept_delaying_first_reply(to_seconds(t0), Duration::from_millis(400))
            .await;
        session.expect("ts_server_info").await;
        assert!(wait_until(WAIT, || system.connected()).await);

        // Connect-time reply is still held by the device
        assert!(system.set_listening_frequencies(&frequencies()));
        assert!(system.epoch().is_none());
        session.expect("set_frequency").await;
        session.expect("set_frequency").await;

        assert!(wait_until(WAIT, || system.epoch().is_some()).await, "no epoch");
        let error = system.epoch().unwrap() - to_seconds(t0);
        assert!(error.abs() < 0.05, "epoch off by {error}s");
    }

    /// 心跳超时：链路只断开一次
    #[tokio::test]
    async fn test_heartbeat_timeout_disconnects_once() {
        let device = ScriptedDevice::bind().await;
        let mut settings = settings(device.port());
        settings.heartbeat_timeout_ms = 300;
        let system = socket_device(settings);

        assert!(system.connect());
        let mut session = device.accept(to_seconds(Utc::now())).await;
        session.expect("ts_server_info").await;
        session.send("heartbeat", json!({"current_rssi": [50], "frequency": [5658]}));

        assert!(wait_until(WAIT, || !system.is_link_live()).await);
        assert!(session.closed_within(WAIT).await);
        assert_eq!(system.disconnect_count(), 1);

        // Already handled by the link task, later checks are no-ops
        assert!(!system.check_timeout());
        assert!(!system.connected());
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(system.disconnect_count(), 1);
    }

    /// 心跳持续到达时链路保持
    #[tokio::test]
    async fn test_heartbeats_keep_link_alive() {
        let device = ScriptedDevice::bind().await;
        let mut settings = settings(device.port());
        settings.heartbeat_timeout_ms = 300;
        let system = socket_device(settings);

        assert!(system.connect());
        let mut session = device.accept(to_seconds(Utc::now())).await;
        session.expect("ts_server_info").await;

        for _ in 0..8 {
            session.send("heartbeat", json!({"current_rssi": [50], "frequency": [5658]}));
            tokio::time::sleep(Duration::from_millis(100)).await;
        }

        assert!(system.connected());
        assert_eq!(system.disconnect_count(), 0);
    }

    /// 异常与未知消息不影响链路，遥测进入状态与 RSSI
    #[tokio::test]
    async fn test_malformed_and_unknown_messages_are_tolerated() {
        let device = ScriptedDevice::bind().await;
        let system = socket_device(settings(device.port()));

        assert!(system.connect());
        let mut session = device.accept(to_seconds(Utc::now())).await;
        session.expect("ts_server_info").await;

        session.send_raw("this is not json");
        session.send("pass_record", json!({"node": "zero"}));
        session.send("leaderboard", json!({"ranks": [1, 2, 3]}));
        session.send(
            "heartbeat",
            json!({
                "current_rssi": [57, 49, 41],
                "frequency": [5658, 5695],
                "crossing_flag": [false, true, false]
            }),
        );
        session.send(
            "environmental_data",
            json!([{"Core": {"voltage": {"value": 7.4}, "temperature": {"value": 47.8}}}]),
        );
        session.send("ts_server_info", json!({"release_version": "4.1.0"}));

        assert!(wait_until(WAIT, || system.server_info().is_some()).await);
        assert!(system.connected());

        let rssi = system.rssi();
        assert_eq!(rssi.len(), 2);
        assert_eq!(rssi[1].frequency, 5695);
        assert!(rssi[1].detected);
        assert_eq!(system.max_pilots(), 2);

        let status: Vec<String> = system.status().map(|item| item.value).collect();
        assert!(status.contains(&"7.4v".to_string()), "{status:?}");
        assert!(status.contains(&"47.8c".to_string()), "{status:?}");
    }

    /// 设备断开后可以重新连接
    #[tokio::test]
    async fn test_reconnect_after_device_closes() {
        let device = ScriptedDevice::bind().await;
        let system = socket_device(settings(device.port()));

        assert!(system.connect());
        let mut session = device.accept(to_seconds(Utc::now())).await;
        session.expect("ts_server_info").await;
        assert!(wait_until(WAIT, || system.is_link_live()).await);

        session.close();
        assert!(wait_until(WAIT, || !system.is_link_live()).await);
        assert_eq!(system.disconnect_count(), 1);
        assert!(!system.set_listening_frequencies(&frequencies()));

        assert!(system.connect());
        let mut session = device.accept(to_seconds(Utc::now())).await;
        session.expect("ts_server_info").await;
        assert!(wait_until(WAIT, || system.connected()).await);
        assert!(system.set_listening_frequencies(&frequencies()));
        session.expect("set_frequency").await;
    }

    /// 配置驱动：TOML -> Manager -> Socket 设备 -> Dispatcher -> 文件 sink
    #[tokio::test]
    async fn test_config_to_file_sink_pipeline() {
        let device = ScriptedDevice::bind().await;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("detections.jsonl");

        let content = format!(
            r#"
[[devices]]
id = "start"
[devices.settings]
type = "socket"
host = "127.0.0.1"
port = {port}
sync_window_ms = 150

[[devices]]
id = "marshal"
role = "split"
sector_length_m = 75.0
[devices.settings]
type = "manual"

[[frequencies]]
frequency = 5658

[[frequencies]]
frequency = 5695
"#,
            port = device.port()
        );
        let config = ConfigLoader::load_from_str(&content, ConfigFormat::Toml).unwrap();
        let clock: SharedClock = Arc::new(SystemClock);
        let manager = TimingSystemManager::from_config(&config, clock);
        assert_eq!(manager.distance_map().distance(1), Some(75.0));

        let (event_tx, mut event_rx) = mpsc::unbounded_channel::<DetectionEvent>();
        manager.subscribe_all(Arc::new(move |event: &DetectionEvent| {
            let _ = event_tx.send(event.clone());
        }));

        let (sink_tx, sink_rx) = mpsc::unbounded_channel();
        let sinks = vec![SinkConfig {
            name: "laps".to_string(),
            sink_type: SinkType::File,
            queue_capacity: 16,
            params: HashMap::from([("path".to_string(), path.display().to_string())]),
        }];
        let dispatcher = create_dispatcher(sinks, sink_rx).unwrap().spawn();

        let t0 = Utc::now();
        assert!(manager.connect_all().iter().all(|(_, ok)| *ok));
        let mut session = device.accept(to_seconds(t0)).await;
        session.expect("ts_server_info").await;
        assert!(wait_until(WAIT, || manager.all_connected()).await);

        assert!(manager.apply_frequencies().iter().all(|(_, ok)| *ok));
        session.expect("set_frequency").await;
        session.expect("set_frequency").await;
        let socket = manager.get("start").and_then(|d| d.as_socket()).unwrap();
        assert!(wait_until(WAIT, || socket.epoch().is_some()).await);

        assert!(manager.start_all(t0).iter().all(|(_, ok)| *ok));
        session.expect("ts_race_stage").await;

        session.send("pass_record", json!({"node": 1, "frequency": 5695, "timestamp": 1200}));
        session.send("node_data", json!({"pass_peak_rssi": [0, 77]}));
        let marshal = manager.get("marshal").and_then(|d| d.as_manual()).unwrap();
        assert!(marshal.trigger(5658, t0 + chrono::Duration::seconds(3), 60));

        for _ in 0..2 {
            let event = tokio::time::timeout(WAIT, event_rx.recv())
                .await
                .expect("missing detection")
                .unwrap();
            sink_tx.send(event).unwrap();
        }
        drop(sink_tx);

        let metrics = tokio::time::timeout(WAIT, dispatcher).await.unwrap().unwrap();
        assert_eq!(metrics[0].1.written, 2);

        let lines: Vec<DetectionEvent> = std::fs::read_to_string(&path)
            .unwrap()
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();
        assert_eq!(lines.len(), 2);
        let from_socket = lines.iter().find(|e| e.device == "start").unwrap();
        assert_eq!(from_socket.peak, 77);
        assert_eq!(from_socket.frequency, 5695);
        let offset = to_seconds(from_socket.time) - (to_seconds(t0) + 1.2);
        assert!(offset.abs() < 0.05, "detection off by {offset}s");
        assert!(lines.iter().any(|e| e.device == "marshal" && e.peak == 60));

        manager.end_all();
        session.expect("stop_race").await;
        manager.disconnect_all();
        assert!(session.closed_within(WAIT).await);
    }
}
