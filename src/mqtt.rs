use crate::commandline::MqttFormat;
use anyhow::{bail, Context, Result};
use evd5bms_lib::telemetry::{TelemetryEvent, TelemetrySink};
use rumqttc::{Client, Connection, Event, MqttOptions, Packet, QoS};
use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, Deserialize, Clone)]
pub struct MqttConfig {
    host: String,
    #[serde(default = "MqttConfig::default_port")]
    port: u16,
    username: Option<String>,
    password: Option<String>,
    #[serde(default = "MqttConfig::default_topic")]
    topic: String,
    #[serde(default = "MqttConfig::default_qos")]
    qos: u8,
    #[serde(default = "MqttConfig::default_client_id")]
    client_id: String,
    #[serde(
        default = "MqttConfig::default_keep_alive_interval",
        with = "humantime_serde"
    )]
    keep_alive_interval: Duration,
    #[serde(
        default = "MqttConfig::default_reconnect_interval",
        with = "humantime_serde"
    )]
    reconnect_interval: Duration,
    /// Outgoing messages buffered while the broker is unreachable.
    #[serde(default = "MqttConfig::default_queue_capacity")]
    queue_capacity: usize,
}

impl MqttConfig {
    fn default_port() -> u16 {
        1883
    }

    fn default_topic() -> String {
        "evd5bms".into()
    }

    fn default_qos() -> u8 {
        0
    }

    fn generate_random_string(len: usize) -> String {
        use rand::distributions::Alphanumeric;
        use rand::Rng;

        rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(len)
            .map(char::from)
            .collect()
    }

    fn default_client_id() -> String {
        format!("evd5bms-{}", Self::generate_random_string(8))
    }

    fn default_keep_alive_interval() -> Duration {
        Duration::from_secs(30)
    }

    fn default_reconnect_interval() -> Duration {
        Duration::from_secs(5)
    }

    fn default_queue_capacity() -> usize {
        256
    }

    pub const DEFAULT_CONFIG_FILE: &str = "mqtt.yaml";

    pub fn load(config_file_path: &str) -> Result<Self> {
        log::debug!("Loading config file from {config_file_path:?}");
        let config_file = std::fs::File::open(config_file_path)
            .with_context(|| format!("Cannot open MQTT config file {config_file_path:?}"))?;
        let config: Self = serde_yaml::from_reader(&config_file)
            .with_context(|| format!("Cannot read MQTT config from file: {config_file_path:?}"))?;
        config.qos()?;
        Ok(config)
    }

    fn qos(&self) -> Result<QoS> {
        Ok(match self.qos {
            0 => QoS::AtMostOnce,
            1 => QoS::AtLeastOnce,
            2 => QoS::ExactlyOnce,
            other => bail!("Invalid MQTT QoS {other}, expected 0, 1 or 2"),
        })
    }

    pub fn create_client(&self) -> Result<(Client, Connection)> {
        let mut options = MqttOptions::new(&self.client_id, &self.host, self.port);
        options
            .set_keep_alive(self.keep_alive_interval)
            .set_clean_session(true);
        if let (Some(username), Some(password)) = (&self.username, &self.password) {
            options.set_credentials(username, password);
        }
        log::info!(
            "Connecting to MQTT broker: {}:{} with client_id: {}",
            self.host,
            self.port,
            self.client_id
        );
        Ok(Client::new(options, self.queue_capacity))
    }
}

/// Publishes controller telemetry without ever blocking the control loop.
/// The broker connection is driven by a background thread.
pub struct MqttSink {
    client: Client,
    topic: String,
    qos: QoS,
    format: MqttFormat,
}

impl MqttSink {
    pub fn new(config: MqttConfig, format: MqttFormat) -> Result<Self> {
        let qos = config.qos()?;
        let (client, mut connection) = config.create_client()?;
        let reconnect_interval = config.reconnect_interval;
        std::thread::Builder::new()
            .name("mqtt".into())
            .spawn(move || {
                for notification in connection.iter() {
                    match notification {
                        Ok(Event::Incoming(Packet::ConnAck(_))) => {
                            log::info!("Connected to MQTT broker.")
                        }
                        Ok(event) => log::trace!("MQTT event: {event:?}"),
                        Err(err) => {
                            log::warn!("MQTT connection error: {err}");
                            std::thread::sleep(reconnect_interval);
                        }
                    }
                }
            })
            .with_context(|| "Cannot start MQTT connection thread")?;
        Ok(Self {
            client,
            topic: config.topic,
            qos,
            format,
        })
    }

    fn publish_message(&mut self, topic: String, payload: String) {
        log::debug!("Publishing to MQTT: Topic='{topic}', Payload='{payload}'");
        if let Err(err) = self.client.try_publish(&topic, self.qos, false, payload) {
            log::warn!("Dropped MQTT message for topic {topic}: {err}");
        }
    }
}

impl TelemetrySink for MqttSink {
    fn publish(&mut self, event: &TelemetryEvent) {
        let messages = match self.format {
            MqttFormat::Simple => simple_messages(&self.topic, event),
            MqttFormat::Json => json_message(&self.topic, event, chrono::Utc::now())
                .into_iter()
                .collect(),
        };
        for (topic, payload) in messages {
            self.publish_message(topic, payload);
        }
    }
}

/// One message per scalar: `<topic>/<battery>/<cell>/<field>` for cell
/// events, `<topic>/<event>/<field>` for the others.
fn simple_messages(base_topic: &str, event: &TelemetryEvent) -> Vec<(String, String)> {
    fn collect(topic: String, value: &serde_json::Value, messages: &mut Vec<(String, String)>) {
        match value {
            serde_json::Value::Object(map) => {
                for (k, v) in map {
                    collect(format!("{topic}/{k}"), v, messages);
                }
            }
            serde_json::Value::Array(arr) => {
                for (i, v) in arr.iter().enumerate() {
                    collect(format!("{topic}/{i}"), v, messages);
                }
            }
            serde_json::Value::String(s) => messages.push((topic, s.clone())),
            serde_json::Value::Number(n) => messages.push((topic, n.to_string())),
            serde_json::Value::Bool(b) => messages.push((topic, b.to_string())),
            // Do not publish null values
            serde_json::Value::Null => {}
        }
    }

    let mut value = match serde_json::to_value(event) {
        Ok(value) => value,
        Err(err) => {
            log::error!("Failed to serialize {event:?}: {err}");
            return Vec::new();
        }
    };
    let Some(fields) = value.as_object_mut() else {
        return Vec::new();
    };
    let name = fields
        .remove("event")
        .and_then(|name| name.as_str().map(str::to_string))
        .unwrap_or_default();
    let root_topic = match event.position() {
        Some((battery, cell)) => {
            fields.remove("battery");
            fields.remove("cell");
            format!("{base_topic}/{battery}/{cell}")
        }
        None => format!("{base_topic}/{name}"),
    };
    let mut messages = Vec::new();
    collect(root_topic, &value, &mut messages);
    messages
}

/// The whole event on `<topic>/events`, stamped with the publication time.
fn json_message(
    base_topic: &str,
    event: &TelemetryEvent,
    timestamp: chrono::DateTime<chrono::Utc>,
) -> Option<(String, String)> {
    let mut value = match serde_json::to_value(event) {
        Ok(value) => value,
        Err(err) => {
            log::error!("Failed to serialize {event:?}: {err}");
            return None;
        }
    };
    if let Some(fields) = value.as_object_mut() {
        fields.insert(
            "timestamp".to_string(),
            serde_json::Value::String(timestamp.to_rfc3339()),
        );
    }
    Some((format!("{base_topic}/events"), value.to_string()))
}
