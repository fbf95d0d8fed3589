use anyhow::{bail, Context, Result};
use bl0940_lib::{bl0940::Bl0940, sensor::Quantity, transport::Transport};
use log::*;
use paho_mqtt as mqtt;
use serde::Deserialize;
use std::{fs::File, path::Path, time::Duration};

#[derive(Debug, Clone, Deserialize)]
pub struct MqttConfig {
    pub url: String,
    pub username: Option<String>,
    pub password: Option<String>,
    /// Base topic, every quantity is published below it.
    #[serde(default = "default_topic")]
    pub topic: String,
    /// Random when not set.
    pub client_id: Option<String>,
    /// Quality of service code to use
    #[serde(default = "default_qos")]
    qos: u8,
    #[serde(default = "default_keep_alive", with = "humantime_serde")]
    pub keep_alive: Duration,
}

fn default_topic() -> String {
    String::from("bl0940")
}

fn default_qos() -> u8 {
    0
}

fn default_keep_alive() -> Duration {
    Duration::from_secs(20)
}

impl MqttConfig {
    pub const DEFAULT_CONFIG_FILE: &'static str = "mqtt.yaml";

    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(yaml).context("Invalid MQTT configuration")?;
        config.validate()
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        debug!("Loading MQTT config file from {path:?}");
        let file = File::open(path)
            .with_context(|| format!("Cannot open MQTT config file {path:?}"))?;
        let config: Self = serde_yaml::from_reader(file)
            .with_context(|| format!("Invalid MQTT config file {path:?}"))?;
        config.validate()
    }

    fn validate(self) -> Result<Self> {
        if self.qos > 2 {
            bail!("Invalid MQTT qos {}, expected 0, 1 or 2", self.qos);
        }
        Ok(self)
    }

    pub fn qos(&self) -> i32 {
        self.qos as i32
    }

    pub fn client_id(&self) -> String {
        self.client_id
            .clone()
            .unwrap_or_else(|| format!("powermon-{:08x}", rand::random::<u32>()))
    }

    pub fn topic_for(&self, quantity: Quantity) -> String {
        format!("{}/{}", self.topic.trim_end_matches('/'), quantity.name())
    }
}

fn connect(config: &MqttConfig) -> Result<mqtt::Client> {
    let create_opts = mqtt::CreateOptionsBuilder::new()
        .server_uri(config.url.clone())
        .client_id(config.client_id())
        .finalize();
    let client = mqtt::Client::new(create_opts).with_context(|| "Error creating mqtt client")?;

    let mut conn_builder = mqtt::ConnectOptionsBuilder::new();
    conn_builder
        .keep_alive_interval(config.keep_alive)
        .clean_session(true);
    if let Some(user_name) = &config.username {
        conn_builder.user_name(user_name.clone());
    }
    if let Some(password) = &config.password {
        conn_builder.password(password.clone());
    }

    info!("Connecting to MQTT broker {}", config.url);
    client
        .connect(conn_builder.finalize())
        .with_context(|| format!("Mqtt client unable to connect to {}", config.url))?;
    Ok(client)
}

/// Publishes every quantity to `<topic>/<quantity>` and runs the scheduler loop.
pub fn run_daemon<T: Transport>(
    meter: &mut Bl0940<T>,
    poll_interval: Duration,
    config_file: &str,
) -> Result<()> {
    let config = MqttConfig::load(config_file)?;
    trace!("MQTT config: {config:?}");
    let client = connect(&config)?;

    for quantity in Quantity::ALL {
        let client = client.clone();
        let topic = config.topic_for(quantity);
        let qos = config.qos();
        meter.set_sensor(quantity, move |value: f64| {
            let message = mqtt::Message::new(topic.as_str(), value.to_string(), qos);
            if let Err(error) = client.publish(message) {
                error!("Cannot publish {value} to {topic}: {error}");
            }
        });
    }

    crate::run_scheduler(meter, poll_interval)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_defaults() {
        let config = MqttConfig::from_yaml_str("url: tcp://localhost:1883").unwrap();
        assert_eq!(config.url, "tcp://localhost:1883");
        assert_eq!(config.qos(), 0);
        assert_eq!(config.keep_alive, Duration::from_secs(20));
        assert!(config.client_id().starts_with("powermon-"));
        assert_eq!(
            config.topic_for(Quantity::ExternalTemperature),
            "bl0940/external_temperature"
        );
    }

    #[test]
    fn config_values() {
        let config = MqttConfig::from_yaml_str(
            "url: tcp://broker:1883\ntopic: home/meter/\nclient_id: kitchen\nqos: 1\nkeep_alive: 1m",
        )
        .unwrap();
        assert_eq!(config.client_id(), "kitchen");
        assert_eq!(config.qos(), 1);
        assert_eq!(config.keep_alive, Duration::from_secs(60));
        assert_eq!(config.topic_for(Quantity::Power), "home/meter/power");
    }

    #[test]
    fn config_rejects_invalid_qos() {
        assert!(MqttConfig::from_yaml_str("url: tcp://broker:1883\nqos: 3").is_err());
        assert!(MqttConfig::from_yaml_str("topic: missing-url").is_err());
    }
}
