use anyhow::{Context, Result};

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub mqtt_host: String,
    pub mqtt_port: u16,
    /// MQTT keep-alive interval in seconds
    pub mqtt_keep_alive_secs: u64,
    /// Topic the field devices publish readings to
    pub data_topic: String,
    /// Per-device command topics are `{prefix}/{device_id}`
    pub command_topic_prefix: String,
    pub redis_url: String,
    /// Redis pub/sub channel for live snapshot updates
    pub live_channel: String,
    pub server_host: String,
    pub server_port: u16,
    /// Max single-step temperature delta accepted by the anomaly filter (°C)
    pub max_temp_delta: f64,
    /// Max single-step humidity delta accepted by the anomaly filter (%RH)
    pub max_humidity_delta: f64,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            database_url: required("DATABASE_URL")?,
            mqtt_host: optional("MQTT_HOST", "localhost"),
            mqtt_port: optional("MQTT_PORT", "1883")
                .parse()
                .context("MQTT_PORT must be a valid port number")?,
            mqtt_keep_alive_secs: optional("MQTT_KEEP_ALIVE_SECS", "60")
                .parse()
                .context("MQTT_KEEP_ALIVE_SECS must be a positive integer")?,
            data_topic: optional("MQTT_DATA_TOPIC", "stm32/data"),
            command_topic_prefix: optional("MQTT_COMMAND_TOPIC_PREFIX", "stm32/command"),
            redis_url: optional("REDIS_URL", "redis://127.0.0.1:6379"),
            live_channel: optional("LIVE_CHANNEL", "iot_data_stream"),
            server_host: optional("SERVER_HOST", "0.0.0.0"),
            server_port: optional("SERVER_PORT", "8080")
                .parse()
                .context("SERVER_PORT must be a valid port number")?,
            max_temp_delta: optional("MAX_TEMP_DELTA", "10.0")
                .parse()
                .context("MAX_TEMP_DELTA must be a decimal number")?,
            max_humidity_delta: optional("MAX_HUMIDITY_DELTA", "25.0")
                .parse()
                .context("MAX_HUMIDITY_DELTA must be a decimal number")?,
        })
    }
}

fn required(key: &str) -> Result<String> {
    std::env::var(key).with_context(|| format!("missing required env var: {key}"))
}

fn optional(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_owned())
}
