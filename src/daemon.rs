use anyhow::{Context, Result};
use log::{error, info};
use serde_json::json;
use sokbms_lib::bluest_async::BluestTransport;
use sokbms_lib::SokBms;

use crate::{commandline, mqtt};

fn sample_to_json(bms: &SokBms<BluestTransport>) -> Result<serde_json::Value> {
    let telemetry = bms.telemetry().context("No telemetry sample held")?;
    let derived = bms.derived().context("No derived metrics held")?;
    Ok(json!({
        "telemetry": serde_json::to_value(telemetry)?,
        "derived": serde_json::to_value(derived)?,
        "num_samples": bms.num_samples(),
    }))
}

fn publish_simple_format(
    publisher: &mqtt::MqttPublisher,
    base_topic: &str,
    value: &serde_json::Value,
) {
    fn publish_recursive(publisher: &mqtt::MqttPublisher, topic: &str, val: &serde_json::Value) {
        match val {
            serde_json::Value::Object(map) => {
                for (k, v) in map {
                    let sub_topic = format!("{topic}/{k}");
                    publish_recursive(publisher, &sub_topic, v);
                }
            }
            serde_json::Value::Array(arr) => {
                for (i, v) in arr.iter().enumerate() {
                    let sub_topic = format!("{topic}/{i}");
                    publish_recursive(publisher, &sub_topic, v);
                }
            }
            serde_json::Value::String(s) => {
                if let Err(e) = publisher.publish(topic, s) {
                    error!("Failed to publish message to topic {topic}: {e}");
                }
            }
            serde_json::Value::Number(n) => {
                if let Err(e) = publisher.publish(topic, &n.to_string()) {
                    error!("Failed to publish message to topic {topic}: {e}");
                }
            }
            serde_json::Value::Bool(b) => {
                if let Err(e) = publisher.publish(topic, &b.to_string()) {
                    error!("Failed to publish message to topic {topic}: {e}");
                }
            }
            serde_json::Value::Null => {
                // Do not publish null values
            }
        }
    }
    publish_recursive(publisher, base_topic, value);
}

fn output_console(bms: &SokBms<BluestTransport>) {
    println!("--- Data at {} ---", chrono::Local::now().to_rfc3339());
    if let Some(telemetry) = bms.telemetry() {
        println!("Telemetry: {telemetry:?}");
    }
    if let Some(derived) = bms.derived() {
        println!("Derived: {derived:?}");
    }
    println!("Samples: {}", bms.num_samples());
    println!("--------------------------");
}

fn output_mqtt(
    bms: &SokBms<BluestTransport>,
    publisher: &mqtt::MqttPublisher,
    format: &commandline::MqttFormat,
) {
    let value = match sample_to_json(bms) {
        Ok(value) => value,
        Err(e) => {
            error!("Failed to serialize telemetry sample: {e}");
            return;
        }
    };

    match format {
        commandline::MqttFormat::Json => {
            let mut document = serde_json::Map::new();
            document.insert(
                "timestamp".to_string(),
                json!(chrono::Utc::now().to_rfc3339()),
            );
            if let serde_json::Value::Object(map) = value {
                document.extend(map);
            }
            match serde_json::to_string(&serde_json::Value::Object(document)) {
                Ok(json_payload) => {
                    if let Err(e) = publisher.publish(publisher.topic(), &json_payload) {
                        error!("Failed to publish data to MQTT: {e:?}");
                    }
                }
                Err(e) => error!("Failed to serialize data to JSON string: {e}"),
            }
        }
        commandline::MqttFormat::Simple => {
            publish_simple_format(publisher, publisher.topic(), &value);
        }
    }
}

pub async fn run(
    mut bms: SokBms<BluestTransport>,
    output: commandline::DaemonOutput,
    interval: std::time::Duration,
) -> Result<()> {
    info!("Starting daemon mode: output={output:?}, interval={interval:?}");

    let mut mqtt_publisher: Option<mqtt::MqttPublisher> = None;
    if let commandline::DaemonOutput::Mqtt { config_file, .. } = &output {
        let config = mqtt::MqttConfig::load(config_file)
            .with_context(|| format!("Failed to open MQTT config file at '{config_file}'"))?;
        info!("Successfully loaded MQTT config from {config_file}: {config:?}");
        let publisher =
            mqtt::MqttPublisher::new(config).with_context(|| "Failed to create MQTT publisher")?;
        mqtt_publisher = Some(publisher);
    }

    loop {
        // Drop the returned snapshot reference so the output paths below can
        // borrow the client again.
        let cycle = bms.update().await.map(|_| ());
        match cycle {
            Ok(()) => match &output {
                commandline::DaemonOutput::Console => output_console(&bms),
                commandline::DaemonOutput::Mqtt { format, .. } => {
                    if let Some(publisher) = &mqtt_publisher {
                        output_mqtt(&bms, publisher, format);
                    }
                }
            },
            // A failed cycle leaves the previous sample untouched; the next
            // interval simply tries again.
            Err(e) => error!("Polling cycle failed: {e}"),
        }
        tokio::time::sleep(interval).await;
    }
}
