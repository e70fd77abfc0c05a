//! Sensor simulator - publishes synthetic camera messages over MQTT
//!
//! Drives the controller without hardware: every interval each simulated
//! sensor publishes a state message whose count random-walks, and entry or
//! exit transitions publish the matching event.
//!
//! Usage:
//!   cargo run --bin sensor_sim -- --host localhost --sensors 3

use clap::Parser;
use rumqttc::{AsyncClient, MqttOptions, QoS};
use serde_json::json;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Synthetic camera sensor fleet
#[derive(Parser, Debug)]
#[command(name = "sensor_sim", version, about)]
struct Args {
    /// MQTT broker host
    #[arg(long, default_value = "localhost")]
    host: String,

    /// MQTT broker port
    #[arg(long, default_value_t = 1883)]
    port: u16,

    /// Number of simulated sensors
    #[arg(long, default_value_t = 3)]
    sensors: usize,

    /// Interval between state publishes (ms)
    #[arg(long, default_value_t = 1000)]
    interval_ms: u64,

    /// Upper bound for the simulated person count
    #[arg(long, default_value_t = 6)]
    max_count: i64,
}

fn epoch_ms() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis() as u64
}

/// xorshift64, good enough for a simulator
struct Rng(u64);

impl Rng {
    fn next(&mut self) -> u64 {
        let mut x = self.0;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.0 = x;
        x
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let client_id = format!("sensor-sim-{}", std::process::id());
    let mut options = MqttOptions::new(client_id, &args.host, args.port);
    options.set_keep_alive(Duration::from_secs(30));
    let (client, mut eventloop) = AsyncClient::new(options, 64);

    tokio::spawn(async move {
        loop {
            if eventloop.poll().await.is_err() {
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
        }
    });

    let mut rng = Rng(epoch_ms() | 1);
    let mut counts = vec![0i64; args.sensors];
    let mut ticker = tokio::time::interval(Duration::from_millis(args.interval_ms));

    println!("publishing {} sensors to {}:{}", args.sensors, args.host, args.port);

    loop {
        ticker.tick().await;
        let ts = epoch_ms();

        for (i, count) in counts.iter_mut().enumerate() {
            let sensor = format!("cam{}", i + 1);
            let previous = *count;

            // Random walk, clamped to [0, max_count]
            let step = (rng.next() % 3) as i64 - 1;
            *count = (*count + step).clamp(0, args.max_count);

            let state = json!({
                "type": "state",
                "camera_id": sensor,
                "timestamp": ts,
                "data": {"person_count": *count, "people": []}
            });
            client
                .publish(format!("sensor/{sensor}/state"), QoS::AtMostOnce, false, state.to_string())
                .await?;

            let event_name = match (previous, *count) {
                (0, c) if c > 0 => Some("PERSON_ENTERED"),
                (p, 0) if p > 0 => Some("ALL_PEOPLE_LEFT"),
                _ => None,
            };
            if let Some(name) = event_name {
                let event = json!({
                    "type": "event",
                    "camera_id": sensor,
                    "timestamp": ts,
                    "event": {"name": name}
                });
                client
                    .publish(
                        format!("sensor/{sensor}/event"),
                        QoS::AtMostOnce,
                        false,
                        event.to_string(),
                    )
                    .await?;
                println!("{sensor}: {name} (count {previous} -> {count})", count = *count);
            }
        }
    }
}
