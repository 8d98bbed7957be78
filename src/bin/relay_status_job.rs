use std::thread;
use std::time::Duration;

use chrono::Utc;
use clap::Parser;

use shelly_auto_off::adapters::shelly_rpc::{RelayClient, ShellyRpcClient};
use shelly_auto_off::domain::switch_status::SwitchStatus;

#[derive(Parser, Debug, Clone, PartialEq)]
#[command(name = "relay_status_job")]
#[command(about = "Prints a human-readable status line for a Shelly relay at a fixed interval")]
struct JobArgs {
    /// Relay host or IP address.
    #[arg(long, env = "SHELLY_HOST")]
    host: String,

    #[arg(long, env = "SHELLY_SWITCH_ID", default_value_t = 0)]
    switch_id: u8,

    /// Seconds between two reads.
    #[arg(long, default_value_t = 5, value_parser = clap::value_parser!(u64).range(1..))]
    interval_secs: u64,

    /// Read once and exit.
    #[arg(long)]
    once: bool,

    /// Power at or above which the relay counts as running, in watts.
    #[arg(long, env = "POWER_ON_THRESHOLD", default_value_t = 0.7, value_parser = parse_threshold)]
    power_on_threshold: f64,
}

fn parse_threshold(raw: &str) -> Result<f64, String> {
    let value: f64 = raw
        .trim()
        .parse()
        .map_err(|_| format!("'{raw}' is not a number"))?;
    if !value.is_finite() || value < 0.0 {
        return Err("threshold must be a finite non-negative number".to_string());
    }
    Ok(value)
}

fn main() {
    let _ = dotenvy::dotenv();
    let args = JobArgs::parse();

    let client = match ShellyRpcClient::new(&args.host, args.switch_id) {
        Ok(client) => client,
        Err(err) => {
            println!("[{}] ERROR: could not create relay client: {}", now_iso(), err);
            std::process::exit(1);
        }
    };

    println!(
        "Starting relay status job for {} switch {} (interval: {}s)...",
        args.host,
        client.switch_id(),
        args.interval_secs
    );

    loop {
        poll_relay(&client, &args.host, args.power_on_threshold);
        if args.once {
            break;
        }
        println!();
        thread::sleep(Duration::from_secs(args.interval_secs));
    }
}

fn poll_relay(client: &ShellyRpcClient, host: &str, power_on_threshold: f64) {
    let status = match client.get_status() {
        Ok(status) => status,
        Err(err) => {
            println!("[{}] {}: ERROR reading status: {}", now_iso(), host, err);
            return;
        }
    };

    println!(
        "[{}] {} | Status: {}",
        now_iso(),
        host,
        status_text(&status, power_on_threshold)
    );
    println!(
        "  Output: {} | Power: {:.1} W",
        match status.output {
            Some(on) => on_off(on),
            None => "n/a",
        },
        status.apower_w
    );

    match status.voltage_v {
        Some(voltage) => println!("  Voltage: {:.1} V", voltage),
        None => println!("  Voltage: n/a"),
    }

    match status.current_a {
        Some(current) => println!("  Current: {:.3} A", current),
        None => println!("  Current: n/a"),
    }

    match status.energy_total_wh {
        Some(wh) => println!("  Energy counter: {:.3} kWh", wh / 1000.0),
        None => println!("  Energy counter: n/a"),
    }
}

fn status_text(status: &SwitchStatus, power_on_threshold: f64) -> &'static str {
    match status.output {
        Some(false) => "Switched off",
        _ if status.apower_w >= power_on_threshold => "Running",
        Some(true) => "On, standby",
        None => "Unknown output, standby",
    }
}

fn now_iso() -> String {
    Utc::now().to_rfc3339()
}

fn on_off(value: bool) -> &'static str {
    if value { "on" } else { "off" }
}
