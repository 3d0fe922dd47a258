//! Interactive motor controller console
//!
//! Connects to the nearest TMOTOR controller and sends control values typed
//! on stdin:
//!
//! ```text
//! enable on|off
//! mode position|velocity|torque
//! motor left|right
//! setpoint <value>
//! disconnect
//! status
//! quit
//! ```
//!
//! Run with: cargo run --example motor_console
//!
//! To require a stronger signal before connecting:
//!   cargo run --example motor_console -- --rssi -60

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use tmotor_ble::{Mode, MotorSelect, Result, SessionConfig, SessionManager};
use tokio::io::{AsyncBufReadExt, BufReader};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter("warn,tmotor_ble=debug")
        .init();

    println!("TMOTOR Console");
    println!("==============\n");

    // Parse command line arguments
    let args: Vec<String> = std::env::args().collect();
    let rssi_threshold = args
        .iter()
        .position(|arg| arg == "--rssi")
        .and_then(|i| args.get(i + 1))
        .and_then(|s| s.parse::<i16>().ok());

    let mut config = SessionConfig::default();
    if let Some(threshold) = rssi_threshold {
        config = config.with_rssi_threshold(threshold);
    }

    println!(
        "Looking for '{}' stronger than {} dBm...\n",
        config.connect_filter.name, config.connect_filter.rssi_threshold
    );

    let manager = SessionManager::new(config).await?;

    let _connected = manager.on_connect(|peripheral| {
        println!("\n[connected] {} ready", peripheral);
    });
    let _disconnected = manager.on_disconnect(|peripheral| {
        println!("\n[disconnected] {} lost, scanning again", peripheral);
    });

    // Mode last sent, used to warn about out-of-range setpoints.
    let mode = Arc::new(AtomicI64::new(Mode::Position.ordinal()));

    print_help();

    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Ok(Some(line)) = line else {
                    break;
                };
                if !handle_command(&manager, &mode, line.trim()) {
                    break;
                }
            }
            _ = tokio::signal::ctrl_c() => {
                println!("\nInterrupted");
                break;
            }
        }
    }

    manager.shutdown().await?;
    println!("Goodbye");

    Ok(())
}

/// Run one console command. Returns `false` when the console should exit.
fn handle_command(manager: &SessionManager, mode: &AtomicI64, line: &str) -> bool {
    let mut parts = line.split_whitespace();
    let command = parts.next().unwrap_or_default();
    let argument = parts.next().unwrap_or_default().to_lowercase();

    let sent = match command {
        "" => return true,
        "quit" | "exit" => return false,
        "help" => {
            print_help();
            return true;
        }
        "status" => {
            print_status(manager);
            return true;
        }
        "disconnect" => {
            manager.disconnect();
            return true;
        }
        "enable" => match argument.as_str() {
            "on" | "1" | "true" => manager.update_enable(true),
            "off" | "0" | "false" => manager.update_enable(false),
            _ => {
                println!("usage: enable on|off");
                return true;
            }
        },
        "mode" => {
            let Some(selected) = Mode::ALL
                .into_iter()
                .find(|m| m.to_string().to_lowercase() == argument)
            else {
                println!("usage: mode position|velocity|torque");
                return true;
            };
            let sent = manager.update_mode(selected);
            if sent {
                mode.store(selected.ordinal(), Ordering::Relaxed);
            }
            sent
        }
        "motor" => match argument.as_str() {
            "left" => manager.update_motor_select(MotorSelect::Left),
            "right" => manager.update_motor_select(MotorSelect::Right),
            _ => {
                println!("usage: motor left|right");
                return true;
            }
        },
        "setpoint" => {
            let Ok(value) = argument.parse::<f64>() else {
                println!("usage: setpoint <number>");
                return true;
            };
            if let Ok(current) = Mode::from_ordinal(mode.load(Ordering::Relaxed)) {
                let range = current.setpoint_range();
                if !range.contains(value) {
                    println!(
                        "warning: {} is outside the {} range [{}, {}]",
                        value, current, range.min, range.max
                    );
                }
            }
            manager.update_setpoint(value)
        }
        other => {
            println!("unknown command '{}', type 'help'", other);
            return true;
        }
    };

    if sent {
        println!("ok");
    } else {
        println!("not sent (controller not ready)");
    }

    true
}

fn print_status(manager: &SessionManager) {
    println!("State: {}", manager.state());

    if let Some(peripheral) = manager.connected_peripheral() {
        println!("Peripheral: {}", peripheral);
    }

    let discovered = manager.discovered_peripherals();
    println!("Discovered: {}", discovered.len());
    for peripheral in discovered {
        println!(
            "  {} {:<10} RSSI: {:>4} dBm",
            peripheral.id,
            peripheral.name.as_deref().unwrap_or("Unknown"),
            peripheral
                .rssi
                .map(|r| r.to_string())
                .unwrap_or_else(|| "?".to_string()),
        );
    }
}

fn print_help() {
    println!("Commands:");
    println!("  enable on|off");
    println!("  mode position|velocity|torque");
    println!("  motor left|right");
    println!("  setpoint <value>");
    println!("  disconnect");
    println!("  status");
    println!("  quit");
    println!();
}
