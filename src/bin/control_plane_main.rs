// control_plane_main.rs
//
// Runs the full control plane with the embedded simulation feed and an
// operator console on stdin.

use std::io::{stdin, stdout, Write};
use std::path::Path;
use std::sync::Arc;

use traffic_intelligence::agent::decision::StrategyKind;
use traffic_intelligence::communication::event_bridge::start_event_bridge;
use traffic_intelligence::config::Config;
use traffic_intelligence::global_variables::AMQP_URL;
use traffic_intelligence::incident::inference::IncidentType;
use traffic_intelligence::models::junction::Direction;
use traffic_intelligence::models::network::create_default_network;
use traffic_intelligence::registry::ServiceRegistry;
use traffic_intelligence::safety::system_modes::SystemMode;
use traffic_intelligence::{current_timestamp, EXIT_SAFETY_FAULT};

#[tokio::main]
async fn main() {
    env_logger::init();

    let config = Config::load(Path::new("config/traffic.json"));
    let network = create_default_network();

    let registry = match ServiceRegistry::start(config, network) {
        Ok(registry) => registry,
        Err(e) => {
            eprintln!("Fatal startup failure: {}", e);
            std::process::exit(EXIT_SAFETY_FAULT);
        }
    };

    registry.spawn_simulation_feed(4, 120);
    if std::env::var("AMQP_BRIDGE").is_ok() {
        start_event_bridge(Arc::clone(&registry.emitter), AMQP_URL.to_string());
        println!("[BRIDGE] Publishing events to RabbitMQ at {}", AMQP_URL);
    }

    registry.agent.start(StrategyKind::RuleBased);
    println!("Control plane running: 9 junctions, agent RULE_BASED.");

    run_cli(&registry).await;
    registry.shutdown().await;
}

fn prompt(label: &str) -> String {
    print!("{}", label);
    stdout().flush().unwrap_or(());
    let mut input = String::new();
    stdin().read_line(&mut input).unwrap_or(0);
    input.trim().to_string()
}

fn parse_direction(s: &str) -> Option<Direction> {
    Direction::parse_short(&s.to_uppercase())
}

async fn run_cli(registry: &Arc<ServiceRegistry>) {
    loop {
        println!("\nTraffic Control Plane - Operator Console");
        println!(" 1. Status");
        println!(" 2. Change system mode");
        println!(" 3. Trigger fail-safe");
        println!(" 4. Exit fail-safe");
        println!(" 5. Force signal GREEN");
        println!(" 6. Disable / enable agent");
        println!(" 7. Emergency stop");
        println!(" 8. List / cancel overrides");
        println!(" 9. Transition & override history");
        println!("10. Agent control (start/stop/pause/resume/strategy)");
        println!("11. Report incident");
        println!("12. Incident inference result");
        println!("13. Exit");

        match prompt("Enter your choice: ").parse::<u32>().unwrap_or(0) {
            1 => show_status(registry),
            2 => {
                let mode = prompt("Mode (NORMAL/EMERGENCY/INCIDENT): ").to_uppercase();
                let reason = prompt("Reason: ");
                let target = match mode.as_str() {
                    "NORMAL" => Some(SystemMode::Normal),
                    "EMERGENCY" => Some(SystemMode::Emergency),
                    "INCIDENT" => Some(SystemMode::Incident),
                    _ => None,
                };
                match target {
                    Some(target) => {
                        let ok = registry.kernel.change_mode(target, &reason, current_timestamp());
                        println!("{}", if ok { "Mode changed." } else { "Transition rejected." });
                    }
                    None => println!("Unknown mode: {}", mode),
                }
            }
            3 => {
                let reason = prompt("Reason: ");
                registry.kernel.enter_fail_safe(&reason, current_timestamp());
                println!("Fail-safe entered.");
            }
            4 => {
                let operator = prompt("Operator id: ");
                if registry.kernel.exit_fail_safe(&operator, current_timestamp()) {
                    println!("Fail-safe exited.");
                } else {
                    println!("Exit rejected (not in fail-safe, or missing operator id).");
                }
            }
            5 => {
                let junction = prompt("Junction id (e.g. J-5): ");
                let direction = prompt("Direction (N/E/S/W): ");
                let duration = prompt("Duration seconds: ").parse::<f64>().unwrap_or(30.0);
                let operator = prompt("Operator id: ");
                let reason = prompt("Reason: ");
                match parse_direction(&direction) {
                    Some(direction) => {
                        match registry.kernel.force_signal(
                            &junction,
                            direction,
                            duration,
                            &operator,
                            &reason,
                            current_timestamp(),
                        ) {
                            Ok(id) => println!("Override created: {}", id),
                            Err(e) => println!("Rejected: {}", e),
                        }
                    }
                    None => println!("Bad direction: {}", direction),
                }
            }
            6 => {
                let action = prompt("disable or enable: ");
                let operator = prompt("Operator id: ");
                let now = current_timestamp();
                if action.eq_ignore_ascii_case("disable") {
                    let reason = prompt("Reason: ");
                    let id = registry.kernel.disable_agent(&operator, &reason, now);
                    println!("Agent disabled ({})", id);
                } else if registry.kernel.enable_agent(&operator, now) {
                    println!("Agent enabled.");
                } else {
                    println!("Agent was not disabled.");
                }
            }
            7 => {
                let operator = prompt("Operator id: ");
                let reason = prompt("Reason: ");
                let id = registry.kernel.emergency_stop(&operator, &reason, current_timestamp());
                println!("Emergency stop active ({})", id);
            }
            8 => {
                let now = current_timestamp();
                let active = registry.kernel.active_overrides(now);
                if active.is_empty() {
                    println!("No active overrides.");
                } else {
                    for record in &active {
                        println!(
                            "{} {:?} by {} ({})",
                            record.id, record.kind, record.operator_id, record.reason
                        );
                    }
                    let id = prompt("Override id to cancel (blank to skip): ");
                    if !id.is_empty() {
                        let operator = prompt("Operator id: ");
                        if registry.kernel.cancel_override(&id, &operator, now) {
                            println!("Cancelled.");
                        } else {
                            println!("Not found or already cancelled.");
                        }
                    }
                }
            }
            9 => {
                println!("Recent mode transitions:");
                for t in registry.kernel.transition_history(10) {
                    println!(
                        "  {:.0} {} -> {} ({}){}",
                        t.timestamp,
                        t.from,
                        t.to,
                        t.reason,
                        t.operator_id
                            .map(|op| format!(" by {}", op))
                            .unwrap_or_default()
                    );
                }
                println!("Recent overrides:");
                for o in registry.kernel.override_history(10) {
                    println!("  {} {:?} by {}", o.id, o.kind, o.operator_id);
                }
            }
            10 => {
                let action = prompt("start/stop/pause/resume/strategy: ").to_lowercase();
                match action.as_str() {
                    "start" => {
                        registry.agent.start(StrategyKind::RuleBased);
                    }
                    "stop" => registry.agent.stop().await,
                    "pause" => {
                        registry.agent.pause();
                    }
                    "resume" => {
                        registry.agent.resume();
                    }
                    "strategy" => {
                        let kind = prompt("RL / RULE_BASED / MANUAL: ").to_uppercase();
                        let kind = match kind.as_str() {
                            "RL" => Some(StrategyKind::Rl),
                            "RULE_BASED" => Some(StrategyKind::RuleBased),
                            "MANUAL" => Some(StrategyKind::Manual),
                            _ => None,
                        };
                        match kind {
                            Some(kind) => registry.agent.set_strategy(kind),
                            None => println!("Unknown strategy."),
                        }
                    }
                    other => println!("Unknown action: {}", other),
                }
                println!("Agent status: {}", registry.agent.status());
            }
            11 => {
                let plate = prompt("Number plate: ");
                let kind = prompt("Type (HIT_AND_RUN/ACCIDENT/STOLEN/VIP_TRACKING): ").to_uppercase();
                let incident_type = match kind.as_str() {
                    "ACCIDENT" => IncidentType::Accident,
                    "STOLEN" => IncidentType::Stolen,
                    "VIP_TRACKING" => IncidentType::VipTracking,
                    _ => IncidentType::HitAndRun,
                };
                let id = registry
                    .incidents
                    .report_incident(&plate, incident_type, current_timestamp());
                match registry.incidents.run_inference(&id, current_timestamp()) {
                    Ok(result) => {
                        println!("Incident {} -> {:?}", id, result.status);
                        for location in result.locations {
                            println!(
                                "  {} p={:.3} ({} hops)",
                                location.junction_id, location.probability, location.hops
                            );
                        }
                    }
                    Err(e) => println!("Inference failed: {}", e),
                }
            }
            12 => {
                let id = prompt("Incident id: ");
                match registry.incidents.get_inference_result(&id) {
                    Some(result) => {
                        println!("Status: {:?} (confidence {:.2})", result.status, result.confidence);
                        for location in result.locations {
                            println!("  {} p={:.3}", location.junction_id, location.probability);
                        }
                    }
                    None => println!("No result (unknown incident or not yet inferred)."),
                }
            }
            13 => {
                println!("Exiting.");
                break;
            }
            _ => println!("Invalid choice. Try again."),
        }
    }
}

fn show_status(registry: &Arc<ServiceRegistry>) {
    let now = current_timestamp();
    let metrics = {
        let tracker = registry.tracker.read().unwrap_or_else(|e| e.into_inner());
        tracker.get_city_metrics(now)
    };
    println!("Mode: {}", registry.kernel.current_mode());
    println!(
        "Agent: {} ({})",
        registry.agent.status(),
        registry.agent.current_strategy()
    );
    println!(
        "Vehicles: {}  Avg density: {:.1}  Congestion points: {}",
        metrics.total_vehicles, metrics.avg_density_score, metrics.congestion_points
    );
    if let Some(peak) = metrics.peak_density_road {
        println!("Peak road: {} ({:.1})", peak, metrics.peak_density_score);
    }
    let health = registry.watchdog.get_health_status();
    println!(
        "Watchdog: {} rounds, healthy={}",
        health.checks_run, health.healthy
    );
    let detection = registry.detection_logger.stats();
    println!(
        "Detections: {} logged, {} flushes, {} buffered",
        detection.total_detections, detection.total_flushes, detection.buffer_size
    );
    let summary = registry.agent.monitoring_summary();
    println!(
        "Agent ticks: {}  success rate: {:.2}  avg loop: {:.1}ms",
        summary.ticks, summary.action_success_rate, summary.avg_loop_latency_ms
    );
}
