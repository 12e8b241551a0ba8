// traffic_monitoring_main.rs
//
// Operator reporting CLI. Listens to the RabbitMQ queues published by
// the event bridge, logs every record to CSV, and renders reports from
// the persisted tables.

use std::collections::HashMap;
use std::error::Error;
use std::fs::{File, OpenOptions};
use std::io::{stdin, stdout, Write};
use std::path::Path;

use amiquip::{Connection, ConsumerMessage, ConsumerOptions, QueueDeclareOptions, Result as AmiquipResult};
use plotters::prelude::*;
use plotters::style::text_anchor::{HPos, Pos, VPos};
use serde::{Deserialize, Serialize};

use traffic_intelligence::current_timestamp;
use traffic_intelligence::global_variables::{
    AMQP_URL, QUEUE_PREDICTION_ALERTS, QUEUE_SIGNAL_CHANGES, QUEUE_SYSTEM_EVENTS,
};
use traffic_intelligence::persistence::tables::TrafficHistoryRow;

#[derive(Debug, Serialize, Deserialize)]
struct QueueRecord {
    timestamp: f64,
    raw_data: String,
}

#[tokio::main]
async fn main() {
    env_logger::init();
    println!("Traffic Monitoring System");

    // Queue listeners run in the background; each logs into its own CSV.
    tokio::spawn(async {
        if let Err(e) = listen_queue(QUEUE_SIGNAL_CHANGES, "signal_changes_log.csv").await {
            eprintln!("signal_changes listener ended: {}", e);
        }
    });
    tokio::spawn(async {
        if let Err(e) = listen_queue(QUEUE_PREDICTION_ALERTS, "prediction_alerts_log.csv").await {
            eprintln!("prediction_alerts listener ended: {}", e);
        }
    });
    tokio::spawn(async {
        if let Err(e) = listen_queue(QUEUE_SYSTEM_EVENTS, "system_events_log.csv").await {
            eprintln!("system_events listener ended: {}", e);
        }
    });

    run_cli().await;
}

// Consumes one queue and appends every delivery to a CSV log.
async fn listen_queue(queue_name: &'static str, log_file: &'static str) -> AmiquipResult<()> {
    tokio::task::spawn_blocking(move || -> AmiquipResult<()> {
        let mut connection = Connection::insecure_open(AMQP_URL)?;
        let channel = connection.open_channel(None)?;
        let queue = channel.queue_declare(queue_name, QueueDeclareOptions::default())?;
        let consumer = queue.consume(ConsumerOptions::default())?;
        for message in consumer.receiver() {
            match message {
                ConsumerMessage::Delivery(delivery) => {
                    if let Ok(json_str) = std::str::from_utf8(&delivery.body) {
                        let record = QueueRecord {
                            timestamp: current_timestamp(),
                            raw_data: json_str.to_string(),
                        };
                        if let Err(e) = log_to_csv(log_file, &record) {
                            eprintln!("Error logging {}: {}", queue_name, e);
                        }
                    }
                    consumer.ack(delivery)?;
                }
                other => {
                    println!("{} consumer ended: {:?}", queue_name, other);
                    break;
                }
            }
        }
        connection.close()
    })
    .await
    .unwrap_or(Ok(()))
}

// Generic helper to log a record to a CSV file.
fn log_to_csv<T: Serialize>(filename: &str, record: &T) -> Result<(), Box<dyn Error>> {
    let file_exists = Path::new(filename).exists();
    let file = OpenOptions::new()
        .append(true)
        .create(true)
        .open(filename)?;
    let mut wtr = csv::WriterBuilder::new()
        .has_headers(!file_exists)
        .from_writer(file);
    wtr.serialize(record)?;
    wtr.flush()?;
    Ok(())
}

fn count_csv_records(filename: &str) -> Result<usize, Box<dyn Error>> {
    let file = File::open(filename)?;
    let mut rdr = csv::Reader::from_reader(file);
    let count = rdr.records().filter_map(Result::ok).count();
    Ok(count)
}

fn show_queue_log(filename: &str, title: &str) -> Result<(), Box<dyn Error>> {
    let file = File::open(filename)?;
    let mut rdr = csv::Reader::from_reader(file);
    println!("{}:", title);
    for result in rdr.deserialize() {
        let record: QueueRecord = result?;
        println!("[{:.0}] {}", record.timestamp, record.raw_data);
    }
    Ok(())
}

fn generate_report_summary() -> Result<(), Box<dyn Error>> {
    println!("Report Summary:");
    for (file, label) in [
        ("signal_changes_log.csv", "Signal changes"),
        ("prediction_alerts_log.csv", "Prediction alerts"),
        ("system_events_log.csv", "System events"),
        ("data/detection_records.csv", "Detection records"),
        ("data/traffic_history.csv", "Traffic history samples"),
        ("data/agent_logs.csv", "Agent log rows"),
    ] {
        match count_csv_records(file) {
            Ok(count) => println!("{}: {} records", label, count),
            Err(_) => println!("{}: no data", label),
        }
    }
    Ok(())
}

fn read_traffic_history(path: &str) -> Result<Vec<TrafficHistoryRow>, Box<dyn Error>> {
    let mut rdr = csv::Reader::from_path(path)?;
    Ok(rdr.deserialize().filter_map(Result::ok).collect())
}

// Helper to parse a road id of the form "R-<from>-<to>" to its origin
// junction index (1..=9 on the default grid).
fn parse_origin_junction(road_id: &str) -> Option<usize> {
    let mut parts = road_id.split('-');
    if parts.next() != Some("R") {
        return None;
    }
    parts.next()?.parse::<usize>().ok()
}

// 3x3 junction heatmap of average density, from traffic_history.
fn show_congestion_heatmap() -> Result<(), Box<dyn Error>> {
    let rows = read_traffic_history("data/traffic_history.csv")?;
    let mut by_junction: HashMap<usize, Vec<f64>> = HashMap::new();
    for row in &rows {
        if let (Some(origin), Some(score)) = (parse_origin_junction(&row.road_id), row.density_score)
        {
            by_junction.entry(origin).or_default().push(score);
        }
    }

    let avg: HashMap<usize, f64> = by_junction
        .into_iter()
        .map(|(j, scores)| {
            let mean = scores.iter().sum::<f64>() / scores.len() as f64;
            (j, mean)
        })
        .collect();

    let (grid_rows, grid_cols) = (3, 3);
    let (cell_width, cell_height) = (120, 120);
    let (image_width, image_height) = (grid_cols * cell_width, grid_rows * cell_height);

    let backend = BitMapBackend::new(
        "congestion_heatmap.png",
        (image_width as u32, image_height as u32),
    );
    let root = backend.into_drawing_area();
    root.fill(&WHITE)?;

    for row in 0..grid_rows {
        for col in 0..grid_cols {
            let junction = row * grid_cols + col + 1;
            let density = avg.get(&junction).copied().unwrap_or(0.0);
            let green_blue = (255.0 * (1.0 - density / 100.0)).round() as u8;
            let fill_color = RGBColor(255, green_blue, green_blue);

            let x0 = (col * cell_width) as i32;
            let y0 = (row * cell_height) as i32;
            let x1 = x0 + cell_width as i32;
            let y1 = y0 + cell_height as i32;
            root.draw(&Rectangle::new([(x0, y0), (x1, y1)], fill_color.filled()))?;
            root.draw(&Rectangle::new([(x0, y0), (x1, y1)], &BLACK))?;

            let text = format!("J-{}\n{:.1}", junction, density);
            root.draw(&Text::new(
                text,
                (x0 + cell_width as i32 / 2, y0 + cell_height as i32 / 2),
                TextStyle::from(("sans-serif", 16).into_font())
                    .color(&BLACK)
                    .pos(Pos::new(HPos::Center, VPos::Center)),
            ))?;
        }
    }

    root.present()?;
    println!("Congestion heatmap saved to congestion_heatmap.png");
    Ok(())
}

// Density over time scatterplot from traffic_history.
fn show_density_scatterplot() -> Result<(), Box<dyn Error>> {
    let rows = read_traffic_history("data/traffic_history.csv")?;
    let points: Vec<(f64, f64)> = rows
        .iter()
        .filter_map(|row| row.density_score.map(|score| (row.timestamp, score)))
        .collect();
    if points.is_empty() {
        println!("No traffic history data available.");
        return Ok(());
    }

    let min_ts = points.iter().map(|p| p.0).fold(f64::INFINITY, f64::min);
    let max_ts = points.iter().map(|p| p.0).fold(f64::NEG_INFINITY, f64::max);

    let backend = BitMapBackend::new("density_scatterplot.png", (800, 600));
    let root = backend.into_drawing_area();
    root.fill(&WHITE)?;

    let mut chart = ChartBuilder::on(&root)
        .caption("Road Density Over Time", ("sans-serif", 20))
        .margin(40)
        .x_label_area_size(40)
        .y_label_area_size(40)
        .build_cartesian_2d(min_ts..max_ts.max(min_ts + 1.0), 0.0..100.0)?;

    chart.configure_mesh().draw()?;
    chart.draw_series(
        points
            .iter()
            .map(|&(ts, score)| Circle::new((ts, score), 3, RED.filled())),
    )?;

    root.present()?;
    println!("Density scatterplot saved to density_scatterplot.png");
    Ok(())
}

fn prompt(label: &str) -> String {
    print!("{}", label);
    stdout().flush().unwrap_or(());
    let mut input = String::new();
    stdin().read_line(&mut input).unwrap_or(0);
    input.trim().to_string()
}

async fn run_cli() {
    loop {
        println!("\nTraffic Monitoring Admin CLI");
        println!("1. Display signal changes");
        println!("2. Display prediction alerts");
        println!("3. Display system events");
        println!("4. Generate report summary");
        println!("5. Congestion heatmap");
        println!("6. Density scatterplot");
        println!("7. Exit");

        match prompt("Enter your choice: ").parse::<u32>().unwrap_or(0) {
            1 => {
                if let Err(e) = show_queue_log("signal_changes_log.csv", "Signal Changes") {
                    eprintln!("Error displaying signal changes: {}", e);
                }
            }
            2 => {
                if let Err(e) = show_queue_log("prediction_alerts_log.csv", "Prediction Alerts") {
                    eprintln!("Error displaying alerts: {}", e);
                }
            }
            3 => {
                if let Err(e) = show_queue_log("system_events_log.csv", "System Events") {
                    eprintln!("Error displaying system events: {}", e);
                }
            }
            4 => {
                if let Err(e) = generate_report_summary() {
                    eprintln!("Error generating summary: {}", e);
                }
            }
            5 => {
                if let Err(e) = show_congestion_heatmap() {
                    eprintln!("Error generating heatmap: {}", e);
                }
            }
            6 => {
                if let Err(e) = show_density_scatterplot() {
                    eprintln!("Error generating scatterplot: {}", e);
                }
            }
            7 => {
                println!("Exiting CLI.");
                break;
            }
            _ => println!("Invalid choice. Try again."),
        }
    }
}
