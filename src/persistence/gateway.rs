// gateway.rs
//
// Batch writers for the persisted tables. All disk I/O happens on one
// dedicated worker thread draining a crossbeam channel, so control-plane
// tasks never block on the filesystem. Persistence is best-effort: write
// failures are reported back to callers that asked for an ack and logged
// otherwise.

use std::error::Error;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::thread::JoinHandle;

use crossbeam_channel::{bounded, unbounded, Receiver, Sender};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::persistence::tables::{
    AgentLogRow, DetectionRow, SystemEventRow, TrafficHistoryRow,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableKind {
    Detections,
    AgentLogs,
    SystemEvents,
    TrafficHistory,
    Quarantine,
}

impl TableKind {
    pub fn file_name(&self) -> &'static str {
        match self {
            TableKind::Detections => "detection_records.csv",
            TableKind::AgentLogs => "agent_logs.csv",
            TableKind::SystemEvents => "system_events.csv",
            TableKind::TrafficHistory => "traffic_history.csv",
            TableKind::Quarantine => "quarantine.csv",
        }
    }
}

enum GatewayCommand {
    InsertDetections {
        rows: Vec<DetectionRow>,
        ack: Option<Sender<Result<usize, String>>>,
    },
    InsertAgentLog(AgentLogRow),
    InsertSystemEvent(SystemEventRow),
    InsertTrafficHistory(Vec<TrafficHistoryRow>),
    Quarantine(Vec<DetectionRow>),
    PurgeDetections {
        cutoff: f64,
        ack: Option<Sender<Result<usize, String>>>,
    },
    PurgeTrafficHistory {
        cutoff: f64,
    },
    Shutdown {
        ack: Sender<()>,
    },
}

/// Handle to the persistence worker.
pub struct PersistenceGateway {
    tx: Sender<GatewayCommand>,
    data_dir: PathBuf,
    worker: Mutex<Option<JoinHandle<()>>>,
    rows_written: AtomicU64,
    write_errors: AtomicU64,
}

impl PersistenceGateway {
    pub fn new(data_dir: &Path) -> std::io::Result<Self> {
        std::fs::create_dir_all(data_dir)?;
        let (tx, rx) = unbounded();
        let dir = data_dir.to_path_buf();
        let worker = std::thread::Builder::new()
            .name("persistence-gateway".to_string())
            .spawn(move || worker_loop(rx, dir))?;

        log::info!("Persistence gateway writing to {}", data_dir.display());
        Ok(Self {
            tx,
            data_dir: data_dir.to_path_buf(),
            worker: Mutex::new(Some(worker)),
            rows_written: AtomicU64::new(0),
            write_errors: AtomicU64::new(0),
        })
    }

    pub fn table_path(&self, table: TableKind) -> PathBuf {
        self.data_dir.join(table.file_name())
    }

    /// Batch-inserts detections and waits for the write result, so the
    /// caller can requeue the batch on failure. Call off the async
    /// runtime (`spawn_blocking`).
    pub fn insert_detections_blocking(&self, rows: Vec<DetectionRow>) -> Result<usize, String> {
        let count = rows.len();
        let (ack_tx, ack_rx) = bounded(1);
        self.tx
            .send(GatewayCommand::InsertDetections {
                rows,
                ack: Some(ack_tx),
            })
            .map_err(|_| "persistence worker gone".to_string())?;
        let result = ack_rx
            .recv()
            .map_err(|_| "persistence worker dropped ack".to_string())?;
        match &result {
            Ok(_) => {
                self.rows_written.fetch_add(count as u64, Ordering::Relaxed);
            }
            Err(_) => {
                self.write_errors.fetch_add(1, Ordering::Relaxed);
            }
        }
        result
    }

    pub fn insert_agent_log(&self, row: AgentLogRow) {
        self.send_fire_and_forget(GatewayCommand::InsertAgentLog(row));
    }

    pub fn insert_system_event(&self, row: SystemEventRow) {
        self.send_fire_and_forget(GatewayCommand::InsertSystemEvent(row));
    }

    pub fn insert_traffic_history(&self, rows: Vec<TrafficHistoryRow>) {
        self.send_fire_and_forget(GatewayCommand::InsertTrafficHistory(rows));
    }

    /// Parks persistently-failing detection rows in a side file.
    pub fn quarantine_detections(&self, rows: Vec<DetectionRow>) {
        self.send_fire_and_forget(GatewayCommand::Quarantine(rows));
    }

    /// Deletes persisted detections older than `cutoff`; returns the
    /// number of removed rows.
    pub fn purge_detections_blocking(&self, cutoff: f64) -> Result<usize, String> {
        let (ack_tx, ack_rx) = bounded(1);
        self.tx
            .send(GatewayCommand::PurgeDetections {
                cutoff,
                ack: Some(ack_tx),
            })
            .map_err(|_| "persistence worker gone".to_string())?;
        ack_rx
            .recv()
            .map_err(|_| "persistence worker dropped ack".to_string())?
    }

    pub fn purge_traffic_history(&self, cutoff: f64) {
        self.send_fire_and_forget(GatewayCommand::PurgeTrafficHistory { cutoff });
    }

    fn send_fire_and_forget(&self, command: GatewayCommand) {
        if self.tx.send(command).is_err() {
            log::error!("Persistence worker is gone; dropping write");
            self.write_errors.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Detections for a plate within [from, to], chronological. Reads the
    /// table directly; rows that fail to parse are skipped.
    pub fn query_detections_by_plate(
        &self,
        number_plate: &str,
        from: f64,
        to: f64,
    ) -> Result<Vec<DetectionRow>, Box<dyn Error>> {
        let path = self.table_path(TableKind::Detections);
        if !path.exists() {
            return Ok(Vec::new());
        }
        let mut reader = csv::Reader::from_reader(File::open(&path)?);
        let mut rows: Vec<DetectionRow> = reader
            .deserialize()
            .filter_map(Result::ok)
            .filter(|row: &DetectionRow| {
                row.number_plate == number_plate && row.timestamp >= from && row.timestamp <= to
            })
            .collect();
        rows.sort_by(|a, b| a.timestamp.partial_cmp(&b.timestamp).unwrap_or(std::cmp::Ordering::Equal));
        Ok(rows)
    }

    /// Detections at a junction within [from, to], chronological.
    pub fn query_detections_by_junction(
        &self,
        junction_id: &str,
        from: f64,
        to: f64,
    ) -> Result<Vec<DetectionRow>, Box<dyn Error>> {
        let path = self.table_path(TableKind::Detections);
        if !path.exists() {
            return Ok(Vec::new());
        }
        let mut reader = csv::Reader::from_reader(File::open(&path)?);
        let mut rows: Vec<DetectionRow> = reader
            .deserialize()
            .filter_map(Result::ok)
            .filter(|row: &DetectionRow| {
                row.junction_id == junction_id && row.timestamp >= from && row.timestamp <= to
            })
            .collect();
        rows.sort_by(|a, b| a.timestamp.partial_cmp(&b.timestamp).unwrap_or(std::cmp::Ordering::Equal));
        Ok(rows)
    }

    pub fn rows_written(&self) -> u64 {
        self.rows_written.load(Ordering::Relaxed)
    }

    pub fn write_errors(&self) -> u64 {
        self.write_errors.load(Ordering::Relaxed)
    }

    /// Drains pending writes and joins the worker thread.
    pub fn flush_and_stop(&self) {
        let (ack_tx, ack_rx) = bounded(1);
        if self.tx.send(GatewayCommand::Shutdown { ack: ack_tx }).is_ok() {
            let _ = ack_rx.recv();
        }
        if let Some(handle) = self.worker.lock().unwrap_or_else(|e| e.into_inner()).take() {
            let _ = handle.join();
        }
    }
}

fn worker_loop(rx: Receiver<GatewayCommand>, data_dir: PathBuf) {
    let path_for = |table: TableKind| data_dir.join(table.file_name());

    while let Ok(command) = rx.recv() {
        match command {
            GatewayCommand::InsertDetections { rows, ack } => {
                let count = rows.len();
                let result = append_rows(&path_for(TableKind::Detections), &rows);
                match (ack, result) {
                    (Some(ack), result) => {
                        let _ = ack.send(result.map(|_| count));
                    }
                    (None, Err(e)) => log::error!("Detection write failed: {}", e),
                    (None, Ok(())) => {}
                }
            }
            GatewayCommand::InsertAgentLog(row) => {
                if let Err(e) = append_rows(&path_for(TableKind::AgentLogs), &[row]) {
                    log::error!("Agent log write failed: {}", e);
                }
            }
            GatewayCommand::InsertSystemEvent(row) => {
                if let Err(e) = append_rows(&path_for(TableKind::SystemEvents), &[row]) {
                    log::error!("System event write failed: {}", e);
                }
            }
            GatewayCommand::InsertTrafficHistory(rows) => {
                if let Err(e) = append_rows(&path_for(TableKind::TrafficHistory), &rows) {
                    log::error!("Traffic history write failed: {}", e);
                }
            }
            GatewayCommand::Quarantine(rows) => {
                if let Err(e) = append_rows(&path_for(TableKind::Quarantine), &rows) {
                    log::error!("Quarantine write failed: {}", e);
                }
            }
            GatewayCommand::PurgeDetections { cutoff, ack } => {
                let result = purge_csv::<DetectionRow>(&path_for(TableKind::Detections), |row| {
                    row.timestamp >= cutoff
                });
                match &result {
                    Ok(removed) if *removed > 0 => {
                        log::info!("Purged {} detection rows older than cutoff", removed)
                    }
                    Ok(_) => {}
                    Err(e) => log::error!("Detection purge failed: {}", e),
                }
                if let Some(ack) = ack {
                    let _ = ack.send(result);
                }
            }
            GatewayCommand::PurgeTrafficHistory { cutoff } => {
                if let Err(e) = purge_csv::<TrafficHistoryRow>(
                    &path_for(TableKind::TrafficHistory),
                    |row| row.timestamp >= cutoff,
                ) {
                    log::error!("Traffic history purge failed: {}", e);
                }
            }
            GatewayCommand::Shutdown { ack } => {
                let _ = ack.send(());
                break;
            }
        }
    }
}

/// Appends serialized rows, writing headers only when the file is new.
fn append_rows<T: Serialize>(path: &Path, rows: &[T]) -> Result<(), String> {
    if rows.is_empty() {
        return Ok(());
    }
    let file_exists = path.exists();
    let file = OpenOptions::new()
        .append(true)
        .create(true)
        .open(path)
        .map_err(|e| e.to_string())?;
    let mut writer = csv::WriterBuilder::new()
        .has_headers(!file_exists)
        .from_writer(file);
    for row in rows {
        writer.serialize(row).map_err(|e| e.to_string())?;
    }
    writer.flush().map_err(|e| e.to_string())
}

/// Rewrites the file keeping only rows for which `keep` is true; returns
/// the number of removed rows.
fn purge_csv<T: Serialize + DeserializeOwned>(
    path: &Path,
    keep: impl Fn(&T) -> bool,
) -> Result<usize, String> {
    if !path.exists() {
        return Ok(0);
    }
    let mut reader = csv::Reader::from_reader(File::open(path).map_err(|e| e.to_string())?);
    let rows: Vec<T> = reader.deserialize().filter_map(Result::ok).collect();
    let total = rows.len();
    let kept: Vec<T> = rows.into_iter().filter(|r| keep(r)).collect();
    let removed = total - kept.len();
    if removed == 0 {
        return Ok(0);
    }

    let tmp_path = path.with_extension("csv.tmp");
    {
        let file = File::create(&tmp_path).map_err(|e| e.to_string())?;
        let mut writer = csv::WriterBuilder::new().has_headers(true).from_writer(file);
        for row in &kept {
            writer.serialize(row).map_err(|e| e.to_string())?;
        }
        writer.flush().map_err(|e| e.to_string())?;
    }
    std::fs::rename(&tmp_path, path).map_err(|e| e.to_string())?;
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::tables::created_at_stamp;

    fn detection(id: &str, plate: &str, junction: &str, ts: f64) -> DetectionRow {
        DetectionRow {
            id: id.to_string(),
            vehicle_id: format!("v-{}", id),
            number_plate: plate.to_string(),
            junction_id: junction.to_string(),
            timestamp: ts,
            direction: "E".to_string(),
            incoming_road: Some("R-4-5".to_string()),
            outgoing_road: None,
            speed: 42.0,
            position_x: 1.0,
            position_y: 2.0,
            vehicle_type: "CAR".to_string(),
            violation_detected: false,
            created_at: created_at_stamp(),
        }
    }

    fn temp_dir(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "ti-gateway-{}-{}",
            tag,
            std::process::id()
        ));
        let _ = std::fs::remove_dir_all(&dir);
        dir
    }

    #[test]
    fn insert_and_query_round_trip() {
        let dir = temp_dir("insert");
        let gateway = PersistenceGateway::new(&dir).unwrap();

        gateway
            .insert_detections_blocking(vec![
                detection("a", "KA-01", "J-5", 100.0),
                detection("b", "KA-01", "J-6", 200.0),
                detection("c", "KA-02", "J-5", 150.0),
            ])
            .unwrap();

        let rows = gateway.query_detections_by_plate("KA-01", 0.0, 300.0).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].junction_id, "J-5");
        assert_eq!(rows[1].junction_id, "J-6");
        assert_eq!(rows[0].incoming_road.as_deref(), Some("R-4-5"));
        assert_eq!(rows[0].outgoing_road, None);

        let at_junction = gateway.query_detections_by_junction("J-5", 0.0, 300.0).unwrap();
        assert_eq!(at_junction.len(), 2);

        gateway.flush_and_stop();
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn purge_removes_expired_rows() {
        let dir = temp_dir("purge");
        let gateway = PersistenceGateway::new(&dir).unwrap();

        gateway
            .insert_detections_blocking(vec![
                detection("old", "KA-09", "J-1", 10.0),
                detection("new", "KA-09", "J-1", 500.0),
            ])
            .unwrap();

        let removed = gateway.purge_detections_blocking(100.0).unwrap();
        assert_eq!(removed, 1);
        let rows = gateway.query_detections_by_plate("KA-09", 0.0, 1000.0).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].id, "new");

        gateway.flush_and_stop();
        let _ = std::fs::remove_dir_all(&dir);
    }
}
