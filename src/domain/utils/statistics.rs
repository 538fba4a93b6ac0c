use serde::Serialize;
use std::collections::HashMap;
use std::fs::File;
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::mpsc;
use std::thread;
use std::time::{SystemTime, UNIX_EPOCH};

/// Target of every `tracing` event carrying planning analytics.
pub const ANALYTICS_TARGET: &str = "reconf_planner::analytics";

/// Columns of the per-cycle statistics file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum StatParameter {
    /// Time in seconds since the collector was started.
    Time,

    /// Description why this entry was made
    LogDescription,

    /// Number of the control loop cycle
    Cycle,

    /// Control loop implementation ("reactive" or "periodic")
    LoopType,

    /// Number of independent partitions solved during the cycle
    Partitions,

    /// Final solve status of the cycle
    Status,

    /// Number of actions in the computed plan
    Actions,

    /// End time of the last action of the plan
    Makespan,

    /// Objective value (total action cost), if any
    Objective,

    /// Search nodes explored over all partitions
    ExploredNodes,

    /// Backtracks over all partitions
    Backtracks,

    /// Wall clock time spent in the solver, in ms
    SolvingTime,

    /// Number of VJobs waiting in the queue
    QueuedVJobs,

    /// Number of VJobs currently running
    RunningVJobs,

    /// Whether the plan was handed to the driver
    Executed,
}

impl StatParameter {
    pub const ALL: [StatParameter; 15] = [
        StatParameter::Time,
        StatParameter::LogDescription,
        StatParameter::Cycle,
        StatParameter::LoopType,
        StatParameter::Partitions,
        StatParameter::Status,
        StatParameter::Actions,
        StatParameter::Makespan,
        StatParameter::Objective,
        StatParameter::ExploredNodes,
        StatParameter::Backtracks,
        StatParameter::SolvingTime,
        StatParameter::QueuedVJobs,
        StatParameter::RunningVJobs,
        StatParameter::Executed,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            StatParameter::Time => "Time",
            StatParameter::LogDescription => "LogDescription",
            StatParameter::Cycle => "Cycle",
            StatParameter::LoopType => "LoopType",
            StatParameter::Partitions => "Partitions",
            StatParameter::Status => "Status",
            StatParameter::Actions => "Actions",
            StatParameter::Makespan => "Makespan",
            StatParameter::Objective => "Objective",
            StatParameter::ExploredNodes => "ExploredNodes",
            StatParameter::Backtracks => "Backtracks",
            StatParameter::SolvingTime => "SolvingTime",
            StatParameter::QueuedVJobs => "QueuedVJobs",
            StatParameter::RunningVJobs => "RunningVJobs",
            StatParameter::Executed => "Executed",
        }
    }

    /// Returns the defined order of columns for the CSV header
    pub fn headers() -> Vec<&'static str> {
        Self::ALL.iter().map(|param| param.name()).collect()
    }
}

/// store values in their native format, only format them when writing to the CSV.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(untagged)]
pub enum StatValue {
    Integer(i64),
    Float(f64),
    Text(String),
    Bool(bool),
}

impl StatValue {
    fn render(&self) -> String {
        match self {
            StatValue::Text(t) => t.clone(),
            StatValue::Integer(i) => i.to_string(),
            StatValue::Float(f) => f.to_string(),
            StatValue::Bool(b) => b.to_string(),
        }
    }
}

impl From<i64> for StatValue {
    fn from(v: i64) -> Self {
        StatValue::Integer(v)
    }
}

impl From<u64> for StatValue {
    fn from(v: u64) -> Self {
        StatValue::Integer(v as i64)
    }
}

impl From<usize> for StatValue {
    fn from(v: usize) -> Self {
        StatValue::Integer(v as i64)
    }
}

impl From<f64> for StatValue {
    fn from(v: f64) -> Self {
        StatValue::Float(v)
    }
}

impl From<String> for StatValue {
    fn from(v: String) -> Self {
        StatValue::Text(v)
    }
}

impl From<&str> for StatValue {
    fn from(v: &str) -> Self {
        StatValue::Text(v.to_string())
    }
}

impl From<bool> for StatValue {
    fn from(v: bool) -> Self {
        StatValue::Bool(v)
    }
}

#[derive(Debug, Clone, Default)]
pub struct StatisticEvent {
    data: HashMap<StatParameter, StatValue>,
}

impl StatisticEvent {
    pub fn new() -> Self {
        Self { data: HashMap::new() }
    }

    pub fn set<V: Into<StatValue>>(&mut self, param: StatParameter, value: V) -> &mut Self {
        self.data.insert(param, value.into());
        self
    }

    pub fn get(&self, param: StatParameter) -> Option<&StatValue> {
        self.data.get(&param)
    }

    /// One CSV row in header order. Missing columns are written as `NA`.
    pub fn to_row(&self) -> Vec<String> {
        StatParameter::ALL
            .iter()
            .map(|param| match self.data.get(param) {
                Some(value) => value.render(),
                None => "NA".to_string(),
            })
            .collect()
    }
}

/// Messages sent from the control loop to the writer thread.
enum StatsMessage {
    Log(StatisticEvent),
    Flush,
    Shutdown,
}

/// Handle used by the control loop to record one row per planning cycle.
/// Rows are written by a background thread so the loop never blocks on disk.
pub struct StatsCollector {
    sender: mpsc::Sender<StatsMessage>,
    start_time: u64,
    worker: Option<thread::JoinHandle<()>>,
}

impl StatsCollector {
    /// Spawns the writer thread. `None` writes to stdout.
    pub fn init(filename: Option<PathBuf>) -> io::Result<Self> {
        let writer: Box<dyn Write + Send> = match filename {
            Some(path) => Box::new(File::create(path)?),
            None => Box::new(io::stdout()),
        };

        let (tx, rx) = mpsc::channel();
        let start_time = Self::now_in_s();
        let worker = thread::spawn(move || Self::worker_loop(rx, writer));

        Ok(StatsCollector { sender: tx, start_time, worker: Some(worker) })
    }

    fn now_in_s() -> u64 {
        SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0)
    }

    fn worker_loop(rx: mpsc::Receiver<StatsMessage>, writer: Box<dyn Write + Send>) {
        let mut csv_wtr = csv::WriterBuilder::new().delimiter(b';').from_writer(writer);

        if let Err(e) = csv_wtr.write_record(StatParameter::headers()) {
            log::error!("Stats Error: Failed to write headers: {}", e);
        }

        for msg in rx {
            match msg {
                StatsMessage::Log(event) => {
                    if let Err(e) = csv_wtr.write_record(event.to_row()) {
                        log::error!("Stats Error: Failed to write record: {}", e);
                    }
                }
                StatsMessage::Flush => {
                    let _ = csv_wtr.flush();
                }
                StatsMessage::Shutdown => {
                    let _ = csv_wtr.flush();
                    break;
                }
            }
        }
    }

    /// Non-blocking. Adds the relative time column if the caller did not.
    pub fn add_event(&self, mut event: StatisticEvent) {
        if event.get(StatParameter::Time).is_none() {
            let relative = Self::now_in_s().saturating_sub(self.start_time);
            event.set(StatParameter::Time, relative);
        }

        // A dead writer thread must not take the control loop down with it.
        let _ = self.sender.send(StatsMessage::Log(event));
    }

    pub fn flush(&self) {
        let _ = self.sender.send(StatsMessage::Flush);
    }
}

impl Drop for StatsCollector {
    fn drop(&mut self) {
        let _ = self.sender.send(StatsMessage::Shutdown);
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_columns_are_rendered_as_na() {
        let mut event = StatisticEvent::new();
        event.set(StatParameter::Cycle, 3u64).set(StatParameter::Status, "Optimal");

        let row = event.to_row();
        assert_eq!(row.len(), StatParameter::headers().len());
        assert_eq!(row[2], "3");
        assert_eq!(row[5], "Optimal");
        assert_eq!(row[0], "NA");
    }

    #[test]
    fn collector_writes_header_and_rows_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stats.csv");

        {
            let collector = StatsCollector::init(Some(path.clone())).unwrap();
            let mut event = StatisticEvent::new();
            event.set(StatParameter::Cycle, 1u64).set(StatParameter::Executed, true);
            collector.add_event(event);
        }

        let content = std::fs::read_to_string(&path).unwrap();
        let mut lines = content.lines();
        assert!(lines.next().unwrap().starts_with("Time;LogDescription;Cycle"));
        let row = lines.next().unwrap();
        assert!(row.contains(";1;"));
        assert!(row.ends_with("true"));
    }
}
