use log::Level;

/// Where hooks send their human readable reports.
pub trait LogSink {
    fn log(&mut self, level: Level, message: &str);
}

/// Forwards every message to the `log` facade.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogCrateSink;

impl LogSink for LogCrateSink {
    fn log(&mut self, level: Level, message: &str) {
        log::log!(target: "machine_learning::hooks", level, "{message}");
    }
}

/// Keeps every message in memory, in arrival order.
#[derive(Debug, Default, Clone)]
pub struct RecordingSink {
    records: Vec<(Level, String)>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> &[(Level, String)] {
        &self.records
    }

    /// Returns every recorded message concatenated.
    pub fn text(&self) -> String {
        self.records.iter().map(|(_, msg)| msg.as_str()).collect()
    }

    pub fn clear(&mut self) {
        self.records.clear();
    }
}

impl LogSink for RecordingSink {
    fn log(&mut self, level: Level, message: &str) {
        self.records.push((level, message.to_string()));
    }
}
