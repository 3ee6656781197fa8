//! Event log - writes notification events to file
//!
//! Events are written in JSONL format (one JSON object per line).

use crate::io::events::NotificationEvent;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;
use tokio::sync::mpsc;
use tracing::{debug, error, info};

pub struct EventLog {
    file_path: String,
}

impl EventLog {
    pub fn new(file_path: &str) -> Self {
        info!(file_path = %file_path, "event_log_initialized");
        Self { file_path: file_path.to_string() }
    }

    /// Append one event. Returns true if successful.
    pub fn write_event(&self, event: &NotificationEvent) -> bool {
        let json = match serde_json::to_string(event) {
            Ok(json) => json,
            Err(e) => {
                error!(event = %event.name(), error = %e, "event_serialize_failed");
                return false;
            }
        };

        match self.append_line(&json) {
            Ok(()) => true,
            Err(e) => {
                error!(event = %event.name(), error = %e, "event_write_failed");
                false
            }
        }
    }

    fn append_line(&self, line: &str) -> std::io::Result<()> {
        let path = Path::new(&self.file_path);

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let mut file = OpenOptions::new().create(true).append(true).open(path)?;
        writeln!(file, "{}", line)?;
        debug!(file = %self.file_path, bytes = %line.len(), "event_written");

        Ok(())
    }

    /// Drain the channel until every sender is dropped. Returns events written.
    pub async fn run(self, mut rx: mpsc::Receiver<NotificationEvent>) -> usize {
        let mut written = 0;
        while let Some(event) = rx.recv().await {
            if self.write_event(&event) {
                written += 1;
            }
        }
        info!(file_path = %self.file_path, written = %written, "event_log_closed");
        written
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::tracking::{AlertType, DeviationSeverity};
    use crate::domain::types::RideId;
    use crate::io::events::{create_event_channel, Audience, SafetyAlertPayload};
    use std::fs;
    use tempfile::tempdir;

    fn speed_alert(msg: &str) -> NotificationEvent {
        NotificationEvent::SpeedAlert(SafetyAlertPayload::new(
            Audience::Driver,
            None,
            RideId::from("ride-7"),
            AlertType::Speed,
            DeviationSeverity::Medium,
            msg.to_string(),
        ))
    }

    #[test]
    fn test_write_event() {
        let dir = tempdir().unwrap();
        let file_path = dir.path().join("events.jsonl");
        let log = EventLog::new(file_path.to_str().unwrap());

        assert!(log.write_event(&speed_alert("fast")));

        let content = fs::read_to_string(&file_path).unwrap();
        assert!(content.ends_with('\n'));
        let parsed: serde_json::Value = serde_json::from_str(content.trim()).unwrap();
        assert_eq!(parsed["type"], "speed_alert");
        assert_eq!(parsed["ride_id"], "ride-7");
        assert_eq!(parsed["message"], "fast");
    }

    #[test]
    fn test_creates_parent_directories_and_appends() {
        let dir = tempdir().unwrap();
        let nested = dir.path().join("nested").join("events.jsonl");
        fs::create_dir_all(nested.parent().unwrap()).unwrap();
        fs::write(&nested, "{\"existing\":true}\n").unwrap();

        let log = EventLog::new(nested.to_str().unwrap());
        assert!(log.write_event(&speed_alert("a")));

        let content = fs::read_to_string(&nested).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("existing"));
    }

    #[tokio::test]
    async fn test_run_drains_channel() {
        let dir = tempdir().unwrap();
        let file_path = dir.path().join("deep").join("events.jsonl");
        let log = EventLog::new(file_path.to_str().unwrap());

        let (tx, rx) = create_event_channel(8, "svc".to_string());
        for i in 0..3 {
            assert!(tx.send(speed_alert(&format!("alert {i}"))));
        }
        drop(tx);

        let written = log.run(rx).await;
        assert_eq!(written, 3);
        let content = fs::read_to_string(&file_path).unwrap();
        assert_eq!(content.lines().count(), 3);
        for line in content.lines() {
            let parsed: serde_json::Value = serde_json::from_str(line).unwrap();
            assert_eq!(parsed["service"], "svc");
        }
    }
}
