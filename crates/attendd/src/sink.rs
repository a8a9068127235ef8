//! Durable attendance sinks: CSV files and SQLite.

use crate::config::{Config, SinkKind};
use attend_core::{AttendanceEvent, AttendanceSink, SinkError};
use rusqlite::{params, Connection};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

/// Column layout of a [`CsvSink`] file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CsvLayout {
    /// `Name,Date,Time,Status`
    Spreadsheet,
    /// `Name,Timestamp`
    PlainLog,
}

impl CsvLayout {
    fn header(self) -> &'static str {
        match self {
            CsvLayout::Spreadsheet => "Name,Date,Time,Status",
            CsvLayout::PlainLog => "Name,Timestamp",
        }
    }

    fn row(self, event: &AttendanceEvent) -> String {
        match self {
            CsvLayout::Spreadsheet => [
                csv_field(&event.name),
                csv_field(&event.date),
                csv_field(&event.time),
                csv_field(&event.status.to_string()),
            ]
            .join(","),
            CsvLayout::PlainLog => {
                format!("{},{}", csv_field(&event.name), csv_field(&event.timestamp()))
            }
        }
    }
}

/// Quote a field when it contains a delimiter, quote or line break.
fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

/// Append-only CSV file.
///
/// The file is opened, appended and closed for every event so external
/// readers always see complete rows. The header is written once, when the
/// file is empty.
#[derive(Debug)]
pub struct CsvSink {
    path: PathBuf,
    layout: CsvLayout,
}

impl CsvSink {
    pub fn new(path: impl Into<PathBuf>, layout: CsvLayout) -> Self {
        Self {
            path: path.into(),
            layout,
        }
    }
}

impl AttendanceSink for CsvSink {
    fn append(&mut self, event: &AttendanceEvent) -> Result<(), SinkError> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;

        let mut buf = String::new();
        if file.metadata()?.len() == 0 {
            buf.push_str(self.layout.header());
            buf.push('\n');
        }
        buf.push_str(&self.layout.row(event));
        buf.push('\n');

        file.write_all(buf.as_bytes())?;
        file.flush()?;
        Ok(())
    }
}

/// `attendance` table in a SQLite database.
pub struct SqliteSink {
    conn: Connection,
}

impl SqliteSink {
    pub fn open(path: &Path) -> Result<Self, SinkError> {
        let conn = Connection::open(path).map_err(store_error)?;
        let sink = Self { conn };
        sink.ensure_schema()?;
        tracing::info!(path = %path.display(), "attendance database opened");
        Ok(sink)
    }

    #[cfg(test)]
    pub fn in_memory() -> Result<Self, SinkError> {
        let sink = Self {
            conn: Connection::open_in_memory().map_err(store_error)?,
        };
        sink.ensure_schema()?;
        Ok(sink)
    }

    fn ensure_schema(&self) -> Result<(), SinkError> {
        self.conn
            .execute_batch(
                r#"
                CREATE TABLE IF NOT EXISTS attendance (
                  id INTEGER PRIMARY KEY AUTOINCREMENT,
                  name TEXT NOT NULL,
                  date TEXT NOT NULL,
                  time TEXT NOT NULL,
                  status TEXT NOT NULL
                );

                CREATE INDEX IF NOT EXISTS idx_attendance_date ON attendance(date);
                "#,
            )
            .map_err(store_error)
    }

    /// Rows for one `YYYY-MM-DD` day, oldest first.
    #[cfg(test)]
    pub fn events_on(&self, date: &str) -> Result<Vec<(String, String, String)>, SinkError> {
        let mut stmt = self
            .conn
            .prepare("SELECT name, time, status FROM attendance WHERE date = ?1 ORDER BY id")
            .map_err(store_error)?;
        let rows = stmt
            .query_map(params![date], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))
            .map_err(store_error)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(store_error)
    }
}

impl AttendanceSink for SqliteSink {
    fn append(&mut self, event: &AttendanceEvent) -> Result<(), SinkError> {
        self.conn
            .execute(
                "INSERT INTO attendance (name, date, time, status) VALUES (?1, ?2, ?3, ?4)",
                params![event.name, event.date, event.time, event.status.to_string()],
            )
            .map_err(store_error)?;
        Ok(())
    }
}

fn store_error(e: rusqlite::Error) -> SinkError {
    SinkError::Store(e.to_string())
}

/// Build the sink named by the configuration.
pub fn open_sink(config: &Config) -> Result<Box<dyn AttendanceSink + Send>, SinkError> {
    let path = &config.sink_path;
    Ok(match config.sink {
        SinkKind::Spreadsheet => Box::new(CsvSink::new(path, CsvLayout::Spreadsheet)),
        SinkKind::Log => Box::new(CsvSink::new(path, CsvLayout::PlainLog)),
        SinkKind::Sqlite => Box::new(SqliteSink::open(path)?),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Local, TimeZone};

    fn event(name: &str) -> AttendanceEvent {
        let at = Local.with_ymd_and_hms(2024, 3, 5, 9, 15, 2).unwrap();
        AttendanceEvent::present(name, at)
    }

    #[test]
    fn test_spreadsheet_header_written_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("attendance.csv");
        let mut sink = CsvSink::new(&path, CsvLayout::Spreadsheet);
        sink.append(&event("Alice")).unwrap();
        sink.append(&event("Bob")).unwrap();

        // A fresh handle on the same file must not repeat the header.
        let mut again = CsvSink::new(&path, CsvLayout::Spreadsheet);
        again.append(&event("Alice")).unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(
            contents,
            "Name,Date,Time,Status\n\
             Alice,2024-03-05,09:15:02,Present\n\
             Bob,2024-03-05,09:15:02,Present\n\
             Alice,2024-03-05,09:15:02,Present\n"
        );
    }

    #[test]
    fn test_plain_log_layout() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log.csv");
        let mut sink = CsvSink::new(&path, CsvLayout::PlainLog);
        sink.append(&event("Alice")).unwrap();
        assert_eq!(
            std::fs::read_to_string(&path).unwrap(),
            "Name,Timestamp\nAlice,2024-03-05 09:15:02\n"
        );
    }

    #[test]
    fn test_fields_are_quoted() {
        assert_eq!(csv_field("Alice"), "Alice");
        assert_eq!(csv_field("Smith, Jane"), "\"Smith, Jane\"");
        assert_eq!(csv_field("The \"Boss\""), "\"The \"\"Boss\"\"\"");
    }

    #[test]
    fn test_unwritable_path_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut sink = CsvSink::new(dir.path().join("no/such/dir/log.csv"), CsvLayout::PlainLog);
        assert!(matches!(sink.append(&event("Alice")), Err(SinkError::Io(_))));
    }

    #[test]
    fn test_sqlite_append_and_query() {
        let mut sink = SqliteSink::in_memory().unwrap();
        sink.append(&event("Alice")).unwrap();
        sink.append(&event("Bob")).unwrap();

        let rows = sink.events_on("2024-03-05").unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0], ("Alice".into(), "09:15:02".into(), "Present".into()));
        assert!(sink.events_on("2024-03-06").unwrap().is_empty());
    }

    #[test]
    fn test_sqlite_reopen_keeps_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("attendance.db");
        SqliteSink::open(&path).unwrap().append(&event("Alice")).unwrap();
        let sink = SqliteSink::open(&path).unwrap();
        assert_eq!(sink.events_on("2024-03-05").unwrap().len(), 1);
    }

    #[test]
    fn test_open_sink_by_kind() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config {
            sink: SinkKind::Log,
            sink_path: dir.path().join("attendance.csv"),
            ..Config::default()
        };
        let mut sink = open_sink(&config).unwrap();
        sink.append(&event("Alice")).unwrap();
        assert!(config.sink_path.exists());
    }
}
