use chrono::{DateTime, Utc};
use exectrace_common::{record::ExecRecord, Segments};
use serde::Serialize;
use tracing::info;

/// One decoded execution, as reported to the user.
#[derive(Debug, Clone, Serialize)]
pub struct ExecLine {
    pub timestamp: DateTime<Utc>,
    pub pid: u32,
    pub ppid: u32,
    pub comm: String,
    pub executable: String,
    // None when the segment is not captured
    #[serde(skip_serializing_if = "Option::is_none")]
    pub argv: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cwd: Option<String>,
}

impl ExecLine {
    pub fn new(record: &ExecRecord<'_>, segments: Segments, timestamp: DateTime<Utc>) -> Self {
        let header = record.header();
        Self {
            timestamp,
            pid: header.pid,
            ppid: header.ppid,
            comm: record.comm(),
            executable: record.executable(segments),
            argv: segments.contains(Segments::ARGV).then(|| record.argv()),
            cwd: segments.contains(Segments::CWD).then(|| record.cwd()),
        }
    }

    pub fn to_json(&self) -> anyhow::Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn log(&self) {
        info!(
            pid = self.pid,
            ppid = self.ppid,
            comm = %self.comm,
            executable = %self.executable,
            argv = %self.argv.as_deref().map(|a| a.join(" ")).unwrap_or_default(),
            cwd = %self.cwd.as_deref().unwrap_or_default(),
            "Process execution captured"
        );
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use chrono::TimeZone;
    use exectrace_common::EventHeader;

    fn record_bytes() -> Vec<u8> {
        let mut header = EventHeader {
            pid: 4242,
            ppid: 1,
            argv_size: 12,
            path_size: 11,
            cwd_size: 10,
            ..Default::default()
        };
        header.comm[..4].copy_from_slice(b"make");

        let mut out = bytemuck::bytes_of(&header).to_vec();
        out.extend_from_slice(b"make\0-j\0all\0");
        out.extend_from_slice(b"./make.sh\0\0");
        out.extend_from_slice(b"proj\0home\0");
        out
    }

    fn at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn all_segments() {
        let data = record_bytes();
        let record = ExecRecord::parse(&data).unwrap();
        let line = ExecLine::new(&record, Segments::ALL, at());

        assert_eq!(line.pid, 4242);
        assert_eq!(line.comm, "make");
        assert_eq!(line.executable, "/home/proj/./make.sh");
        assert_eq!(line.argv, Some(vec!["make".into(), "-j".into(), "all".into()]));
        assert_eq!(line.cwd.as_deref(), Some("/home/proj"));
    }

    #[test]
    fn json_shape() {
        let data = record_bytes();
        let record = ExecRecord::parse(&data).unwrap();
        let line = ExecLine::new(&record, Segments::ALL, at());

        let value: serde_json::Value = serde_json::from_str(&line.to_json().unwrap()).unwrap();
        assert_eq!(value["pid"], 4242);
        assert_eq!(value["ppid"], 1);
        assert_eq!(value["comm"], "make");
        assert_eq!(value["argv"][2], "all");
        assert_eq!(value["cwd"], "/home/proj");
        assert_eq!(value["timestamp"], "2024-05-01T12:00:00Z");
    }

    #[test]
    fn disabled_segments_are_omitted() {
        let data = record_bytes();
        let record = ExecRecord::parse(&data).unwrap();
        let line = ExecLine::new(&record, Segments::NONE, at());
        assert!(line.argv.is_none());
        assert!(line.cwd.is_none());

        let value: serde_json::Value = serde_json::from_str(&line.to_json().unwrap()).unwrap();
        assert!(value.get("argv").is_none());
        assert!(value.get("cwd").is_none());
    }
}
