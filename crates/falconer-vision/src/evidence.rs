use anyhow::{Context, Result};
use falconer_proto::event::GeotagRecord;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::Frame;

pub const GEOTAG_LOG: &str = "geotags.jsonl";

pub fn evidence_name(record: &GeotagRecord) -> String {
    format!("geotag_{}.jpg", record.ts_unix_ms.div_euclid(1000))
}

/// Best-effort writer for geotag evidence. Each save runs on the blocking pool;
/// failures are logged and dropped. [`flush`] waits for outstanding writes.
///
/// [`flush`]: EvidenceWriter::flush
pub struct EvidenceWriter {
    dir: Option<PathBuf>,
    pending: Mutex<Vec<JoinHandle<()>>>,
}

impl EvidenceWriter {
    pub fn new(dir: Option<PathBuf>) -> Self {
        Self { dir, pending: Mutex::new(Vec::new()) }
    }

    pub fn save(&self, frame: Option<Frame>, record: &GeotagRecord) {
        let Some(dir) = self.dir.clone() else {
            return;
        };
        let record = record.clone();
        let task = tokio::task::spawn_blocking(move || {
            if let Err(e) = write_evidence(&dir, frame.as_ref(), &record) {
                warn!("evidence save failed: {:#}", e);
            }
        });
        let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
        pending.retain(|t| !t.is_finished());
        pending.push(task);
    }

    pub async fn flush(&self) {
        let pending = std::mem::take(&mut *self.pending.lock().unwrap_or_else(|e| e.into_inner()));
        for task in pending {
            if let Err(e) = task.await {
                warn!("evidence task: {}", e);
            }
        }
    }
}

/// Append the record to `geotags.jsonl`, then save the frame as JPEG.
pub fn write_evidence(dir: &Path, frame: Option<&Frame>, record: &GeotagRecord) -> Result<()> {
    std::fs::create_dir_all(dir).with_context(|| format!("create {}", dir.display()))?;

    let log = dir.join(GEOTAG_LOG);
    let mut f = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log)
        .with_context(|| format!("open {}", log.display()))?;
    writeln!(f, "{}", serde_json::to_string(record)?).context("append geotag")?;

    if let Some(frame) = frame {
        let path = dir.join(evidence_name(record));
        let img = image::RgbImage::from_raw(frame.width, frame.height, frame.rgb.clone())
            .context("frame buffer does not match its size")?;
        img.save(&path).with_context(|| format!("write {}", path.display()))?;
        debug!("evidence saved to {}", path.display());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("falconer-{}-{}", name, std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        dir
    }

    fn record(ts_unix_ms: i64) -> GeotagRecord {
        GeotagRecord { vehicle_id: 1, lat: 47.0, lon: 8.0, alt: 12.5, ts_unix_ms }
    }

    #[test]
    fn test_name_uses_unix_seconds() {
        assert_eq!(evidence_name(&record(1_700_000_123_456)), "geotag_1700000123.jpg");
    }

    #[test]
    fn test_writes_log_and_jpeg() {
        let dir = scratch("evidence");
        write_evidence(&dir, Some(&Frame::blank(32, 24)), &record(1_700_000_000_000)).unwrap();
        write_evidence(&dir, None, &record(1_700_000_001_000)).unwrap();

        let log = std::fs::read_to_string(dir.join(GEOTAG_LOG)).unwrap();
        let lines: Vec<GeotagRecord> = log.lines().map(|l| serde_json::from_str(l).unwrap()).collect();
        assert_eq!(lines, vec![record(1_700_000_000_000), record(1_700_000_001_000)]);
        assert!(dir.join("geotag_1700000000.jpg").exists());
        assert!(!dir.join("geotag_1700000001.jpg").exists());
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_bad_frame_is_an_error() {
        let dir = scratch("badframe");
        let frame = Frame { width: 10, height: 10, rgb: vec![0; 5] };
        assert!(write_evidence(&dir, Some(&frame), &record(0)).is_err());
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn test_writer_is_best_effort() {
        let dir = scratch("writer");
        let writer = EvidenceWriter::new(Some(dir.clone()));
        writer.save(Some(Frame { width: 4, height: 4, rgb: vec![] }), &record(5_000));
        writer.save(Some(Frame::blank(8, 8)), &record(6_000));
        writer.flush().await;
        assert!(dir.join("geotag_6.jpg").exists());
        let _ = std::fs::remove_dir_all(&dir);

        EvidenceWriter::new(None).save(None, &record(0));
    }
}
