// src/video_processor.rs
//
// Host side of the engine: finds detector/tracker output on disk, replays it
// frame by frame through a fresh VideoAggregator per video, and writes the
// per-video report.
//
// Detection log format (JSON Lines):
//   line 1:  {"fps": 30.0, "width": 1280, "height": 720}
//   line n:  {"frame_index": 2, "detections": [{"track_id": 1, "x": .., "y": .., "w": .., "h": ..}]}

use crate::analysis::{VideoAggregator, MAX_STREAM_SECONDS};
use crate::pipeline::{AnalysisMetrics, RiskEvent};
use crate::types::{AnalysisReport, Config, FrameRecord, StreamHeader, Verdict};
use anyhow::{bail, Context, Result};
use std::ffi::OsString;
use std::fs::{self, File};
use std::io::{BufRead, BufReader, BufWriter, Lines, Write};
use std::path::{Component, Path, PathBuf};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

const LOG_EXTENSION: &str = "jsonl";

pub struct VideoProcessor {
    config: Config,
    metrics: AnalysisMetrics,
}

/// Result of replaying one detection log
#[derive(Debug, Clone)]
pub struct VideoOutcome {
    /// Log path relative to the input dir, extension stripped (`day1/clip_a`)
    pub name: String,
    pub report: AnalysisReport,
    pub events: Vec<RiskEvent>,
    pub source_frames: u64,
    pub sampled_frames: u64,
    pub stopped_early: bool,
}

impl VideoProcessor {
    pub fn new(config: Config, metrics: AnalysisMetrics) -> Self {
        Self { config, metrics }
    }

    pub fn metrics(&self) -> &AnalysisMetrics {
        &self.metrics
    }

    pub fn find_detection_logs(&self) -> Result<Vec<PathBuf>> {
        let input_dir = Path::new(&self.config.video.input_dir);
        if !input_dir.is_dir() {
            bail!("input directory {} does not exist", input_dir.display());
        }

        let mut logs: Vec<PathBuf> = WalkDir::new(input_dir)
            .follow_links(true)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .map(|e| e.into_path())
            .filter(|p| {
                p.extension()
                    .and_then(|ext| ext.to_str())
                    .is_some_and(|ext| ext.eq_ignore_ascii_case(LOG_EXTENSION))
            })
            .collect();
        logs.sort();

        info!("Found {} detection logs", logs.len());
        Ok(logs)
    }

    pub fn process_log(&self, path: &Path) -> Result<VideoOutcome> {
        info!("Opening detection log: {}", path.display());
        let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
        let name = self.output_name(path);

        self.analyze_stream(BufReader::new(file), &name)
            .with_context(|| format!("analyzing {}", path.display()))
    }

    /// Relative path under the input dir without extension, so equal file
    /// names in different subdirectories do not overwrite each other.
    fn output_name(&self, path: &Path) -> String {
        let relative = path
            .strip_prefix(&self.config.video.input_dir)
            .unwrap_or_else(|_| Path::new(path.file_name().unwrap_or(path.as_os_str())));
        let parts: Vec<String> = relative
            .with_extension("")
            .components()
            .filter_map(|c| match c {
                Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
                _ => None,
            })
            .collect();
        if parts.is_empty() {
            "video".to_string()
        } else {
            parts.join("/")
        }
    }

    /// Replay one detection stream through a fresh engine.
    pub fn analyze_stream<R: BufRead>(&self, reader: R, name: &str) -> Result<VideoOutcome> {
        let mut frames = DetectionLogReader::new(reader)?;
        let header = frames.header;
        let mut engine = VideoAggregator::new(&self.config, &header)?;
        let params = *engine.params();

        let mut events = Vec::new();
        let mut source_frames = 0u64;
        let mut last_index: Option<u64> = None;
        let mut stopped_early = false;

        for record in &mut frames {
            let record = record?;
            if let Some(prev) = last_index {
                if record.frame_index <= prev {
                    bail!(
                        "frame {} arrived after frame {}; frames must be in increasing order",
                        record.frame_index,
                        prev
                    );
                }
            }
            last_index = Some(record.frame_index);
            source_frames += 1;

            if !params.within_stream_horizon(record.frame_index) {
                bail!(
                    "frame {} lies past the {}s stream horizon at {} fps",
                    record.frame_index,
                    MAX_STREAM_SECONDS,
                    params.fps
                );
            }

            if !params.is_sampled(record.frame_index) {
                continue;
            }

            let summary = engine.process_source_frame(record.frame_index, &record.detections);
            self.metrics.inc(&self.metrics.sampled_frames);
            self.metrics
                .add(&self.metrics.detections_seen, summary.detections as u64);
            self.metrics
                .add(&self.metrics.lane_contained, summary.lane_contained as u64);
            self.metrics
                .add(&self.metrics.degenerate_estimates, summary.degenerate as u64);

            for event in engine.drain_events() {
                self.record_event(name, &event);
                events.push(event);
            }

            if self.config.video.early_exit_on_danger && engine.is_danger_confirmed() {
                info!(
                    "⏹️  {}: danger confirmed at frame {}, stopping early",
                    name, record.frame_index
                );
                stopped_early = true;
                break;
            }
        }

        let report = engine.report();
        self.metrics.inc(&self.metrics.videos_processed);
        self.metrics.add(&self.metrics.source_frames, source_frames);
        match report.status {
            Verdict::Danger => self.metrics.inc(&self.metrics.danger_videos),
            Verdict::Positive => self.metrics.inc(&self.metrics.positive_videos),
            Verdict::Safe => self.metrics.inc(&self.metrics.safe_videos),
        }

        info!(
            "✓ {}: status={} duration={}s sampled={} events={}",
            name,
            report.status.as_str(),
            report.video_duration_seconds,
            engine.sampled_frames(),
            events.len()
        );

        Ok(VideoOutcome {
            name: name.to_string(),
            report,
            events,
            source_frames,
            sampled_frames: engine.sampled_frames(),
            stopped_early,
        })
    }

    fn record_event(&self, name: &str, event: &RiskEvent) {
        match event {
            RiskEvent::DangerConfirmed {
                track_id,
                timestamp,
                distance_m,
                closing_speed_mps,
            } => {
                self.metrics.inc(&self.metrics.danger_events);
                warn!(
                    "🚨 {}: track {} too close at {:.2}s ({:.1}m, closing {:.2}m/s)",
                    name, track_id, timestamp, distance_m, closing_speed_mps
                );
            }
            RiskEvent::RecoveryConfirmed {
                track_id,
                timestamp,
                min_distance_m,
                distance_m,
            } => {
                self.metrics.inc(&self.metrics.recovery_events);
                info!(
                    "🟢 {}: track {} recovered at {:.2}s ({:.1}m → {:.1}m)",
                    name, track_id, timestamp, min_distance_m, distance_m
                );
            }
            RiskEvent::TrackEvicted { track_id, .. } => {
                self.metrics.inc(&self.metrics.tracks_evicted);
                debug!("{}: track {} evicted", name, track_id);
            }
        }
    }

    /// Write `<output_dir>/<name>.json` and, when there are events, `<name>.events.jsonl`.
    /// Subdirectories in `name` are mirrored under the output dir.
    pub fn write_outcome(&self, outcome: &VideoOutcome) -> Result<PathBuf> {
        let name = Path::new(&outcome.name);
        if name.as_os_str().is_empty()
            || !name.components().all(|c| matches!(c, Component::Normal(_)))
        {
            bail!("invalid output name {:?}", outcome.name);
        }

        let base = Path::new(&self.config.video.output_dir).join(name);
        if let Some(parent) = base.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("creating {}", parent.display()))?;
        }

        let report_path = with_suffix(&base, ".json");
        let json = serde_json::to_string_pretty(&outcome.report)?;
        fs::write(&report_path, json)
            .with_context(|| format!("writing {}", report_path.display()))?;

        if !outcome.events.is_empty() {
            let events_path = with_suffix(&base, ".events.jsonl");
            let mut writer = BufWriter::new(
                File::create(&events_path)
                    .with_context(|| format!("creating {}", events_path.display()))?,
            );
            for event in &outcome.events {
                writeln!(writer, "{}", serde_json::to_string(event)?)?;
            }
            writer.flush()?;
        }

        Ok(report_path)
    }
}

/// Appends to the file name instead of replacing an extension, so `clip.v2` keeps its dot.
fn with_suffix(base: &Path, suffix: &str) -> PathBuf {
    let mut raw = OsString::from(base.as_os_str());
    raw.push(suffix);
    PathBuf::from(raw)
}

/// Streams `FrameRecord`s from a detection log after reading its header line.
pub struct DetectionLogReader<R: BufRead> {
    pub header: StreamHeader,
    lines: Lines<R>,
    line_no: usize,
}

impl<R: BufRead> DetectionLogReader<R> {
    pub fn new(reader: R) -> Result<Self> {
        let mut lines = reader.lines();
        let mut line_no = 0;

        let header = loop {
            line_no += 1;
            let Some(line) = lines.next() else {
                bail!("detection log is empty, expected a stream header");
            };
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            break serde_json::from_str::<StreamHeader>(&line)
                .with_context(|| format!("line {}: invalid stream header", line_no))?;
        };

        Ok(Self {
            header,
            lines,
            line_no,
        })
    }
}

impl<R: BufRead> Iterator for DetectionLogReader<R> {
    type Item = Result<FrameRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            self.line_no += 1;
            let line = match self.lines.next()? {
                Ok(line) => line,
                Err(e) => return Some(Err(e.into())),
            };
            if line.trim().is_empty() {
                continue;
            }
            let line_no = self.line_no;
            return Some(
                serde_json::from_str::<FrameRecord>(&line)
                    .with_context(|| format!("line {}: invalid frame record", line_no)),
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn processor(config: Config) -> VideoProcessor {
        VideoProcessor::new(config, AnalysisMetrics::new())
    }

    /// 1280x720 @ 10fps; a centered car ~94px wide sits at roughly 10m with hfov=100°.
    fn close_follow_log(frames: u64) -> String {
        let mut log = String::from("{\"fps\": 10.0, \"width\": 1280, \"height\": 720}\n");
        for idx in 1..=frames {
            log.push_str(&format!(
                "{{\"frame_index\": {}, \"detections\": [{{\"track_id\": 1, \"x\": 665.6, \"y\": 662.0, \"w\": 94.4, \"h\": 76.0}}]}}\n",
                idx
            ));
        }
        log
    }

    #[test]
    fn test_reader_parses_header_and_frames() {
        let log = "\n{\"fps\": 30.0, \"width\": 640, \"height\": 480}\n\n{\"frame_index\": 1}\n";
        let mut reader = DetectionLogReader::new(Cursor::new(log)).unwrap();
        assert_eq!(reader.header.width, 640);
        let frame = reader.next().unwrap().unwrap();
        assert_eq!(frame.frame_index, 1);
        assert!(frame.detections.is_empty());
        assert!(reader.next().is_none());
    }

    #[test]
    fn test_reader_rejects_empty_and_garbage() {
        assert!(DetectionLogReader::new(Cursor::new("")).is_err());
        let mut reader =
            DetectionLogReader::new(Cursor::new("{\"fps\": 30.0, \"width\": 640, \"height\": 480}\nnot json\n"))
                .unwrap();
        assert!(reader.next().unwrap().is_err());
    }

    #[test]
    fn test_close_follow_is_danger() {
        let proc = processor(Config::baseline());
        let outcome = proc
            .analyze_stream(Cursor::new(close_follow_log(20)), "close")
            .unwrap();
        assert_eq!(outcome.report.status, Verdict::Danger);
        assert_eq!(outcome.source_frames, 20);
        // frame_skip = 2 → every other frame is analyzed
        assert_eq!(outcome.sampled_frames, 10);
        assert_eq!(outcome.report.video_duration_seconds, 3);
        assert!(outcome
            .events
            .iter()
            .any(|e| matches!(e, RiskEvent::DangerConfirmed { .. })));
        assert_eq!(proc.metrics().summary().danger_videos, 1);
    }

    #[test]
    fn test_early_exit_stops_at_confirmation() {
        let mut config = Config::baseline();
        config.video.early_exit_on_danger = true;
        let proc = processor(config);
        let outcome = proc
            .analyze_stream(Cursor::new(close_follow_log(20)), "close")
            .unwrap();
        assert!(outcome.stopped_early);
        assert_eq!(outcome.report.status, Verdict::Danger);
        assert_eq!(outcome.sampled_frames, 3);
    }

    #[test]
    fn test_out_of_order_frames_rejected() {
        let log = "{\"fps\": 10.0, \"width\": 1280, \"height\": 720}\n{\"frame_index\": 4}\n{\"frame_index\": 2}\n";
        let proc = processor(Config::baseline());
        assert!(proc.analyze_stream(Cursor::new(log), "bad").is_err());
    }

    #[test]
    fn test_find_and_write_round_trip() {
        let input = tempfile::tempdir().unwrap();
        let output = tempfile::tempdir().unwrap();
        fs::create_dir_all(input.path().join("day1")).unwrap();
        fs::write(input.path().join("day1/clip_a.jsonl"), close_follow_log(12)).unwrap();
        fs::write(input.path().join("notes.txt"), "ignored").unwrap();

        let mut config = Config::baseline();
        config.video.input_dir = input.path().to_string_lossy().into_owned();
        config.video.output_dir = output.path().to_string_lossy().into_owned();
        let proc = processor(config);

        let logs = proc.find_detection_logs().unwrap();
        assert_eq!(logs.len(), 1);

        let outcome = proc.process_log(&logs[0]).unwrap();
        assert_eq!(outcome.name, "day1/clip_a");
        let report_path = proc.write_outcome(&outcome).unwrap();
        assert_eq!(report_path, output.path().join("day1/clip_a.json"));

        let written: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(report_path).unwrap()).unwrap();
        assert_eq!(written["status"], "danger");
        assert!(written["logs"]["followingDistance"][0]["isDetected"].is_boolean());
        assert!(output.path().join("day1/clip_a.events.jsonl").exists());
    }

    #[test]
    fn test_same_file_name_in_two_folders_keeps_both_reports() {
        let input = tempfile::tempdir().unwrap();
        let output = tempfile::tempdir().unwrap();
        fs::create_dir_all(input.path().join("cam_front")).unwrap();
        fs::create_dir_all(input.path().join("cam_rear")).unwrap();
        fs::write(input.path().join("cam_front/clip.jsonl"), close_follow_log(12)).unwrap();
        fs::write(
            input.path().join("cam_rear/clip.jsonl"),
            "{\"fps\": 10.0, \"width\": 1280, \"height\": 720}\n{\"frame_index\": 2}\n",
        )
        .unwrap();

        let mut config = Config::baseline();
        config.video.input_dir = input.path().to_string_lossy().into_owned();
        config.video.output_dir = output.path().to_string_lossy().into_owned();
        let proc = processor(config);

        let logs = proc.find_detection_logs().unwrap();
        assert_eq!(logs.len(), 2);
        let mut names = Vec::new();
        for log in &logs {
            let outcome = proc.process_log(log).unwrap();
            proc.write_outcome(&outcome).unwrap();
            names.push(outcome.name);
        }
        assert_eq!(names, vec!["cam_front/clip", "cam_rear/clip"]);

        let read = |rel: &str| -> serde_json::Value {
            serde_json::from_str(&fs::read_to_string(output.path().join(rel)).unwrap()).unwrap()
        };
        assert_eq!(read("cam_front/clip.json")["status"], "danger");
        assert_eq!(read("cam_rear/clip.json")["status"], "safe");
    }

    #[test]
    fn test_write_rejects_escaping_name() {
        let output = tempfile::tempdir().unwrap();
        let mut config = Config::baseline();
        config.video.output_dir = output.path().to_string_lossy().into_owned();
        let proc = processor(config);
        let mut outcome = proc
            .analyze_stream(Cursor::new(close_follow_log(2)), "ok")
            .unwrap();
        outcome.name = "../outside".to_string();
        assert!(proc.write_outcome(&outcome).is_err());
    }

    #[test]
    fn test_frame_index_past_stream_horizon_rejected() {
        let log = "{\"fps\": 10.0, \"width\": 1280, \"height\": 720}\n\
                   {\"frame_index\": 2}\n\
                   {\"frame_index\": 18446744073709551614, \"detections\": [{\"track_id\": 1, \"x\": 665.6, \"y\": 662.0, \"w\": 94.4, \"h\": 76.0}]}\n";
        let proc = processor(Config::baseline());
        let err = proc.analyze_stream(Cursor::new(log), "huge").unwrap_err();
        assert!(format!("{:#}", err).contains("stream horizon"));
        assert_eq!(proc.metrics().summary().videos_processed, 0);
    }
}
