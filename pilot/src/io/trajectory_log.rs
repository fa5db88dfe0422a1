//! Per-goal trajectory logs under the configured `trajectory_dir`.
//!
//! ```text
//! <dir>/<goal-id>/events.jsonl   one serialized event per line
//! <dir>/<goal-id>/meta.json      goal, terminal state, counters, timing
//! ```

use std::fs;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::core::event::Event;
use crate::core::types::Intent;
use crate::looping::GoalStop;

#[derive(Debug, Clone, Serialize)]
pub struct TrajectoryMeta {
    pub goal_id: String,
    pub goal: String,
    pub success: bool,
    pub stop: GoalStop,
    pub steps: u32,
    pub consecutive_errors: u32,
    pub consecutive_no_change: u32,
    pub intent: Option<Intent>,
    pub scratchpad: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub duration_ms: u64,
}

#[derive(Debug, Clone)]
pub struct TrajectoryPaths {
    pub dir: PathBuf,
    pub events_path: PathBuf,
    pub meta_path: PathBuf,
}

impl TrajectoryPaths {
    pub fn new(root: &Path, goal_id: &str) -> Self {
        let dir = root.join(goal_id);
        Self {
            events_path: dir.join("events.jsonl"),
            meta_path: dir.join("meta.json"),
            dir,
        }
    }
}

/// Stable, sortable id for a goal started at `started_at`.
pub fn goal_id(started_at: DateTime<Utc>, seq: u64) -> String {
    format!("{}-{seq:04}", started_at.format("%Y%m%dT%H%M%S%3fZ"))
}

pub fn write_trajectory(
    root: &Path,
    meta: &TrajectoryMeta,
    events: &[Event],
) -> Result<TrajectoryPaths> {
    let paths = TrajectoryPaths::new(root, &meta.goal_id);
    fs::create_dir_all(&paths.dir)
        .with_context(|| format!("create trajectory dir {}", paths.dir.display()))?;

    write_events(&paths.events_path, events)?;
    let mut buf = serde_json::to_string_pretty(meta).context("serialize trajectory meta")?;
    buf.push('\n');
    fs::write(&paths.meta_path, buf)
        .with_context(|| format!("write {}", paths.meta_path.display()))?;

    Ok(paths)
}

fn write_events(path: &Path, events: &[Event]) -> Result<()> {
    let file = fs::File::create(path).with_context(|| format!("create {}", path.display()))?;
    let mut writer = BufWriter::new(file);
    for event in events {
        serde_json::to_writer(&mut writer, event).context("serialize event")?;
        writer.write_all(b"\n")?;
    }
    writer
        .flush()
        .with_context(|| format!("write {}", path.display()))
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;
    use crate::core::event::{EventKind, EventSource};
    use crate::test_support::page;

    #[test]
    fn goal_ids_sort_by_start_time() {
        let early = Utc.with_ymd_and_hms(2026, 3, 1, 9, 5, 7).single().expect("time");
        let late = Utc.with_ymd_and_hms(2026, 3, 1, 10, 0, 0).single().expect("time");
        assert_eq!(goal_id(early, 3), "20260301T090507000Z-0003");
        assert!(goal_id(early, 9) < goal_id(late, 1));
    }

    #[test]
    fn writes_one_event_per_line_and_meta() {
        let temp = tempfile::tempdir().expect("tempdir");
        let started_at = Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).single().expect("time");
        let events = vec![
            Event::observation(page("https://shop.test", "home")),
            Event::action("open", "click('13')"),
            Event::message(EventSource::Agent, "done", "$10"),
        ];
        let meta = TrajectoryMeta {
            goal_id: goal_id(started_at, 1),
            goal: "find price".to_string(),
            success: true,
            stop: GoalStop::Completed {
                answer: Some("$10".to_string()),
            },
            steps: 2,
            consecutive_errors: 0,
            consecutive_no_change: 0,
            intent: None,
            scratchpad: String::new(),
            started_at,
            ended_at: started_at,
            duration_ms: 0,
        };

        let paths = write_trajectory(temp.path(), &meta, &events).expect("write");

        let lines: Vec<Event> = fs::read_to_string(&paths.events_path)
            .expect("read")
            .lines()
            .map(|line| serde_json::from_str(line).expect("event"))
            .collect();
        assert_eq!(lines, events);
        assert!(matches!(lines[1].kind, EventKind::Action(_)));

        let meta_json: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&paths.meta_path).expect("read"))
                .expect("json");
        assert_eq!(meta_json["stop"]["state"], "completed");
        assert_eq!(meta_json["stop"]["answer"], "$10");
        assert_eq!(meta_json["goal"], "find price");
    }
}
