//! Renders a task into a channel-appropriate message.
//!
//! Push gets the full structured task. SMS must fit a hard septet budget:
//! 160 for a single segment, or 153 per part when concatenation is allowed.
//! When the full labeled message is too long, the composer falls back to a
//! compact single line and then sheds fields, most expendable first:
//! GPS status, height, notes (truncated, then dropped), the MANUAL/AUTO
//! annotation. Bin identity, location, level and attribution always stay.
//! Past that the line is hard-truncated with a `...` marker.

use serde_json::json;

use super::gsm;
use super::{Channel, RenderedMessage};
use crate::error::ComposerOverflowError;
use crate::tasks::{SYSTEM_ASSIGNER, Task, TaskSource};
use crate::telemetry::ThresholdBands;

const ELLIPSIS: &str = "...";
// " Note: " + "."
const NOTE_OVERHEAD: usize = 8;
// Notes shorter than this after truncation are omitted instead.
const MIN_NOTE_SEPTETS: usize = 4;

/// Which optional fields the compact line carries.
#[derive(Debug, Clone, Copy)]
struct CompactFields {
    annotation: bool,
    gps: bool,
    height: bool,
}

impl CompactFields {
    const ALL: Self = Self {
        annotation: true,
        gps: true,
        height: true,
    };
}

/// Values pulled out of a task once per render.
struct Fields<'a> {
    kind: &'static str,
    bin: &'a str,
    location: &'a str,
    level: String,
    band: String,
    weight: Option<String>,
    height: Option<String>,
    gps_ok: Option<bool>,
    satellites: u8,
    notes: Option<&'a str>,
    by: &'a str,
    time_short: String,
    time_full: String,
}

pub struct NotificationComposer {
    bands: ThresholdBands,
    budget: usize,
    max_segments: usize,
}

impl NotificationComposer {
    /// `max_segments` caps concatenation; 1 means single-segment only.
    pub fn new(bands: ThresholdBands, max_segments: u8) -> Result<Self, ComposerOverflowError> {
        let budget = match max_segments {
            0 => {
                return Err(ComposerOverflowError {
                    budget: 0,
                    required: gsm::SINGLE_SEGMENT_SEPTETS,
                });
            }
            1 => gsm::SINGLE_SEGMENT_SEPTETS,
            n => gsm::CONCAT_SEGMENT_SEPTETS * usize::from(n),
        };
        Ok(Self {
            bands,
            budget,
            max_segments: usize::from(max_segments),
        })
    }

    /// SMS septet budget in effect.
    pub fn sms_budget(&self) -> usize {
        self.budget
    }

    /// Render `task` for `channel`. The same task always yields the same bytes.
    pub fn render(&self, task: &Task, channel: Channel) -> Result<RenderedMessage, ComposerOverflowError> {
        match channel {
            Channel::Push => Ok(self.render_push(task)),
            Channel::Sms => self.render_sms(task),
        }
    }

    fn render_push(&self, task: &Task) -> RenderedMessage {
        let fields = self.fields(task);
        let payload = json!({
            "type": "task_assigned",
            "title": format!("{} task: {}", fields.kind, task.bin_name),
            "body": format!(
                "{} @ {} is at {} ({})",
                task.bin_name, task.bin_location, fields.level, fields.band
            ),
            "task": task,
        });
        RenderedMessage {
            channel: Channel::Push,
            body: payload.to_string(),
            segments: 1,
        }
    }

    fn render_sms(&self, task: &Task) -> Result<RenderedMessage, ComposerOverflowError> {
        let f = self.fields(task);

        let full = gsm::sanitize(&full_message(&f));
        if self.fits(&full) {
            return Ok(self.sms(full));
        }

        let notes = f.notes.map(|n| gsm::sanitize(&single_line(n)));
        let mut opts = CompactFields::ALL;
        let candidate = gsm::sanitize(&compact_line(&f, opts, notes.as_deref()));
        if self.fits(&candidate) {
            return Ok(self.sms(candidate));
        }

        opts.gps = false;
        let candidate = gsm::sanitize(&compact_line(&f, opts, notes.as_deref()));
        if self.fits(&candidate) {
            return Ok(self.sms(candidate));
        }

        opts.height = false;
        let candidate = gsm::sanitize(&compact_line(&f, opts, notes.as_deref()));
        if self.fits(&candidate) {
            return Ok(self.sms(candidate));
        }

        let without_notes = gsm::sanitize(&compact_line(&f, opts, None));
        if let Some(notes) = notes.as_deref() {
            let mut room = self
                .budget
                .saturating_sub(gsm::septet_len(&without_notes))
                .saturating_sub(NOTE_OVERHEAD);
            // A part boundary can push an escape pair into the next part, so
            // shrink until the segment count fits as well.
            while room >= MIN_NOTE_SEPTETS {
                let cut = format!(
                    "{}{ELLIPSIS}",
                    gsm::truncate_to_septets(notes, room - ELLIPSIS.len())
                );
                let candidate = gsm::sanitize(&compact_line(&f, opts, Some(&cut)));
                if self.fits(&candidate) {
                    return Ok(self.sms(candidate));
                }
                room -= 1;
            }
        }
        if self.fits(&without_notes) {
            return Ok(self.sms(without_notes));
        }

        opts.annotation = false;
        let candidate = gsm::sanitize(&compact_line(&f, opts, None));
        if self.fits(&candidate) {
            return Ok(self.sms(candidate));
        }

        let mut floor = self.budget - ELLIPSIS.len();
        loop {
            let truncated = format!("{}{ELLIPSIS}", gsm::truncate_to_septets(&candidate, floor));
            if self.fits(&truncated) {
                return Ok(self.sms(truncated));
            }
            if floor == 0 {
                return Err(ComposerOverflowError {
                    budget: self.budget,
                    required: gsm::septet_len(&truncated),
                });
            }
            floor -= 1;
        }
    }

    /// Within the septet budget and the configured number of parts.
    fn fits(&self, text: &str) -> bool {
        gsm::septet_len(text) <= self.budget && gsm::segment_count(text) <= self.max_segments
    }

    fn sms(&self, body: String) -> RenderedMessage {
        let segments = gsm::segment_count(&body);
        RenderedMessage {
            channel: Channel::Sms,
            body,
            segments,
        }
    }

    fn fields<'a>(&self, task: &'a Task) -> Fields<'a> {
        let reading = task.reading.as_ref();
        let (level, band) = match reading {
            Some(r) => (
                format!("{:.0}%", r.level_percent),
                self.bands.label_for(r.level_percent).to_string(),
            ),
            None => ("n/a".to_string(), task.priority.to_string()),
        };
        Fields {
            kind: match task.source {
                TaskSource::Manual => "MANUAL",
                TaskSource::Automatic => "AUTO",
            },
            bin: &task.bin_name,
            location: &task.bin_location,
            level,
            band,
            weight: reading.map(|r| format_number(r.weight_kg)),
            height: reading.map(|r| format!("{:.0}", r.height_percent)),
            gps_ok: reading.map(|r| r.gps_valid),
            satellites: reading.map(|r| r.satellite_count).unwrap_or(0),
            notes: task.notes.as_deref().filter(|n| !n.trim().is_empty()),
            by: task.assigned_by.as_deref().unwrap_or(SYSTEM_ASSIGNER),
            time_short: task.updated_at.format("%H:%M").to_string(),
            time_full: task.updated_at.format("%Y-%m-%d %H:%M UTC").to_string(),
        }
    }
}

fn full_message(f: &Fields<'_>) -> String {
    let mut lines = vec![
        format!("{} TASK ASSIGNED", f.kind),
        format!("Bin: {}", f.bin),
        format!("Location: {}", f.location),
        format!("Fill: {} ({})", f.level, f.band),
    ];
    if let Some(w) = &f.weight {
        lines.push(format!("Weight: {w} kg"));
    }
    if let Some(h) = &f.height {
        lines.push(format!("Height: {h}%"));
    }
    match f.gps_ok {
        Some(true) => lines.push(format!("GPS: valid ({} sats)", f.satellites)),
        Some(false) => lines.push("GPS: no fix".to_string()),
        None => {}
    }
    if let Some(n) = f.notes {
        lines.push(format!("Notes: {n}"));
    }
    lines.push(format!("Assigned by: {}", f.by));
    lines.push(format!("Time: {}", f.time_full));
    lines.join("\n")
}

fn compact_line(f: &Fields<'_>, opts: CompactFields, notes: Option<&str>) -> String {
    let mut out = String::new();
    if opts.annotation {
        out.push_str(f.kind);
        out.push(' ');
    }
    out.push_str(&format!(
        "TASK: {} @ {}. Level:{} ({}).",
        single_line(f.bin),
        single_line(f.location),
        f.level,
        f.band
    ));

    let mut measures = Vec::new();
    if let Some(w) = &f.weight {
        measures.push(format!("W:{w}kg"));
    }
    if opts.height
        && let Some(h) = &f.height
    {
        measures.push(format!("H:{h}%"));
    }
    if !measures.is_empty() {
        out.push_str(&format!(" {}.", measures.join(" ")));
    }
    if opts.gps
        && let Some(ok) = f.gps_ok
    {
        out.push_str(if ok { " GPS:ok." } else { " GPS:no fix." });
    }
    if let Some(n) = notes {
        out.push_str(&format!(" Note: {n}."));
    }
    out.push_str(&format!(" By {} {}. Empty now", single_line(f.by), f.time_short));
    out
}

/// Line breaks become single spaces.
fn single_line(text: &str) -> String {
    text.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Up to three decimals, trailing zeros dropped: 0.041 → "0.041", 12.50 → "12.5".
fn format_number(value: f64) -> String {
    let s = format!("{value:.3}");
    let s = s.trim_end_matches('0').trim_end_matches('.');
    if s.is_empty() || s == "-0" {
        "0".to_string()
    } else {
        s.to_string()
    }
}
