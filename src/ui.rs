//! Terminal output: a spinner for slow modem work and coloured summaries.
//!
//! Uses `indicatif` for the spinner and `console` for styling.

use std::time::Duration;

use console::Style;
use indicatif::{ProgressBar, ProgressStyle};

use crate::coordinator::IngestReport;
use crate::modem::{ModemDiagnosis, SmsReceipt, at};
use crate::notify::{JobStatus, NotificationJob};
use crate::tasks::{Task, TaskStatus};
use crate::telemetry::ReadingOutcome;

/// Spinner shown while waiting on the modem or the network.
pub struct Progress {
    pb: ProgressBar,
    green: Style,
    red: Style,
    yellow: Style,
}

impl Progress {
    pub fn start(message: &str) -> Self {
        let pb = ProgressBar::new_spinner();
        if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.cyan} {msg}") {
            pb.set_style(style);
        }
        pb.set_message(message.to_string());
        pb.enable_steady_tick(Duration::from_millis(100));

        Self {
            pb,
            green: Style::new().green().bold(),
            red: Style::new().red().bold(),
            yellow: Style::new().yellow(),
        }
    }

    pub fn warn(&self, message: &str) {
        self.pb
            .println(format!("  {} {message}", self.yellow.apply_to("!")));
    }

    pub fn succeed(&self, message: &str) {
        self.pb.finish_and_clear();
        println!("  {} {message}", self.green.apply_to("✓"));
    }

    pub fn fail(&self, message: &str) {
        self.pb.finish_and_clear();
        println!("  {} {message}", self.red.apply_to("✗"));
    }
}

fn status_style(status: TaskStatus) -> Style {
    match status {
        TaskStatus::Pending => Style::new().yellow(),
        TaskStatus::InProgress => Style::new().cyan(),
        TaskStatus::Done => Style::new().green(),
        TaskStatus::Cancelled => Style::new().red(),
        TaskStatus::Archived => Style::new().dim(),
    }
}

pub fn print_task(task: &Task) {
    let assignee = task.assigned_staff_name.as_deref().unwrap_or("-");
    println!(
        "{}  {:<11} {:<8} {:<10} {} @ {}  [{}]",
        Style::new().dim().apply_to(&task.id[..8.min(task.id.len())]),
        status_style(task.status).apply_to(task.status),
        task.priority,
        task.source,
        task.bin_name,
        task.bin_location,
        assignee,
    );
}

pub fn print_tasks(tasks: &[Task]) {
    if tasks.is_empty() {
        println!("{}", Style::new().dim().apply_to("No tasks."));
        return;
    }
    for task in tasks {
        print_task(task);
    }
}

pub fn print_ingest(report: &IngestReport) {
    match &report.outcome {
        ReadingOutcome::BelowThreshold => {}
        ReadingOutcome::Created(task) => {
            print!("{} ", Style::new().green().bold().apply_to("new"));
            print_task(report.assigned.as_ref().unwrap_or(task));
        }
        ReadingOutcome::Deduplicated { existing, escalated } => {
            let tag = if *escalated { "escalated" } else { "covered by" };
            println!("{} {existing}", Style::new().yellow().apply_to(tag));
        }
    }
}

pub fn print_jobs(jobs: &[NotificationJob]) {
    let green = Style::new().green();
    let red = Style::new().red();
    for job in jobs {
        let reason = job.failure_reason.as_deref().unwrap_or("");
        let line = format!(
            "  {:<4} → {:<16} attempt {} {} {reason}",
            job.channel, job.recipient, job.attempt, job.status
        );
        match job.status {
            JobStatus::Failed => println!("{}", red.apply_to(line)),
            _ => println!("{}", green.apply_to(line)),
        }
    }
}

pub fn print_receipt(receipt: &SmsReceipt) {
    let mut line = format!(
        "{:?} mode, message reference(s) {:?}",
        receipt.mode, receipt.references
    );
    if receipt.fell_back {
        line.push_str(" (PDU fallback)");
    }
    println!("  {}", Style::new().dim().apply_to(line));
}

pub fn print_diagnosis(d: &ModemDiagnosis) {
    let ok = Style::new().green();
    let bad = Style::new().red();
    let mark = |good: bool| if good { ok.apply_to("✓") } else { bad.apply_to("✗") };

    println!("{} {}", Style::new().bold().apply_to("Port"), d.port);
    println!("  state       {}", d.state);
    println!("  responsive  {}", mark(d.responsive));
    println!("  SIM         {}", d.sim.as_deref().unwrap_or("unknown"));
    match d.rssi {
        Some(rssi) if rssi != 99 => println!("  signal      {rssi} ({} dBm)", at::rssi_dbm(rssi)),
        _ => println!("  signal      unknown"),
    }
    match d.registration {
        Some(reg) => println!("  network     {} {reg}", mark(reg.is_registered())),
        None => println!("  network     unknown"),
    }
    println!("  operator    {}", d.operator.as_deref().unwrap_or("unknown"));
    println!("  SMSC        {}", d.smsc.as_deref().unwrap_or("not set"));
    if let Some(err) = &d.last_error {
        println!("  last error  {}", bad.apply_to(err));
    }
    for hint in &d.hints {
        println!("  {} {hint}", Style::new().yellow().apply_to("hint:"));
    }
}
