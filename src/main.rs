use std::sync::Arc;

use anyhow::{Context, Result, anyhow, bail};
use chrono::Utc;
use clap::Parser;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

use binwatch::cli::{Cli, Command, ModemCommand, TaskCommand};
use binwatch::config::BinwatchConfig;
use binwatch::coordinator::Coordinator;
use binwatch::interrupt::Interrupt;
use binwatch::modem::link::SerialOpener;
use binwatch::modem::sim::{SimProfile, SimulatedOpener};
use binwatch::modem::{ModemDispatcher, ModemSession, ModemTransport, SendMode};
use binwatch::notify::SmsSender;
use binwatch::tasks::{NewTask, StaffMember, TaskFilter};
use binwatch::telemetry::{BinInfo, BinReading};
use binwatch::ui::{self, Progress};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "binwatch=debug" } else { "binwatch=info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .with_target(false)
        .init();

    let config = BinwatchConfig::load(cli.config.as_deref()).context("loading configuration")?;
    let interrupt = Interrupt::ctrl_c();

    match cli.command {
        Command::Ingest { input, no_sms } => ingest(&config, &input, no_sms, &interrupt).await,
        Command::Task(cmd) => task(&config, cmd, &interrupt).await,
        Command::Modem(cmd) => modem(&config, cmd, &interrupt).await,
        Command::Demo => demo(config, &interrupt).await,
    }
}

#[cfg(feature = "serial")]
fn system_opener() -> Result<Arc<dyn SerialOpener>> {
    Ok(Arc::new(binwatch::modem::link::SystemSerialOpener))
}

#[cfg(not(feature = "serial"))]
fn system_opener() -> Result<Arc<dyn SerialOpener>> {
    bail!("binwatch was built without serial port support")
}

fn spawn_modem(config: &BinwatchConfig, opener: Arc<dyn SerialOpener>) -> Result<ModemDispatcher> {
    let session = ModemSession::new(config.modem.session_settings(), opener);
    ModemDispatcher::spawn(session, config.modem.queue_capacity).context("starting modem dispatcher")
}

/// Bring the modem to Ready. A failed connect is only reported, so later
/// jobs still run and record the failure.
async fn connect_modem(transport: &ModemTransport, port: &str) {
    let progress = Progress::start(&format!("Connecting to modem on {port}"));
    match transport.connect().await {
        Ok(()) => progress.succeed(&format!("Modem ready on {port}")),
        Err(e) => progress.fail(&format!("Modem unavailable: {e}")),
    }
}

/// `None` means the command body was dropped by Ctrl-C.
fn finished<T>(out: Option<Result<T>>) -> Result<T> {
    out.ok_or_else(|| anyhow!("interrupted"))?
}

fn open_input(input: &str) -> Result<Box<dyn AsyncBufRead + Unpin + Send>> {
    if input == "-" {
        return Ok(Box::new(BufReader::new(tokio::io::stdin())));
    }
    let file = std::fs::File::open(input).with_context(|| format!("opening {input}"))?;
    Ok(Box::new(BufReader::new(tokio::fs::File::from_std(file))))
}

async fn ingest(config: &BinwatchConfig, input: &str, no_sms: bool, interrupt: &Interrupt) -> Result<()> {
    if config.store.path.is_none() {
        tracing::warn!("No store.path configured; tasks are kept in memory for this run only");
    }

    let dispatcher = if no_sms {
        None
    } else {
        Some(spawn_modem(config, system_opener()?)?)
    };
    let connected = match &dispatcher {
        Some(d) => interrupt
            .guard(connect_modem(&d.transport(), &config.modem.port))
            .await
            .is_some(),
        None => true,
    };

    let result = if connected {
        let sms = dispatcher
            .as_ref()
            .map(|d| Arc::new(d.transport()) as Arc<dyn SmsSender>);
        ingest_until_eof(config, input, sms, interrupt).await
    } else {
        Err(anyhow!("interrupted"))
    };

    if let Some(dispatcher) = dispatcher {
        dispatcher.shutdown().await;
    }
    result
}

/// Feed readings until the input ends or Ctrl-C, then drain notifications.
async fn ingest_until_eof(
    config: &BinwatchConfig,
    input: &str,
    sms: Option<Arc<dyn SmsSender>>,
    interrupt: &Interrupt,
) -> Result<()> {
    let coordinator = Coordinator::from_config(config, sms).await?;
    let counts = read_readings(&coordinator, input, interrupt).await;
    coordinator.finish().await;

    let (accepted, rejected) = counts?;
    println!("{accepted} reading(s) processed, {rejected} rejected");
    Ok(())
}

async fn read_readings(coordinator: &Coordinator, input: &str, interrupt: &Interrupt) -> Result<(usize, usize)> {
    let mut lines = open_input(input)?.lines();
    let (mut accepted, mut rejected) = (0usize, 0usize);
    loop {
        let line = tokio::select! {
            line = lines.next_line() => line?,
            () = interrupt.raised() => {
                tracing::info!("Interrupted, draining notifications");
                break;
            }
        };
        let Some(line) = line else { break };
        if line.trim().is_empty() {
            continue;
        }
        let reading: BinReading = match serde_json::from_str(&line) {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!("Skipping malformed reading: {e}");
                rejected += 1;
                continue;
            }
        };
        match coordinator.ingest(&reading).await {
            Ok(report) => {
                accepted += 1;
                ui::print_ingest(&report);
            }
            Err(e) => {
                tracing::warn!("Reading for {} rejected: {e}", reading.bin_id);
                rejected += 1;
            }
        }
    }
    Ok((accepted, rejected))
}

async fn task(config: &BinwatchConfig, cmd: TaskCommand, interrupt: &Interrupt) -> Result<()> {
    if config.store.path.is_none() {
        bail!("task commands need store.path set in the configuration");
    }

    // Only assignment notifies, so only it opens the modem.
    let out = if matches!(cmd, TaskCommand::Assign { .. }) {
        spawn_modem(config, system_opener()?)?
            .run_until_interrupted(interrupt, |transport| async move {
                connect_modem(&transport, &config.modem.port).await;
                run_task(config, cmd, Some(Arc::new(transport) as Arc<dyn SmsSender>)).await
            })
            .await
    } else {
        interrupt.guard(run_task(config, cmd, None)).await
    };
    finished(out)
}

async fn run_task(config: &BinwatchConfig, cmd: TaskCommand, sms: Option<Arc<dyn SmsSender>>) -> Result<()> {
    let coordinator = Coordinator::from_config(config, sms).await?;
    let tasks = coordinator.lifecycle();

    let mut touched = None;
    match cmd {
        TaskCommand::List { status, bin } => {
            let filter = TaskFilter {
                status: status.map(Into::into),
                bin_id: bin,
                ..Default::default()
            };
            ui::print_tasks(&tasks.list(&filter).await?);
        }
        TaskCommand::Create {
            bin,
            location,
            priority,
            notes,
        } => {
            let mut input = NewTask::manual(bin, location, priority.into());
            if let Some(notes) = notes {
                input = input.with_notes(notes);
            }
            ui::print_task(&tasks.create(input).await?);
        }
        TaskCommand::Assign { task_id, staff_id, by } => {
            let task = tasks.assign(&task_id, &staff_id, by.as_deref()).await?;
            ui::print_task(&task);
            touched = Some(task.id);
        }
        TaskCommand::Complete { task_id, notes } => {
            ui::print_task(&tasks.complete(&task_id, notes.as_deref()).await?);
        }
        TaskCommand::Cancel { task_id } => ui::print_task(&tasks.cancel(&task_id).await?),
        TaskCommand::Archive { task_id } => ui::print_task(&tasks.archive(&task_id).await?),
    }

    let notifier = coordinator.finish().await;
    if let Some(task_id) = touched {
        ui::print_jobs(&notifier.jobs_for(&task_id).await);
    }
    Ok(())
}

async fn modem(config: &BinwatchConfig, cmd: ModemCommand, interrupt: &Interrupt) -> Result<()> {
    let out = spawn_modem(config, system_opener()?)?
        .run_until_interrupted(interrupt, |transport| run_modem(config, cmd, transport))
        .await;
    finished(out)
}

async fn run_modem(config: &BinwatchConfig, cmd: ModemCommand, transport: ModemTransport) -> Result<()> {
    connect_modem(&transport, &config.modem.port).await;
    match cmd {
        ModemCommand::Check => {
            ui::print_diagnosis(&transport.diagnose().await?);
            Ok(())
        }
        ModemCommand::Send { number, message, pdu } => {
            let mode = if pdu { SendMode::Pdu } else { SendMode::Text };
            let progress = Progress::start(&format!("Sending to {number}"));
            match transport.send(&number, &message, mode).await {
                Ok(receipt) => {
                    progress.succeed(&format!("SMS sent to {number}"));
                    ui::print_receipt(&receipt);
                    Ok(())
                }
                Err(e) => {
                    progress.fail(&format!("Send failed: {e}"));
                    Err(e.into())
                }
            }
        }
    }
}

fn demo_config(mut config: BinwatchConfig) -> BinwatchConfig {
    config.modem.port = "/dev/ttySIM0".into();
    config.store.path = None;
    config.push.webhook_url = None;
    config.assignment.auto_assign = true;
    if config.bins.is_empty() {
        config.bins = vec![
            BinInfo {
                id: "bin1".into(),
                name: None,
                location: Some("Central Plaza".into()),
            },
            BinInfo {
                id: "bin2".into(),
                name: Some("Market Row".into()),
                location: Some("Public Market, Stall 14".into()),
            },
        ];
    }
    if config.staff.is_empty() {
        config.staff = vec![
            StaffMember {
                id: "s-1".into(),
                name: "Josh Canillas".into(),
                phone: Some("+639171234567".into()),
                push_token: Some("demo-token-1".into()),
                available: true,
            },
            StaffMember {
                id: "s-2".into(),
                name: "Ana Reyes".into(),
                phone: Some("+639179876543".into()),
                push_token: None,
                available: true,
            },
        ];
    }
    config
}

async fn demo(config: BinwatchConfig, interrupt: &Interrupt) -> Result<()> {
    let config = demo_config(config);
    let sim = SimulatedOpener::new(SimProfile::default());
    let out = spawn_modem(&config, Arc::new(sim.clone()))?
        .run_until_interrupted(interrupt, |transport| run_demo(&config, transport))
        .await;
    finished(out)?;

    println!();
    for sms in sim.sent() {
        println!(
            "{} {}\n{}\n",
            console::Style::new().cyan().apply_to("SMS to"),
            sms.number.as_deref().unwrap_or("?"),
            sms.body
        );
    }
    Ok(())
}

async fn run_demo(config: &BinwatchConfig, transport: ModemTransport) -> Result<()> {
    connect_modem(&transport, &config.modem.port).await;
    let coordinator = Coordinator::from_config(config, Some(Arc::new(transport) as Arc<dyn SmsSender>)).await?;

    let reading = |bin: &str, level: f64, weight: f64| BinReading {
        bin_id: bin.into(),
        level_percent: level,
        weight_kg: weight,
        height_percent: level * 0.9,
        gps_valid: true,
        satellite_count: 7,
        timestamp: Utc::now(),
    };

    let mut created = Vec::new();
    for r in [
        reading("bin1", 42.0, 0.012),
        reading("bin1", 84.0, 0.041),
        reading("bin1", 88.0, 0.043),
        reading("bin1", 97.0, 0.052),
        reading("bin2", 91.0, 1.75),
    ] {
        println!(
            "{} at {:.0}%",
            console::Style::new().bold().apply_to(&r.bin_id),
            r.level_percent
        );
        let report = coordinator.ingest(&r).await?;
        ui::print_ingest(&report);
        if let Some(id) = report.outcome.created_task_id() {
            created.push(id.to_string());
        }
    }

    let manual = coordinator
        .lifecycle()
        .create(
            NewTask::manual("bin2", "Public Market, Stall 14", binwatch::tasks::Priority::Medium)
                .with_notes("Vendor reports a broken lid and spilled refuse around the base of the bin"),
        )
        .await?;
    coordinator
        .lifecycle()
        .assign(&manual.id, "s-2", Some("Dispatcher"))
        .await?;
    created.push(manual.id);

    let notifier = coordinator.finish().await;
    println!();
    for id in &created {
        println!("{}", console::Style::new().dim().apply_to(id));
        ui::print_jobs(&notifier.jobs_for(id).await);
    }
    Ok(())
}
