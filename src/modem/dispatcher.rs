//! Single-owner access to the modem. One worker thread owns the
//! [`ModemSession`] and drains a bounded FIFO; callers hold a cloneable
//! [`ModemTransport`] and await a oneshot reply. Exchanges never interleave.

use std::future::Future;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};

use super::at::AtResponse;
use super::session::{ModemDiagnosis, ModemSession, ModemState, SendMode, SmsReceipt};
use crate::error::ModemError;
use crate::interrupt::Interrupt;
use crate::notify::SmsSender;

type Reply<T> = oneshot::Sender<Result<T, ModemError>>;

enum Request {
    Connect(Reply<()>),
    Open(Reply<()>),
    Initialize(Reply<()>),
    ConfigureSmsc(Option<String>, Reply<()>),
    Send {
        number: String,
        message: String,
        mode: SendMode,
        reply: Reply<SmsReceipt>,
    },
    Execute(String, Reply<AtResponse>),
    Diagnose(Reply<ModemDiagnosis>),
    Status(Reply<ModemState>),
    Close(Reply<()>),
    Shutdown(oneshot::Sender<()>),
}

/// Owns the worker thread.
pub struct ModemDispatcher {
    transport: ModemTransport,
    worker: Option<std::thread::JoinHandle<()>>,
}

impl ModemDispatcher {
    /// Move `session` onto its own thread. At most `capacity` requests wait
    /// in the queue; further callers wait for space.
    pub fn spawn(session: ModemSession, capacity: usize) -> std::io::Result<Self> {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let worker = std::thread::Builder::new()
            .name("binwatch-modem".into())
            .spawn(move || run(session, rx))?;
        Ok(Self {
            transport: ModemTransport { tx },
            worker: Some(worker),
        })
    }

    pub fn transport(&self) -> ModemTransport {
        self.transport.clone()
    }

    /// Run `work` against the transport until it finishes or `interrupt` is
    /// raised, then shut down. The port is closed on both paths; an exchange
    /// already on the wire completes or times out first.
    pub async fn run_until_interrupted<T, F, Fut>(self, interrupt: &Interrupt, work: F) -> Option<T>
    where
        F: FnOnce(ModemTransport) -> Fut,
        Fut: Future<Output = T>,
    {
        let out = interrupt.guard(work(self.transport())).await;
        self.shutdown().await;
        out
    }

    /// Let queued exchanges finish, close the port, and join the worker.
    pub async fn shutdown(mut self) {
        let (tx, rx) = oneshot::channel();
        if self.transport.tx.send(Request::Shutdown(tx)).await.is_ok() {
            let _ = rx.await;
        }
        if let Some(worker) = self.worker.take() {
            match tokio::task::spawn_blocking(move || worker.join()).await {
                Ok(Ok(())) => {}
                _ => tracing::warn!("Modem worker did not stop cleanly"),
            }
        }
        tracing::info!("Modem dispatcher shut down");
    }
}

fn run(mut session: ModemSession, mut rx: mpsc::Receiver<Request>) {
    tracing::debug!("Modem dispatcher started for {}", session.settings().port);
    while let Some(request) = rx.blocking_recv() {
        match request {
            Request::Connect(reply) => {
                let _ = reply.send(session.connect());
            }
            Request::Open(reply) => {
                let _ = reply.send(session.open());
            }
            Request::Initialize(reply) => {
                let _ = reply.send(session.initialize());
            }
            Request::ConfigureSmsc(smsc, reply) => {
                let _ = reply.send(session.configure_smsc(smsc.as_deref()));
            }
            Request::Send {
                number,
                message,
                mode,
                reply,
            } => {
                let _ = reply.send(session.send_sms(&number, &message, mode));
            }
            Request::Execute(command, reply) => {
                let _ = reply.send(session.execute(&command));
            }
            Request::Diagnose(reply) => {
                let _ = reply.send(Ok(session.diagnose()));
            }
            Request::Status(reply) => {
                let _ = reply.send(Ok(session.state()));
            }
            Request::Close(reply) => {
                session.close();
                let _ = reply.send(Ok(()));
            }
            Request::Shutdown(ack) => {
                session.close();
                let _ = ack.send(());
                break;
            }
        }
    }
    session.close();
    tracing::debug!("Modem dispatcher stopped");
}

/// Cloneable front for the modem. Every call is queued behind earlier ones.
#[derive(Clone)]
pub struct ModemTransport {
    tx: mpsc::Sender<Request>,
}

impl ModemTransport {
    async fn call<T>(&self, make: impl FnOnce(Reply<T>) -> Request) -> Result<T, ModemError> {
        let (tx, rx) = oneshot::channel();
        self.tx
            .send(make(tx))
            .await
            .map_err(|_| ModemError::DispatcherClosed)?;
        rx.await.map_err(|_| ModemError::DispatcherClosed)?
    }

    /// open → initialize → configure SMSC.
    pub async fn connect(&self) -> Result<(), ModemError> {
        self.call(Request::Connect).await
    }

    pub async fn open(&self) -> Result<(), ModemError> {
        self.call(Request::Open).await
    }

    pub async fn initialize(&self) -> Result<(), ModemError> {
        self.call(Request::Initialize).await
    }

    pub async fn configure_smsc(&self, smsc: Option<String>) -> Result<(), ModemError> {
        self.call(|reply| Request::ConfigureSmsc(smsc, reply)).await
    }

    pub async fn send(&self, number: &str, message: &str, mode: SendMode) -> Result<SmsReceipt, ModemError> {
        self.call(|reply| Request::Send {
            number: number.to_string(),
            message: message.to_string(),
            mode,
            reply,
        })
        .await
    }

    pub async fn execute_command(&self, command: &str) -> Result<AtResponse, ModemError> {
        self.call(|reply| Request::Execute(command.to_string(), reply)).await
    }

    pub async fn diagnose(&self) -> Result<ModemDiagnosis, ModemError> {
        self.call(Request::Diagnose).await
    }

    pub async fn state(&self) -> Result<ModemState, ModemError> {
        self.call(Request::Status).await
    }

    pub async fn close(&self) -> Result<(), ModemError> {
        self.call(Request::Close).await
    }
}

#[async_trait]
impl SmsSender for ModemTransport {
    async fn send_sms(&self, number: &str, message: &str) -> Result<SmsReceipt, ModemError> {
        self.send(number, message, SendMode::Text).await
    }
}
