//! Harness (C7): a bounded command queue driving the engine through its
//! lifecycle, plus SIGINT/SIGTSTP handling with force-quit-on-repeat.

use std::rc::Rc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;

use csyn_bridge::DspBridge;
use csyn_core::CsynResult;

use crate::engine::Engine;

const COMMAND_QUEUE_CAPACITY: usize = 64;

/// Sum-typed harness commands; each knows how to apply itself to an
/// [`Engine`].
#[derive(Debug, Clone)]
pub enum Command {
    BootServer,
    StartEngine,
    StopEngine(bool),
    QuitServer(bool),
    ToggleEngine,
    ToggleServer,
    Exit(bool),
}

impl Command {
    async fn apply<B: DspBridge + 'static>(&self, engine: &Engine<B>) -> CsynResult<bool> {
        match self {
            Command::BootServer => {
                engine.boot_server().await?;
                Ok(false)
            }
            Command::StartEngine => {
                engine.start();
                Ok(false)
            }
            Command::StopEngine(graceful) => {
                engine.stop(*graceful).await?;
                Ok(false)
            }
            Command::QuitServer(graceful) => {
                engine.quit_server(*graceful).await?;
                Ok(false)
            }
            Command::ToggleEngine => {
                if engine.is_running() {
                    engine.stop(true).await?;
                } else {
                    engine.start();
                }
                Ok(false)
            }
            Command::ToggleServer => {
                // Mirrors ToggleEngine one layer up: server state tracks
                // `bridge.is_running()`, which boot_server/quit_server
                // already guard idempotently.
                if engine.server_running() {
                    engine.quit_server(true).await?;
                } else {
                    engine.boot_server().await?;
                }
                Ok(false)
            }
            Command::Exit(graceful) => {
                engine.quit_server(*graceful).await?;
                Ok(true)
            }
        }
    }
}

/// Owns the command queue and exit signal; `run()` is the harness's single
/// cooperative dispatch loop.
pub struct Harness<B: DspBridge + 'static> {
    engine: Engine<B>,
    sender: mpsc::Sender<Command>,
    receiver: tokio::sync::Mutex<mpsc::Receiver<Command>>,
    sigint_count: Arc<AtomicU32>,
    sigtstp_count: Arc<AtomicU32>,
}

impl<B: DspBridge + 'static> Harness<B> {
    pub fn new(engine: Engine<B>) -> Self {
        let (sender, receiver) = mpsc::channel(COMMAND_QUEUE_CAPACITY);
        Self {
            engine,
            sender,
            receiver: tokio::sync::Mutex::new(receiver),
            sigint_count: Arc::new(AtomicU32::new(0)),
            sigtstp_count: Arc::new(AtomicU32::new(0)),
        }
    }

    pub fn sender(&self) -> mpsc::Sender<Command> {
        self.sender.clone()
    }

    /// Enqueues `BootServer` then `StartEngine`, installs signal handlers,
    /// and loops pulling commands until an `Exit` command runs.
    pub async fn run(self: Rc<Self>) -> CsynResult<()> {
        self.sender.send(Command::BootServer).await.ok();
        self.sender.send(Command::StartEngine).await.ok();

        self.spawn_signal_handler(
            tokio::signal::unix::SignalKind::interrupt(),
            self.sigint_count.clone(),
        );
        self.spawn_signal_handler(
            tokio::signal::unix::SignalKind::from_raw(20), // SIGTSTP
            self.sigtstp_count.clone(),
        );

        loop {
            let command = {
                let mut receiver = self.receiver.lock().await;
                match receiver.recv().await {
                    Some(command) => command,
                    None => break,
                }
            };
            log::info!("executing command: {command:?}");
            let should_exit = command.apply(&self.engine).await?;
            if should_exit {
                break;
            }
        }
        log::info!("... harness done");
        Ok(())
    }

    fn spawn_signal_handler(&self, kind: tokio::signal::unix::SignalKind, counter: Arc<AtomicU32>) {
        let sender = self.sender.clone();
        tokio::task::spawn_local(async move {
            let mut stream = match tokio::signal::unix::signal(kind) {
                Ok(stream) => stream,
                Err(e) => {
                    log::warn!("failed to install signal handler: {e}");
                    return;
                }
            };
            while stream.recv().await.is_some() {
                let count = counter.fetch_add(1, Ordering::SeqCst) + 1;
                let graceful = count < 2;
                log::warn!("caught signal (occurrence {count}); graceful={graceful}");
                let _ = sender.send(Command::Exit(graceful)).await;
            }
        });
    }
}
