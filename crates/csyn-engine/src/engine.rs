//! The engine (C6): wires the corpus index, analysis window, buffer cache,
//! pattern scheduler and DSP bridge into the cooperative event loop
//! described in the concurrency model. State lives behind `Rc<RefCell<_>>`
//! rather than `Arc<Mutex<_>>` on purpose: everything here runs on one
//! `LocalSet`, so only one task ever touches it at a time and a real lock
//! would just be overhead.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::sync::{broadcast, oneshot};
use tokio::task::JoinHandle;
use uuid::Uuid;

use csyn_bridge::DspBridge;
use csyn_buffers::{BufferCache, BufferSource};
use csyn_core::{CsynResult, EngineConfig, FeatureFrame, Holder, NodeId};
use csyn_index::DescriptorIndex;
use csyn_patterns::{NoteEvent, PatternFactory};
use csyn_window::AnalysisWindow;

use crate::voice::run_voice;

const ANALYSIS_BLUEPRINT: &str = "analysis";
const REVERB_BLUEPRINT: &str = "reverb";

pub(crate) struct EngineState {
    pub(crate) window: AnalysisWindow,
    pub(crate) buffers: BufferCache,
    pub(crate) voices: HashMap<Uuid, oneshot::Receiver<()>>,
    pub(crate) is_running: bool,
}

/// Synthesis engine: the process that turns analysis targets into playing
/// voices and keeps the buffer cache consistent as they start and stop.
pub struct Engine<B: DspBridge + 'static> {
    config: Rc<EngineConfig>,
    bridge: Arc<B>,
    index: Arc<DescriptorIndex>,
    pub(crate) state: Rc<RefCell<EngineState>>,
    pub(crate) voice_shutdown: broadcast::Sender<()>,
    poller: Rc<RefCell<Option<JoinHandle<()>>>>,
    analysis_task: Rc<RefCell<Option<JoinHandle<()>>>>,
    node_end_task: Rc<RefCell<Option<JoinHandle<()>>>>,
}

impl<B: DspBridge + 'static> Clone for Engine<B> {
    fn clone(&self) -> Self {
        Self {
            config: self.config.clone(),
            bridge: self.bridge.clone(),
            index: self.index.clone(),
            state: self.state.clone(),
            voice_shutdown: self.voice_shutdown.clone(),
            poller: self.poller.clone(),
            analysis_task: self.analysis_task.clone(),
            node_end_task: self.node_end_task.clone(),
        }
    }
}

impl<B: DspBridge + 'static> Engine<B> {
    pub fn new(config: EngineConfig, bridge: Arc<B>, index: Arc<DescriptorIndex>) -> Self {
        let history_size = config.history_size;
        let root_path = index.root_path().clone();
        let (voice_shutdown, _) = broadcast::channel(1);
        Self {
            config: Rc::new(config),
            bridge,
            index,
            state: Rc::new(RefCell::new(EngineState {
                window: AnalysisWindow::new(history_size),
                buffers: BufferCache::new(root_path),
                voices: HashMap::new(),
                is_running: false,
            })),
            voice_shutdown,
            poller: Rc::new(RefCell::new(None)),
            analysis_task: Rc::new(RefCell::new(None)),
            node_end_task: Rc::new(RefCell::new(None)),
        }
    }

    pub fn is_running(&self) -> bool {
        self.state.borrow().is_running
    }

    pub fn server_running(&self) -> bool {
        self.bridge.is_running()
    }

    pub fn active_voice_count(&self) -> usize {
        self.state.borrow().voices.len()
    }

    /// Idempotent: boots the DSP server, subscribes to `/analysis` and
    /// `/n_end`, and adds the live-analysis and reverb synths in one timed
    /// transaction.
    pub async fn boot_server(&self) -> CsynResult<()> {
        if self.bridge.is_running() {
            log::warn!("server already booted");
            return Ok(());
        }
        self.bridge.clock_start();
        self.bridge
            .boot(self.config.input_count, self.config.output_count)
            .await?;

        let mut analysis_rx = self.bridge.subscribe_analysis();
        let engine = self.clone();
        *self.analysis_task.borrow_mut() = Some(tokio::task::spawn_local(async move {
            while let Ok(event) = analysis_rx.recv().await {
                engine.state.borrow_mut().window.intake(FeatureFrame {
                    peak: event.peak,
                    rms: event.rms,
                    f0: event.f0_midi,
                    is_voiced: event.is_voiced,
                    is_onset: event.is_onset,
                    centroid: event.centroid,
                    flatness: event.flatness,
                    rolloff: event.rolloff,
                    mfcc: event.mfcc,
                });
            }
        }));

        let mut node_end_rx = self.bridge.subscribe_node_end();
        let engine = self.clone();
        *self.node_end_task.borrow_mut() = Some(tokio::task::spawn_local(async move {
            while let Ok(event) = node_end_rx.recv().await {
                engine.on_n_end(event.node_id);
            }
        }));

        let mut txn = self.bridge.at(self.bridge.now());
        txn.add_synth(
            ANALYSIS_BLUEPRINT,
            vec![
                ("in".into(), (self.config.input_bus as i64).into()),
                (
                    "pitch_detection_min_frequency".into(),
                    self.config.pitch_detection_min_frequency.into(),
                ),
                (
                    "pitch_detection_max_frequency".into(),
                    self.config.pitch_detection_max_frequency.into(),
                ),
                ("mfcc_count".into(), (self.config.mfcc_count as i64).into()),
            ],
        );
        txn.add_synth(
            REVERB_BLUEPRINT,
            vec![
                ("in".into(), (self.config.output_bus as i64).into()),
                ("out".into(), (self.config.output_bus as i64).into()),
                ("mix".into(), self.config.reverb_mix.into()),
            ],
        );
        txn.commit();
        log::info!("... server booted");
        Ok(())
    }

    /// Idempotent: marks the engine running and spawns the analysis poller.
    pub fn start(&self) {
        if self.state.borrow().is_running {
            log::warn!("engine already started");
            return;
        }
        self.state.borrow_mut().is_running = true;

        let engine = self.clone();
        *self.poller.borrow_mut() = Some(tokio::task::spawn_local(async move {
            loop {
                if !engine.state.borrow().is_running {
                    break;
                }
                let (target, min_sleep, max_sleep) = engine.state.borrow().window.emit();
                if let Some(target) = target {
                    engine.on_analysis_target(target).await;
                }
                let wait = {
                    let mut rng = rand::rng();
                    if max_sleep > min_sleep {
                        rng.random_range(min_sleep..max_sleep)
                    } else {
                        min_sleep
                    }
                };
                tokio::time::sleep(Duration::from_secs_f64(wait.max(0.0))).await;
            }
        }));
        log::info!("... engine started");
    }

    /// Idempotent. `graceful`: signal every active voice to stop and await
    /// its completion promise. Non-graceful: force-release every voice's
    /// buffer references immediately without waiting.
    pub async fn stop(&self, graceful: bool) -> CsynResult<()> {
        if !self.state.borrow().is_running {
            log::warn!("engine already stopped");
            return Ok(());
        }
        self.state.borrow_mut().is_running = false;
        if let Some(handle) = self.poller.borrow_mut().take() {
            handle.abort();
        }

        if graceful {
            let _ = self.voice_shutdown.send(());
            let receivers: Vec<oneshot::Receiver<()>> =
                self.state.borrow_mut().voices.drain().map(|(_, rx)| rx).collect();
            for rx in receivers {
                let _ = rx.await;
            }
        } else {
            let uuids: Vec<Uuid> = self.state.borrow().voices.keys().copied().collect();
            let mut txn = self.bridge.at(self.bridge.now());
            for uuid in uuids {
                if let Err(e) = self
                    .state
                    .borrow_mut()
                    .buffers
                    .decrement(Holder::Voice(uuid), true, &mut txn)
                {
                    log::debug!("force stop: {e}");
                }
            }
            txn.commit();
            self.state.borrow_mut().voices.clear();
        }
        log::info!("... engine stopped (graceful={graceful})");
        Ok(())
    }

    pub async fn quit_server(&self, graceful: bool) -> CsynResult<()> {
        if !self.bridge.is_running() {
            log::warn!("server already quit");
            return Ok(());
        }
        self.stop(graceful).await?;
        if let Some(handle) = self.analysis_task.borrow_mut().take() {
            handle.abort();
        }
        if let Some(handle) = self.node_end_task.borrow_mut().take() {
            handle.abort();
        }
        self.bridge.quit().await?;
        self.bridge.clock_stop();
        log::info!("... server quit");
        Ok(())
    }

    async fn on_analysis_target(&self, target: csyn_core::AnalysisTarget) {
        let entries = self.index.query_target(&target);
        if entries.is_empty() {
            log::warn!("no corpus entries matched analysis target");
            return;
        }

        if self.config.polyphony > 0 && self.active_voice_count() >= self.config.polyphony {
            log::info!(
                "polyphony cap ({}) reached, skipping analysis target",
                self.config.polyphony
            );
            return;
        }

        let uuid = Uuid::new_v4();
        let partitions: Vec<_> = entries.into_iter().map(|(partition, _distance)| partition).collect();

        // increment_multiple never fails a single partition here: buffer ids
        // are allocated client-side, so a missing corpus file on disk only
        // surfaces later as an IoError from the DSP server's own load, not
        // from this call. The per-partition abandon-and-continue behavior
        // described for that failure belongs on the server side of the
        // bridge, not here.
        let buffers = {
            let mut txn = self.bridge.at(self.bridge.now());
            let buffers = self.state.borrow_mut().buffers.increment_multiple(
                partitions,
                Holder::Voice(uuid),
                &mut txn,
            );
            txn.commit();
            buffers
        };

        let seed = uuid.as_u128() as u64;
        let pattern = match PatternFactory::emit(&target, &buffers, self.config.output_bus as i64, seed) {
            Ok(pattern) => pattern,
            Err(e) => {
                log::warn!("pattern scheduler failed: {e}");
                return;
            }
        };

        let (tx, rx) = oneshot::channel();
        self.state.borrow_mut().voices.insert(uuid, rx);

        let engine = self.clone();
        let shutdown_rx = self.voice_shutdown.subscribe();
        tokio::task::spawn_local(run_voice(engine, uuid, pattern.into_events(), shutdown_rx, tx));
        log::info!("voice {uuid} started with {} buffers", buffers.len());
    }

    /// Adds the synth for `note` and attributes its buffer reference to the
    /// freshly assigned node, both inside one timed transaction.
    pub(crate) fn on_pattern_start(&self, note: &NoteEvent) -> NodeId {
        let mut txn = self.bridge.at(self.bridge.now());
        let node_id = txn.add_synth(note.blueprint_id.clone(), note.kwargs.clone());
        self.state.borrow_mut().buffers.increment(
            BufferSource::Handle(note.buffer_id),
            Holder::Node(node_id),
            &mut txn,
        );
        txn.commit();
        node_id
    }

    pub(crate) fn on_pattern_stop(&self, uuid: Uuid) {
        let mut txn = self.bridge.at(self.bridge.now());
        if let Err(e) = self
            .state
            .borrow_mut()
            .buffers
            .decrement(Holder::Voice(uuid), true, &mut txn)
        {
            log::debug!("voice {uuid} stop: {e}");
        }
        txn.commit();
        self.state.borrow_mut().voices.remove(&uuid);
        log::info!("voice {uuid} stopped");
    }

    fn on_n_end(&self, node_id: i64) {
        let mut txn = self.bridge.at(self.bridge.now());
        if let Err(e) = self
            .state
            .borrow_mut()
            .buffers
            .decrement(Holder::Node(NodeId(node_id)), true, &mut txn)
        {
            log::debug!("/n_end for unknown node {node_id}: {e}");
        }
        txn.commit();
    }
}
