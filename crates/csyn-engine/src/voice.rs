//! Background per-voice playback task. Sleeps out a pattern's deltas and
//! reports Start/Stop back into the engine; the engine itself remains the
//! only thing that ever mutates its core maps.

use tokio::sync::{broadcast, oneshot};
use uuid::Uuid;

use csyn_bridge::DspBridge;
use csyn_patterns::PatternEvent;

use crate::engine::Engine;

pub(crate) async fn run_voice<B: DspBridge + 'static>(
    engine: Engine<B>,
    uuid: Uuid,
    events: Vec<PatternEvent>,
    mut shutdown_rx: broadcast::Receiver<()>,
    completion: oneshot::Sender<()>,
) {
    for event in events {
        match event {
            PatternEvent::Start(note) => {
                let delay = tokio::time::sleep(std::time::Duration::from_secs_f64(note.delta.max(0.0)));
                tokio::select! {
                    _ = delay => {
                        engine.on_pattern_start(&note);
                    }
                    _ = shutdown_rx.recv() => break,
                }
            }
            PatternEvent::Stop => break,
        }
    }
    engine.on_pattern_stop(uuid);
    let _ = completion.send(());
}
