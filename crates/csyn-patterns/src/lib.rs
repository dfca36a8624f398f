//! Pattern scheduler (C4): turns an [`AnalysisTarget`] and a set of
//! [`BufferHandle`]s into a finite sequence of note events, one per
//! synthesis flavor.

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use csyn_core::{AnalysisTarget, BufferHandle, CsynError, CsynResult, Kwargs, PatternFlavor};

const PLAYBACK_BLUEPRINT: &str = "playback";
const GRANULATE_BLUEPRINT: &str = "granulate";
const WARP_BLUEPRINT: &str = "warp";

/// One scheduled note, carrying everything `add_synth` needs.
#[derive(Debug, Clone)]
pub struct NoteEvent {
    pub blueprint_id: String,
    pub kwargs: Kwargs,
    pub buffer_id: BufferHandle,
    /// Seconds to wait after the previous event before this one fires.
    pub delta: f64,
}

/// A fired pattern event. Within a single instant, `Start` always sorts
/// before `Stop`; the generated sequence never needs re-sorting since every
/// `Stop` is emitted last.
#[derive(Debug, Clone)]
pub enum PatternEvent {
    Start(NoteEvent),
    Stop,
}

impl PatternEvent {
    pub fn priority(&self) -> u8 {
        match self {
            PatternEvent::Start(_) => 0,
            PatternEvent::Stop => 1,
        }
    }
}

/// The note-event sequence for one voice: every event, materialised
/// eagerly since each flavor's iteration count is bounded.
pub struct Pattern {
    events: Vec<PatternEvent>,
}

impl Pattern {
    pub fn events(&self) -> &[PatternEvent] {
        &self.events
    }

    pub fn into_events(self) -> Vec<PatternEvent> {
        self.events
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

/// Picks the next index into `buffers`, forbidding immediate repetition
/// whenever there is more than one option.
fn choose_buffer_index(rng: &mut ChaCha8Rng, buffer_count: usize, previous: Option<usize>) -> usize {
    if buffer_count <= 1 {
        return 0;
    }
    loop {
        let candidate = rng.random_range(0..buffer_count);
        if Some(candidate) != previous {
            return candidate;
        }
    }
}

fn base_kwargs(rng: &mut ChaCha8Rng, out: i64, buffer_id: BufferHandle) -> Kwargs {
    vec![
        ("buffer_id".into(), (buffer_id.0).into()),
        ("out".into(), out.into()),
        ("gain".into(), rng.random_range(-24.0..0.0_f64).into()),
        ("panning".into(), rng.random_range(-1.0..1.0_f64).into()),
        ("duration".into(), 0.0_f64.into()),
    ]
}

/// Builds a [`Pattern`] for `target.pattern_flavor` from the provided
/// buffer handles, seeded for reproducible playback.
pub struct PatternFactory;

impl PatternFactory {
    pub fn emit(
        target: &AnalysisTarget,
        buffers: &[BufferHandle],
        out: i64,
        seed: u64,
    ) -> CsynResult<Pattern> {
        if buffers.is_empty() {
            return Err(CsynError::EmptyBufferList);
        }
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let events = match target.pattern_flavor {
            PatternFlavor::Basic => emit_basic(&mut rng, buffers, out),
            PatternFlavor::Granulate => emit_granulate(&mut rng, buffers, out),
            PatternFlavor::Warp => emit_warp(&mut rng, buffers, out),
        };
        Ok(Pattern { events })
    }
}

fn emit_basic(rng: &mut ChaCha8Rng, buffers: &[BufferHandle], out: i64) -> Vec<PatternEvent> {
    let iterations = rng.random_range(5..=25);
    let mut previous = None;
    let mut events = Vec::with_capacity(iterations + 1);
    for _ in 0..iterations {
        let index = choose_buffer_index(rng, buffers.len(), previous);
        previous = Some(index);
        let buffer_id = buffers[index];
        let mut kwargs = base_kwargs(rng, out, buffer_id);
        let delta = rng.random_range(0.0..0.25_f64);
        kwargs.push(("delta".into(), delta.into()));
        events.push(PatternEvent::Start(NoteEvent {
            blueprint_id: PLAYBACK_BLUEPRINT.into(),
            kwargs,
            buffer_id,
            delta,
        }));
    }
    events.push(PatternEvent::Stop);
    events
}

fn emit_granulate(rng: &mut ChaCha8Rng, buffers: &[BufferHandle], out: i64) -> Vec<PatternEvent> {
    let iterations = rng.random_range(1..=3);
    let mut previous = None;
    let mut events = Vec::with_capacity(iterations + 1);
    for _ in 0..iterations {
        let index = choose_buffer_index(rng, buffers.len(), previous);
        previous = Some(index);
        let buffer_id = buffers[index];
        let mut kwargs = base_kwargs(rng, out, buffer_id);
        kwargs.push((
            "time_scaling".into(),
            rng.random_range(1.0..4.0_f64).into(),
        ));
        let delta = rng.random_range(0.0..2.0_f64);
        kwargs.push(("delta".into(), delta.into()));
        events.push(PatternEvent::Start(NoteEvent {
            blueprint_id: GRANULATE_BLUEPRINT.into(),
            kwargs,
            buffer_id,
            delta,
        }));
    }
    events.push(PatternEvent::Stop);
    events
}

const OVERLAP_CHOICES: [i64; 3] = [2, 4, 8];

fn emit_warp(rng: &mut ChaCha8Rng, buffers: &[BufferHandle], out: i64) -> Vec<PatternEvent> {
    let iterations = rng.random_range(1..=5);
    let mut previous = None;
    let mut events = Vec::with_capacity(iterations + 1);
    for _ in 0..iterations {
        let index = choose_buffer_index(rng, buffers.len(), previous);
        previous = Some(index);
        let buffer_id = buffers[index];
        let mut kwargs = base_kwargs(rng, out, buffer_id);
        let overlaps = OVERLAP_CHOICES[rng.random_range(0..OVERLAP_CHOICES.len())];
        kwargs.push(("overlaps".into(), overlaps.into()));
        kwargs.push(("start".into(), rng.random_range(0.0..0.25_f64).into()));
        kwargs.push(("stop".into(), rng.random_range(0.75..1.0_f64).into()));
        kwargs.push((
            "transposition".into(),
            rng.random_range(-12.0..0.0_f64).into(),
        ));
        kwargs.push((
            "highpass_frequency".into(),
            rng.random_range(20.0..2000.0_f64).into(),
        ));
        let delta = rng.random_range(0.0..5.0_f64);
        kwargs.push(("delta".into(), delta.into()));
        events.push(PatternEvent::Start(NoteEvent {
            blueprint_id: WARP_BLUEPRINT.into(),
            kwargs,
            buffer_id,
            delta,
        }));
    }
    events.push(PatternEvent::Stop);
    events
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target_with_flavor(flavor: PatternFlavor) -> AnalysisTarget {
        AnalysisTarget {
            pattern_flavor: flavor,
            peak: 0.5,
            rms: -20.0,
            f0: 60.0,
            is_voiced: true,
            is_onset: 0.0,
            centroid: 1000.0,
            flatness: 0.1,
            rolloff: 5000.0,
            mfcc: vec![],
            k: 25,
        }
    }

    #[test]
    fn empty_buffer_list_is_rejected() {
        let target = target_with_flavor(PatternFlavor::Basic);
        let result = PatternFactory::emit(&target, &[], 0, 1);
        assert!(matches!(result, Err(CsynError::EmptyBufferList)));
    }

    #[test]
    fn basic_pattern_ends_with_exactly_one_stop() {
        let target = target_with_flavor(PatternFlavor::Basic);
        let buffers = [BufferHandle(0), BufferHandle(1)];
        let pattern = PatternFactory::emit(&target, &buffers, 0, 42).unwrap();
        let events = pattern.into_events();
        let stops = events
            .iter()
            .filter(|e| matches!(e, PatternEvent::Stop))
            .count();
        assert_eq!(stops, 1);
        assert!(matches!(events.last(), Some(PatternEvent::Stop)));
        assert!((5..=25).contains(&(events.len() - 1)));
    }

    #[test]
    fn same_seed_produces_same_sequence() {
        let target = target_with_flavor(PatternFlavor::Warp);
        let buffers = [BufferHandle(0), BufferHandle(1), BufferHandle(2)];
        let a = PatternFactory::emit(&target, &buffers, 0, 7).unwrap();
        let b = PatternFactory::emit(&target, &buffers, 0, 7).unwrap();
        let ids_a: Vec<_> = a.events().iter().filter_map(start_buffer_id).collect();
        let ids_b: Vec<_> = b.events().iter().filter_map(start_buffer_id).collect();
        assert_eq!(ids_a, ids_b);
    }

    #[test]
    fn never_repeats_the_same_buffer_consecutively_when_more_than_one_choice() {
        let target = target_with_flavor(PatternFlavor::Basic);
        let buffers = [BufferHandle(0), BufferHandle(1)];
        let pattern = PatternFactory::emit(&target, &buffers, 0, 99).unwrap();
        let ids: Vec<_> = pattern
            .events()
            .iter()
            .filter_map(start_buffer_id)
            .collect();
        for window in ids.windows(2) {
            assert_ne!(window[0], window[1]);
        }
    }

    #[test]
    fn single_buffer_is_reused_every_iteration() {
        let target = target_with_flavor(PatternFlavor::Granulate);
        let buffers = [BufferHandle(5)];
        let pattern = PatternFactory::emit(&target, &buffers, 0, 3).unwrap();
        for event in pattern.events() {
            if let PatternEvent::Start(note) = event {
                assert_eq!(note.buffer_id, BufferHandle(5));
            }
        }
    }

    fn start_buffer_id(event: &PatternEvent) -> Option<BufferHandle> {
        match event {
            PatternEvent::Start(note) => Some(note.buffer_id),
            PatternEvent::Stop => None,
        }
    }
}
