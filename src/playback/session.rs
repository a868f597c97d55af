use std::sync::{Arc, Mutex, MutexGuard};

use crate::audio::Volume;
use crate::core::{PlayerConfig, PlayerError, Result};
use crate::playback::events::{EventSink, PlayerEvent, Subscription};
use crate::playback::pipeline::{Pipeline, PipelineEnd};
use crate::video::{FrameSink, StreamInfo, StreamProber};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackState {
    Idle,
    Starting,
    Playing,
    Paused,
    Stopped,
    Error,
}

struct StateCell {
    state: PlaybackState,
    /// Bumped whenever the active pipeline is replaced; stale workers compare against it.
    generation: u64,
}

struct Active {
    pipeline: Pipeline,
    subscription: Subscription,
}

struct Control {
    source: Option<StreamInfo>,
    active: Option<Active>,
    /// Resume point while paused, last known clock position otherwise.
    position: f64,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Control surface of the player. Every operation may be called from any thread.
pub struct PlaybackSession {
    config: PlayerConfig,
    control: Mutex<Control>,
    state: Arc<Mutex<StateCell>>,
    volume: Arc<Volume>,
    events: Arc<dyn EventSink>,
    frames: Arc<dyn FrameSink>,
}

impl PlaybackSession {
    pub fn new(config: PlayerConfig, events: Arc<dyn EventSink>, frames: Arc<dyn FrameSink>) -> Self {
        let volume = Arc::new(Volume::new(config.volume));
        Self {
            config,
            control: Mutex::new(Control {
                source: None,
                active: None,
                position: 0.0,
            }),
            state: Arc::new(Mutex::new(StateCell {
                state: PlaybackState::Idle,
                generation: 0,
            })),
            volume,
            events,
            frames,
        }
    }

    pub fn state(&self) -> PlaybackState {
        lock(&self.state).state
    }

    pub fn get_state(&self) -> PlaybackState {
        self.state()
    }

    /// Duration reported for the current source, 0 when unknown.
    pub fn duration(&self) -> f64 {
        lock(&self.control).source.as_ref().map_or(0.0, |s| s.duration)
    }

    /// Audio clock position of the live pipeline, or the stored position when none is running.
    pub fn position(&self) -> f64 {
        let control = lock(&self.control);
        match &control.active {
            Some(active) => active.pipeline.position(),
            None => control.position,
        }
    }

    pub fn volume(&self) -> f32 {
        self.volume.get()
    }

    /// Clamp to [0, 1] and apply to the live pipeline and every later one. Returns the stored gain.
    pub fn set_volume(&self, volume: f32) -> f32 {
        let stored = self.volume.set(volume);
        log::debug!("Volume set to {:.2}", stored);
        stored
    }

    pub fn play(&self, source: &str) -> Result<()> {
        self.play_from(source, 0.0)
    }

    /// Resolve `source` and start playing at `start_offset` seconds, replacing any current playback.
    pub fn play_from(&self, source: &str, start_offset: f64) -> Result<()> {
        let generation = {
            let mut control = lock(&self.control);
            self.teardown(&mut control);
            control.source = None;
            control.position = 0.0;
            self.advance_generation(PlaybackState::Starting)
        };

        // resolution can take seconds; other operations stay responsive meanwhile
        let prober = StreamProber::new(&self.config.tools, &self.config.resolve);
        let info = match prober.resolve(source) {
            Ok(info) => info,
            Err(e) => {
                log::error!("Failed to resolve {}: {}", source, e);
                if self.set_state_if_current(generation, PlaybackState::Error) {
                    self.events.notify(PlayerEvent::Error(e.to_string()));
                }
                return Err(e.into());
            }
        };

        let mut control = lock(&self.control);
        if lock(&self.state).generation != generation {
            log::info!("Playback of {} was superseded while resolving", source);
            return Ok(());
        }

        let offset = clamp_offset(start_offset, info.duration);
        self.events.notify(PlayerEvent::DurationFound(info.duration));
        control.source = Some(info);
        self.start_pipeline(&mut control, offset)
    }

    /// Restart playback at `seconds`, clamped to the source duration.
    ///
    /// While paused only the resume point moves.
    pub fn seek(&self, seconds: f64) -> Result<()> {
        let mut control = lock(&self.control);
        let state = self.state();
        let duration = match &control.source {
            Some(source) => source.duration,
            None => return Err(PlayerError::InvalidState { operation: "seek", state }),
        };
        if state == PlaybackState::Starting {
            return Err(PlayerError::InvalidState { operation: "seek", state });
        }

        let target = clamp_offset(seconds, duration);
        log::info!("Seeking to {:.3}s", target);

        if state == PlaybackState::Paused {
            control.position = target;
            return Ok(());
        }

        self.teardown(&mut control);
        self.advance_generation(PlaybackState::Starting);
        self.start_pipeline(&mut control, target)
    }

    pub fn pause(&self) -> Result<()> {
        let mut control = lock(&self.control);
        let state = self.state();
        if state != PlaybackState::Playing {
            return Err(PlayerError::InvalidState { operation: "pause", state });
        }

        let position = control.active.as_ref().map_or(control.position, |a| a.pipeline.position());
        self.teardown(&mut control);
        control.position = position;
        self.transition(PlaybackState::Paused);
        log::info!("Paused at {:.3}s", position);
        Ok(())
    }

    pub fn resume(&self) -> Result<()> {
        let mut control = lock(&self.control);
        let state = self.state();
        if state != PlaybackState::Paused {
            return Err(PlayerError::InvalidState { operation: "resume", state });
        }

        let position = control.position;
        log::info!("Resuming at {:.3}s", position);
        self.advance_generation(PlaybackState::Starting);
        self.start_pipeline(&mut control, position)
    }

    /// Stop everything. Idempotent; concurrent callers wait for the first teardown to finish.
    pub fn stop(&self) {
        let mut control = lock(&self.control);
        let position = control.active.as_ref().map(|a| a.pipeline.position());
        if let Some(position) = position {
            control.position = position;
        }
        self.teardown(&mut control);

        let changed = {
            let mut cell = lock(&self.state);
            cell.generation += 1;
            let changed = cell.state != PlaybackState::Stopped;
            cell.state = PlaybackState::Stopped;
            changed
        };
        if changed {
            log::info!("Playback stopped");
            self.events.notify(PlayerEvent::StateChanged(PlaybackState::Stopped));
        }
    }

    #[cfg(test)]
    pub(crate) fn decoder_pids(&self) -> Vec<u32> {
        lock(&self.control)
            .active
            .as_ref()
            .map(|a| a.pipeline.decoder_pids())
            .unwrap_or_default()
    }

    /// Detach the old pipeline's subscribers first so nothing from it reaches the sinks, then stop it.
    fn teardown(&self, control: &mut Control) {
        if let Some(mut active) = control.active.take() {
            active.subscription.detach();
            active.pipeline.shutdown();
        }
    }

    fn start_pipeline(&self, control: &mut Control, offset: f64) -> Result<()> {
        let info = match &control.source {
            Some(info) => info.clone(),
            None => {
                return Err(PlayerError::InvalidState {
                    operation: "start playback",
                    state: self.state(),
                })
            }
        };
        let generation = lock(&self.state).generation;
        let subscription = Subscription::new(self.events.clone(), self.frames.clone());

        let on_finished = {
            let state = self.state.clone();
            let events = subscription.clone();
            Box::new(move |end: PipelineEnd| {
                let next = match end {
                    PipelineEnd::Completed => PlaybackState::Stopped,
                    PipelineEnd::StreamFailed(kind) => {
                        log::error!("Playback failed: {} stream produced no data", kind);
                        PlaybackState::Error
                    }
                };
                let changed = {
                    let mut cell = lock(&state);
                    // a decoder can fail before the pipeline is marked as playing
                    let live = matches!(cell.state, PlaybackState::Starting | PlaybackState::Playing);
                    if cell.generation == generation && live {
                        cell.state = next;
                        true
                    } else {
                        false
                    }
                };
                if changed {
                    events.emit(PlayerEvent::StateChanged(next));
                    if end == PipelineEnd::Completed {
                        events.emit(PlayerEvent::EndOfStream);
                    }
                }
            })
        };

        match Pipeline::start(&info, offset, &self.config, self.volume.clone(), subscription.clone(), on_finished) {
            Ok(pipeline) => {
                control.position = offset;
                control.active = Some(Active { pipeline, subscription });
                let promoted = {
                    let mut cell = lock(&self.state);
                    let promoted = cell.generation == generation && cell.state == PlaybackState::Starting;
                    if promoted {
                        cell.state = PlaybackState::Playing;
                    }
                    promoted
                };
                if promoted {
                    log::debug!("Playback state -> {:?}", PlaybackState::Playing);
                    self.events.notify(PlayerEvent::StateChanged(PlaybackState::Playing));
                }
                Ok(())
            }
            Err(e) => {
                log::error!("Failed to start playback at {:.3}s: {}", offset, e);
                subscription.detach();
                self.transition(PlaybackState::Error);
                self.events.notify(PlayerEvent::Error(e.to_string()));
                Err(e)
            }
        }
    }

    /// Invalidate the previous pipeline's completion callback and enter `next`.
    fn advance_generation(&self, next: PlaybackState) -> u64 {
        let (generation, changed) = {
            let mut cell = lock(&self.state);
            cell.generation += 1;
            let changed = cell.state != next;
            cell.state = next;
            (cell.generation, changed)
        };
        if changed {
            self.events.notify(PlayerEvent::StateChanged(next));
        }
        generation
    }

    fn transition(&self, next: PlaybackState) {
        let changed = {
            let mut cell = lock(&self.state);
            let changed = cell.state != next;
            cell.state = next;
            changed
        };
        if changed {
            log::debug!("Playback state -> {:?}", next);
            self.events.notify(PlayerEvent::StateChanged(next));
        }
    }

    fn set_state_if_current(&self, generation: u64, next: PlaybackState) -> bool {
        {
            let mut cell = lock(&self.state);
            if cell.generation != generation {
                return false;
            }
            cell.state = next;
        }
        self.events.notify(PlayerEvent::StateChanged(next));
        true
    }
}

impl Drop for PlaybackSession {
    fn drop(&mut self) {
        self.stop();
    }
}

fn clamp_offset(seconds: f64, duration: f64) -> f64 {
    if !seconds.is_finite() || seconds < 0.0 {
        return 0.0;
    }
    if duration > 0.0 {
        seconds.min(duration)
    } else {
        seconds
    }
}
