use crossbeam_channel::{bounded, Receiver};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::audio::{AudioClock, AudioDriver, Volume};
use crate::core::{PlayerConfig, PlayerError, Result, ShutdownConfig, StreamKind};
use crate::playback::events::Subscription;
use crate::playback::supervisor::DecodeSupervisor;
use crate::video::{FrameReader, RenderExit, RenderLoop, StreamInfo, VideoFrame};

/// How a pipeline ended without being stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineEnd {
    /// Every frame was shown and the audio played out.
    Completed,
    /// A decoder closed its output without producing anything.
    StreamFailed(StreamKind),
}

/// Called from a worker thread once a pipeline ends on its own.
pub type FinishedCallback = Box<dyn FnOnce(PipelineEnd) + Send + 'static>;

/// Hands the outcome to the callback at most once, whichever worker gets there first.
#[derive(Clone)]
struct Completion {
    callback: Arc<Mutex<Option<FinishedCallback>>>,
}

impl Completion {
    fn new(callback: FinishedCallback) -> Self {
        Self { callback: Arc::new(Mutex::new(Some(callback))) }
    }

    fn finish(&self, end: PipelineEnd) {
        let callback = match self.callback.lock() {
            Ok(mut slot) => slot.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(callback) = callback {
            callback(end);
        }
    }
}

/// Lets a worker bring the whole pipeline down after its stream failed.
#[derive(Clone)]
struct Halt {
    running: Arc<AtomicBool>,
    cancel: Arc<AtomicBool>,
    supervisor: Arc<DecodeSupervisor>,
}

impl Halt {
    fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    fn fail(&self, kind: StreamKind, completion: &Completion) {
        log::warn!("{} decoder produced no output, stopping pipeline", kind);
        self.running.store(false, Ordering::Release);
        self.cancel.store(true, Ordering::Release);
        self.supervisor.stop_all();
        completion.finish(PipelineEnd::StreamFailed(kind));
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Run `f` on a named thread. A panic is logged at the thread boundary instead of propagating.
pub(crate) fn spawn_worker<F>(name: &'static str, f: F) -> Result<JoinHandle<()>>
where
    F: FnOnce() + Send + 'static,
{
    thread::Builder::new()
        .name(format!("nox-{}", name))
        .spawn(move || {
            log::debug!("{} worker started", name);
            match panic::catch_unwind(AssertUnwindSafe(f)) {
                Ok(()) => log::debug!("{} worker exited", name),
                Err(payload) => log::error!("{} worker panicked: {}", name, panic_message(&*payload)),
            }
        })
        .map_err(|source| PlayerError::WorkerSpawn { name, source })
}

fn join_bounded(name: &str, handle: JoinHandle<()>, timeout: Duration) -> bool {
    let start_time = Instant::now();
    while !handle.is_finished() && start_time.elapsed() < timeout {
        thread::sleep(Duration::from_millis(10));
    }

    if handle.is_finished() {
        if let Err(e) = handle.join() {
            log::warn!("{} worker join failed: {:?}", name, e);
        }
        true
    } else {
        log::warn!("{} worker did not exit within {:?}, detaching it", name, timeout);
        false
    }
}

/// One running instance of decoders, reader, driver and render loop, started at a fixed offset.
///
/// Dropping it performs the same bounded shutdown as `shutdown`.
pub struct Pipeline {
    start_offset: f64,
    clock: Arc<AudioClock>,
    running: Arc<AtomicBool>,
    cancel: Arc<AtomicBool>,
    supervisor: Arc<DecodeSupervisor>,
    queue: Receiver<VideoFrame>,
    video_thread: Option<JoinHandle<()>>,
    audio_thread: Option<JoinHandle<()>>,
    render_thread: Option<JoinHandle<()>>,
    shutdown_config: ShutdownConfig,
    stopped: bool,
}

impl Pipeline {
    pub fn start(
        info: &StreamInfo,
        start_offset: f64,
        config: &PlayerConfig,
        volume: Arc<Volume>,
        subscription: Subscription,
        on_finished: FinishedCallback,
    ) -> Result<Self> {
        let (supervisor, streams) = DecodeSupervisor::start(
            &config.tools,
            &info.url,
            start_offset,
            config.resolve.reconnect_delay_max_secs,
            &config.audio,
        )?;

        let (frame_tx, frame_rx) = bounded::<VideoFrame>(config.sync.queue_capacity.max(1));
        let mut pipeline = Self {
            start_offset,
            clock: Arc::new(AudioClock::new(start_offset, config.audio.bytes_per_second())),
            running: Arc::new(AtomicBool::new(true)),
            cancel: Arc::new(AtomicBool::new(false)),
            supervisor: Arc::new(supervisor),
            queue: frame_rx.clone(),
            video_thread: None,
            audio_thread: None,
            render_thread: None,
            shutdown_config: config.shutdown.clone(),
            stopped: false,
        };

        // Any early return below drops `pipeline`, which stops whatever already started.
        let completion = Completion::new(on_finished);
        let halt = Halt {
            running: pipeline.running.clone(),
            cancel: pipeline.cancel.clone(),
            supervisor: pipeline.supervisor.clone(),
        };
        let audio_done = Arc::new(AtomicBool::new(false));
        let video_done = Arc::new(AtomicBool::new(false));

        let reader = FrameReader::new(info, start_offset, pipeline.running.clone(), config.sync.push_retry());
        let video_out = streams.video;
        let video_sub = subscription.clone();
        let video_halt = halt.clone();
        let video_completion = completion.clone();
        pipeline.video_thread = Some(spawn_worker("video", move || {
            let read = reader.run(video_out, &frame_tx, &video_sub);
            if read == 0 && video_halt.is_running() {
                video_halt.fail(StreamKind::Video, &video_completion);
            }
        })?);

        let driver = AudioDriver::new(
            pipeline.clock.clone(),
            volume,
            pipeline.running.clone(),
            pipeline.cancel.clone(),
            &config.audio,
        );
        let audio_out = streams.audio;
        let audio_sub = subscription.clone();
        let audio_flag = audio_done.clone();
        let video_flag = video_done.clone();
        let audio_completion = completion.clone();
        pipeline.audio_thread = Some(spawn_worker("audio", move || {
            let consumed = driver.run(audio_out, &audio_sub);
            if consumed == 0 && halt.is_running() {
                halt.fail(StreamKind::Audio, &audio_completion);
                return;
            }
            audio_flag.store(true, Ordering::Release);
            driver.hold_clock(&video_flag);
        })?);

        let mut render = RenderLoop::new(
            frame_rx,
            pipeline.clock.clone(),
            pipeline.running.clone(),
            subscription,
            &config.sync,
            info.frame_duration(),
        );
        let running = pipeline.running.clone();
        pipeline.render_thread = Some(spawn_worker("render", move || {
            let exit = render.run();
            video_done.store(true, Ordering::Release);
            if exit != RenderExit::EndOfStream {
                return;
            }
            while !audio_done.load(Ordering::Acquire) && running.load(Ordering::Acquire) {
                thread::sleep(Duration::from_millis(10));
            }
            if running.load(Ordering::Acquire) {
                let stats = render.stats();
                log::info!(
                    "Playback reached end of stream ({} frames shown, {} dropped)",
                    stats.delivered, stats.dropped
                );
                completion.finish(PipelineEnd::Completed);
            }
        })?);

        log::info!(
            "Pipeline started at {:.3}s ({}x{} @ {:.2}fps)",
            start_offset, info.width, info.height, info.fps
        );
        Ok(pipeline)
    }

    /// Audio clock position in seconds.
    pub fn position(&self) -> f64 {
        self.clock.position()
    }

    pub fn decoder_pids(&self) -> Vec<u32> {
        self.supervisor.pids().to_vec()
    }

    /// Signal every worker, kill the decoders and wait a bounded time for the threads.
    pub fn shutdown(&mut self) {
        if self.stopped {
            return;
        }
        self.stopped = true;
        log::debug!("Stopping pipeline started at {:.3}s", self.start_offset);

        self.running.store(false, Ordering::Release);
        self.cancel.store(true, Ordering::Release);

        // frees a reader blocked on a full queue
        let drained = self.queue.try_iter().count();
        if drained > 0 {
            log::debug!("Discarded {} queued frames", drained);
        }

        self.supervisor.stop_all();

        let cfg = &self.shutdown_config;
        let joins = [
            ("render", self.render_thread.take(), cfg.render_join_timeout_ms),
            ("audio", self.audio_thread.take(), cfg.audio_join_timeout_ms),
            ("video", self.video_thread.take(), cfg.video_join_timeout_ms),
        ];
        let mut all_joined = true;
        for (name, handle, timeout_ms) in joins {
            if let Some(handle) = handle {
                all_joined &= join_bounded(name, handle, Duration::from_millis(timeout_ms));
            }
        }

        if !all_joined {
            self.supervisor.stop_all();
        }
        log::info!("Pipeline stopped at {:.3}s", self.clock.position());
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        self.shutdown();
    }
}
