//! Single-owner audio output. One thread owns the output device; callers
//! talk to it through a command channel and get an async completion back.

use crate::error::PlaybackError;
use crate::synthesis::AudioClip;
use rodio::buffer::SamplesBuffer;
use rodio::source::EmptyCallback;
use rodio::{OutputStream, OutputStreamHandle, Sink};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::Mutex;
use std::thread::{self, JoinHandle};
use tokio::sync::oneshot;
use tracing::{debug, error, info};

/// How a clip ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlaybackOutcome {
    Completed,
    /// Cut short by `stop()` or by a newer clip.
    Stopped,
    Failed(String),
}

/// Something that can render one clip at a time. Lives on the playback
/// thread, so it does not need to be `Send` once opened.
pub trait OutputDevice {
    /// Begin playing `clip`, calling `on_finished` when the last sample has
    /// been rendered. Must return without waiting for the clip.
    fn start(&mut self, clip: AudioClip, on_finished: Box<dyn Fn() + Send>) -> Result<(), PlaybackError>;

    /// Stop whatever is playing and release the device.
    fn halt(&mut self);
}

/// The default device through rodio. The output stream is opened per clip
/// and dropped as soon as the clip ends or is halted.
pub struct RodioOutput {
    volume: f32,
    stream: Option<(OutputStream, OutputStreamHandle)>,
    sink: Option<Sink>,
}

impl RodioOutput {
    pub fn new(volume: f32) -> Self {
        Self {
            volume: volume.clamp(0.0, 1.0),
            stream: None,
            sink: None,
        }
    }
}

impl OutputDevice for RodioOutput {
    fn start(&mut self, clip: AudioClip, on_finished: Box<dyn Fn() + Send>) -> Result<(), PlaybackError> {
        self.halt();
        let (stream, handle) =
            OutputStream::try_default().map_err(|e| PlaybackError::DeviceUnavailable(e.to_string()))?;
        let sink = Sink::try_new(&handle).map_err(|e| PlaybackError::DeviceUnavailable(e.to_string()))?;
        sink.set_volume(self.volume);
        sink.append(SamplesBuffer::new(clip.channels, clip.sample_rate, clip.samples));
        sink.append(EmptyCallback::<f32>::new(on_finished));
        self.sink = Some(sink);
        self.stream = Some((stream, handle));
        Ok(())
    }

    fn halt(&mut self) {
        if let Some(sink) = self.sink.take() {
            sink.stop();
        }
        self.stream = None;
    }
}

/// Name of the default output device, if the host has one.
pub fn default_output_device_name() -> Option<String> {
    use rodio::cpal::traits::{DeviceTrait, HostTrait};
    rodio::cpal::default_host()
        .default_output_device()
        .and_then(|device| device.name().ok())
}

enum Command {
    Play {
        id: u64,
        clip: AudioClip,
        done: oneshot::Sender<PlaybackOutcome>,
    },
    Stop,
    Finished(u64),
    Shutdown,
}

/// Resolves when the clip it was returned for ends.
pub struct PlaybackCompletion {
    rx: oneshot::Receiver<PlaybackOutcome>,
}

impl PlaybackCompletion {
    pub async fn wait(self) -> PlaybackOutcome {
        self.rx
            .await
            .unwrap_or_else(|_| PlaybackOutcome::Failed(PlaybackError::DriverStopped.to_string()))
    }
}

/// Plays one clip at a time; a new `play` stops the current clip first.
pub struct PlaybackDriver {
    tx: Mutex<Sender<Command>>,
    next_id: AtomicU64,
    thread: Option<JoinHandle<()>>,
}

impl PlaybackDriver {
    /// Run the driver on a dedicated thread. `open` builds the device on that
    /// thread, since audio streams are usually tied to the thread that opened
    /// them.
    pub fn spawn<D, F>(open: F) -> Self
    where
        D: OutputDevice + 'static,
        F: FnOnce() -> D + Send + 'static,
    {
        let (tx, rx) = channel::<Command>();
        let loop_tx = tx.clone();
        let thread = thread::Builder::new()
            .name("speechout-playback".into())
            .spawn(move || run_loop(open(), rx, loop_tx))
            .map_err(|e| error!("Failed to start playback thread: {}", e))
            .ok();
        Self {
            tx: Mutex::new(tx),
            next_id: AtomicU64::new(1),
            thread,
        }
    }

    pub fn with_rodio(volume: f32) -> Self {
        Self::spawn(move || RodioOutput::new(volume))
    }

    fn send(&self, command: Command) -> Result<(), PlaybackError> {
        self.tx
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .send(command)
            .map_err(|_| PlaybackError::DriverStopped)
    }

    pub fn play(&self, clip: AudioClip) -> Result<PlaybackCompletion, PlaybackError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (done, rx) = oneshot::channel();
        self.send(Command::Play { id, clip, done })?;
        Ok(PlaybackCompletion { rx })
    }

    /// Stop the current clip, if any. Its completion resolves as `Stopped`.
    pub fn stop(&self) {
        let _ = self.send(Command::Stop);
    }
}

impl Drop for PlaybackDriver {
    fn drop(&mut self) {
        let _ = self.send(Command::Shutdown);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

fn run_loop<D: OutputDevice>(mut device: D, rx: Receiver<Command>, tx: Sender<Command>) {
    let mut current: Option<(u64, oneshot::Sender<PlaybackOutcome>)> = None;

    let interrupt = |device: &mut D, current: &mut Option<(u64, oneshot::Sender<PlaybackOutcome>)>| {
        if let Some((id, done)) = current.take() {
            device.halt();
            debug!(clip = id, "Playback stopped");
            let _ = done.send(PlaybackOutcome::Stopped);
        }
    };

    while let Ok(command) = rx.recv() {
        match command {
            Command::Play { id, clip, done } => {
                interrupt(&mut device, &mut current);
                let secs = clip.duration().as_secs_f32();
                let finished_tx = tx.clone();
                let on_finished = Box::new(move || {
                    let _ = finished_tx.send(Command::Finished(id));
                });
                match device.start(clip, on_finished) {
                    Ok(()) => {
                        debug!(clip = id, secs, "Playback started");
                        current = Some((id, done));
                    }
                    Err(e) => {
                        error!(clip = id, error = %e, "Playback failed to start");
                        device.halt();
                        let _ = done.send(PlaybackOutcome::Failed(e.to_string()));
                    }
                }
            }
            Command::Stop => interrupt(&mut device, &mut current),
            Command::Finished(id) => {
                // A late callback from a clip that was already replaced is ignored.
                if matches!(&current, Some((playing, _)) if *playing == id) {
                    if let Some((_, done)) = current.take() {
                        device.halt();
                        debug!(clip = id, "Playback completed");
                        let _ = done.send(PlaybackOutcome::Completed);
                    }
                }
            }
            Command::Shutdown => {
                interrupt(&mut device, &mut current);
                break;
            }
        }
    }
    info!("Playback thread exiting");
}
