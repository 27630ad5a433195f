#![allow(dead_code)]

use async_trait::async_trait;
use speechout::backends::{SystemSpeech, Voice};
use speechout::error::{PlaybackError, SpeechError, SynthesisError};
use speechout::locale::Locale;
use speechout::models::{ArtifactFetcher, ModelCatalog, ModelDescriptor, ModelStore};
use speechout::playback::OutputDevice;
use speechout::synthesis::{AudioClip, LoadedVoice, VoiceRuntime};
use std::collections::HashSet;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::Notify;

pub fn temp_store() -> (TempDir, Arc<ModelStore>) {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(ModelStore::new(dir.path().join("models"), ModelCatalog::builtin()));
    (dir, store)
}

/// Write every required file for `locale` straight into the store.
pub fn install_model(store: &ModelStore, locale: &Locale) {
    let descriptor = store.descriptor_for(locale);
    let dir = store.model_dir(&descriptor);
    std::fs::create_dir_all(&dir).unwrap();
    for file in &descriptor.required_files {
        std::fs::write(dir.join(file), b"weights").unwrap();
    }
}

/// Entries under the models root, for checking nothing was left behind.
pub fn root_entries(store: &ModelStore) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(store.root())
        .map(|rd| {
            rd.flatten()
                .map(|e| e.file_name().to_string_lossy().into_owned())
                .collect()
        })
        .unwrap_or_default();
    names.sort();
    names
}

pub async fn wait_until<F: Fn() -> bool>(what: &str, check: F) {
    for _ in 0..200 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {}", what);
}

// ---------------------------------------------------------------------------
// Network

/// Serves fixed bytes for any URL. Individual file names can be made to fail,
/// return nothing, or block until released.
#[derive(Default)]
pub struct FakeFetcher {
    pub failing: HashSet<String>,
    pub empty: HashSet<String>,
    pub gated: HashSet<String>,
    pub gate: Arc<Notify>,
    pub entered_gate: Arc<Notify>,
    pub fetches: AtomicUsize,
}

impl FakeFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing(mut self, file: &str) -> Self {
        self.failing.insert(file.to_string());
        self
    }

    pub fn empty(mut self, file: &str) -> Self {
        self.empty.insert(file.to_string());
        self
    }

    pub fn gated(mut self, file: &str) -> Self {
        self.gated.insert(file.to_string());
        self
    }

    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ArtifactFetcher for FakeFetcher {
    async fn fetch(&self, _url: &str, dest: &Path) -> Result<u64, String> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        let file = dest
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        if self.gated.contains(&file) {
            self.entered_gate.notify_one();
            self.gate.notified().await;
        }
        if self.failing.contains(&file) {
            return Err("HTTP 503".to_string());
        }
        let body: &[u8] = if self.empty.contains(&file) { b"" } else { b"artifact" };
        tokio::fs::write(dest, body).await.map_err(|e| e.to_string())?;
        Ok(body.len() as u64)
    }
}

// ---------------------------------------------------------------------------
// Synthesis

/// A voice that emits one sample per input byte, or always fails.
pub struct FakeRuntime {
    pub fail_synthesis: bool,
    pub loads: AtomicUsize,
}

impl FakeRuntime {
    pub fn working() -> Self {
        Self {
            fail_synthesis: false,
            loads: AtomicUsize::new(0),
        }
    }

    pub fn broken() -> Self {
        Self {
            fail_synthesis: true,
            loads: AtomicUsize::new(0),
        }
    }
}

struct FakeVoice {
    sample_rate: u32,
    fail: bool,
}

impl LoadedVoice for FakeVoice {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn synthesize(&mut self, text: &str, _rate: f32) -> Result<Vec<f32>, SynthesisError> {
        if self.fail {
            return Err(SynthesisError::failed("inference exploded"));
        }
        Ok(vec![0.25; text.len()])
    }
}

impl VoiceRuntime for FakeRuntime {
    fn load(&self, dir: &Path, descriptor: &ModelDescriptor) -> Result<Box<dyn LoadedVoice>, SynthesisError> {
        assert!(dir.join(&descriptor.model_file).is_file());
        self.loads.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeVoice {
            sample_rate: descriptor.sample_rate,
            fail: self.fail_synthesis,
        }))
    }
}

// ---------------------------------------------------------------------------
// Audio output

pub type EventLog = Arc<Mutex<Vec<String>>>;

/// Logs every start/halt. Clips finish only when the test calls
/// [`DeviceControl::finish`], unless `auto_finish` is set.
pub struct FakeDevice {
    log: EventLog,
    control: DeviceControl,
    auto_finish: bool,
    fail_start: bool,
}

#[derive(Clone, Default)]
pub struct DeviceControl {
    callbacks: Arc<Mutex<Vec<Box<dyn Fn() + Send>>>>,
}

impl DeviceControl {
    /// Fire the completion callback of the clip started `index`-th.
    pub fn finish(&self, index: usize) {
        let callbacks = self.callbacks.lock().unwrap();
        (callbacks[index])();
    }

    pub fn started(&self) -> usize {
        self.callbacks.lock().unwrap().len()
    }
}

impl FakeDevice {
    pub fn new(log: EventLog, control: DeviceControl) -> Self {
        Self {
            log,
            control,
            auto_finish: false,
            fail_start: false,
        }
    }

    pub fn auto_finishing(log: EventLog) -> Self {
        Self {
            auto_finish: true,
            ..Self::new(log, DeviceControl::default())
        }
    }

    pub fn unavailable(log: EventLog) -> Self {
        Self {
            fail_start: true,
            ..Self::new(log, DeviceControl::default())
        }
    }
}

impl OutputDevice for FakeDevice {
    fn start(&mut self, clip: AudioClip, on_finished: Box<dyn Fn() + Send>) -> Result<(), PlaybackError> {
        if self.fail_start {
            return Err(PlaybackError::DeviceUnavailable("no sound card".into()));
        }
        self.log
            .lock()
            .unwrap()
            .push(format!("start:{}", clip.samples.len()));
        if self.auto_finish {
            on_finished();
        }
        self.control.callbacks.lock().unwrap().push(on_finished);
        Ok(())
    }

    fn halt(&mut self) {
        self.log.lock().unwrap().push("halt".to_string());
    }
}

// ---------------------------------------------------------------------------
// System speech

#[derive(Debug, Clone, PartialEq)]
pub enum SystemCall {
    SetLocale(String),
    SetRate(f32),
    SetVoice(Option<String>),
    Render(String),
}

/// Renders one sample per input byte, supporting only the listed languages.
/// Rendering `gated_text` blocks until `gate` is notified.
pub struct FakeSystemSpeech {
    pub languages: Vec<String>,
    pub voices: Vec<Voice>,
    pub calls: Mutex<Vec<SystemCall>>,
    pub fail_speak: bool,
    pub gated_text: Option<String>,
    pub gate: Arc<Notify>,
    pub entered_gate: Arc<Notify>,
}

impl FakeSystemSpeech {
    pub fn new(languages: &[&str]) -> Self {
        Self {
            languages: languages.iter().map(|s| s.to_string()).collect(),
            voices: Vec::new(),
            calls: Mutex::new(Vec::new()),
            fail_speak: false,
            gated_text: None,
            gate: Arc::new(Notify::new()),
            entered_gate: Arc::new(Notify::new()),
        }
    }

    pub fn gated(mut self, text: &str) -> Self {
        self.gated_text = Some(text.to_string());
        self
    }

    pub fn calls(&self) -> Vec<SystemCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn spoken(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                SystemCall::Render(text) => Some(text),
                _ => None,
            })
            .collect()
    }

    pub fn rates(&self) -> Vec<f32> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                SystemCall::SetRate(rate) => Some(rate),
                _ => None,
            })
            .collect()
    }
}

#[async_trait]
impl SystemSpeech for FakeSystemSpeech {
    fn id(&self) -> &str {
        "fake-tts"
    }

    fn set_locale(&self, locale: &Locale) -> bool {
        self.calls
            .lock()
            .unwrap()
            .push(SystemCall::SetLocale(locale.to_string()));
        self.languages.iter().any(|l| l == locale.language())
    }

    fn set_rate(&self, rate: f32) {
        self.calls.lock().unwrap().push(SystemCall::SetRate(rate));
    }

    fn list_voices(&self) -> Vec<Voice> {
        self.voices.clone()
    }

    fn set_voice(&self, voice_id: Option<&str>) {
        self.calls
            .lock()
            .unwrap()
            .push(SystemCall::SetVoice(voice_id.map(str::to_string)));
    }

    async fn render(&self, text: &str) -> Result<AudioClip, SpeechError> {
        self.calls
            .lock()
            .unwrap()
            .push(SystemCall::Render(text.to_string()));
        if self.gated_text.as_deref() == Some(text) {
            self.entered_gate.notify_one();
            self.gate.notified().await;
        }
        if self.fail_speak {
            return Err(SpeechError::Backend("engine crashed".into()));
        }
        Ok(AudioClip::mono(vec![0.0; text.len()], 22050))
    }
}

// ---------------------------------------------------------------------------
// Capabilities

/// A host with nothing installed.
pub struct BareHost;

impl speechout::backends::SpeechCapabilities for BareHost {
    fn recognition_engine(&self) -> Option<String> {
        None
    }

    fn active_synthesis_engine(&self) -> Option<String> {
        None
    }

    fn is_engine_installed(&self, _engine: &str) -> bool {
        false
    }

    fn is_language_available(&self, _locale: &Locale) -> bool {
        false
    }

    fn output_device(&self) -> Option<String> {
        None
    }
}
