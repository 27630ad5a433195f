use speechout::backends::EspeakBackend;
use speechout::config_loader::Settings;
use speechout::diagnostics::CapabilityDiagnostics;
use speechout::models::{HttpFetcher, ModelCatalog, ModelDownloader, ModelStore};
use speechout::orchestrator::{SpeechComponents, SpeechOrchestrator};
use speechout::playback::PlaybackDriver;
use speechout::service::{SpeechOutputService, OBJECT_PATH, SERVICE_NAME};
use speechout::synthesis::onnx::InferenceParams;
use speechout::synthesis::{OnnxVoiceRuntime, Phonemizer, SynthesisEngine};
use std::error::Error;
use std::future::pending;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;
use zbus::connection::Builder;

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("speechout=info")),
        )
        .init();

    let config_path = std::env::args().nth(1).map(std::path::PathBuf::from);
    let settings = Settings::load(config_path.as_deref())?;
    let system_locale = settings.system_locale();
    info!(models = %settings.models_dir, locale = %system_locale, "Starting speechout");

    let catalog = ModelCatalog::builtin().with_mirror(&settings.model_mirror);
    let store = Arc::new(ModelStore::new(settings.models_path(), catalog));
    let downloader = ModelDownloader::new(
        store.clone(),
        Arc::new(HttpFetcher::new()?),
        Duration::from_secs(settings.download_timeout_secs),
    );

    let process_timeout = Duration::from_secs(settings.synthesis_timeout_secs);
    let runtime = OnnxVoiceRuntime::new(
        Phonemizer::new(settings.espeak_binary.clone(), process_timeout),
        InferenceParams {
            noise_scale: settings.noise_scale,
            noise_scale_w: settings.noise_scale_w,
            threads: settings.inference_threads,
        },
    );
    let engine = SynthesisEngine::new(store.clone(), Arc::new(runtime));

    let playback = Arc::new(PlaybackDriver::with_rodio(settings.playback_volume));
    let espeak = Arc::new(EspeakBackend::new(
        settings.espeak_binary.clone(),
        settings.recognition_providers.clone(),
        process_timeout,
    ));
    let diagnostics = CapabilityDiagnostics::new(
        espeak.clone(),
        settings.preferred_tts_engine.clone(),
        system_locale,
    );

    let orchestrator = SpeechOrchestrator::new(
        SpeechComponents {
            store,
            downloader,
            engine,
            playback,
            system: espeak,
            diagnostics,
        },
        &settings,
    );

    let _conn = Builder::session()?
        .name(SERVICE_NAME)?
        .serve_at(OBJECT_PATH, SpeechOutputService::new(orchestrator))?
        .build()
        .await?;

    info!("Speech output service running at {}", SERVICE_NAME);

    pending::<()>().await;

    Ok(())
}
