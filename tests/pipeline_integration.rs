//! Escenarios de extremo a extremo del pipeline con capacidades simuladas.
//!
//! Los mocks son deterministas y llevan contadores de llamadas para poder
//! afirmar idempotencia y construcción de vuelo único del índice.

use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;

use video_rag_coach::compose::FALLBACK_FEEDBACK;
use video_rag_coach::config::AppConfig;
use video_rag_coach::corpus::{MediaKind, VideoAsset, VideoCorpus};
use video_rag_coach::error::{CoachError, Result};
use video_rag_coach::llm::{
    GenerationCapability, GenerationRequest, IngestionCapability, MediaPayload,
};
use video_rag_coach::pipeline::PipelineOrchestrator;

/// Backend de generación simulado: responde con un eco del prompt (para
/// poder comprobar la puesta a tierra) o falla las primeras `fail_first`
/// llamadas / todas las llamadas.
struct MockGeneration {
    always_fail: bool,
    fail_first: AtomicUsize,
    calls: AtomicUsize,
}

impl MockGeneration {
    fn ok() -> Self {
        Self {
            always_fail: false,
            fail_first: AtomicUsize::new(0),
            calls: AtomicUsize::new(0),
        }
    }

    fn failing() -> Self {
        Self {
            always_fail: true,
            fail_first: AtomicUsize::new(0),
            calls: AtomicUsize::new(0),
        }
    }

    fn failing_first(n: usize) -> Self {
        Self {
            always_fail: false,
            fail_first: AtomicUsize::new(n),
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl GenerationCapability for MockGeneration {
    async fn generate(&self, request: &GenerationRequest) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.always_fail {
            return Err(CoachError::Transport("red caída (simulada)".to_string()));
        }
        if self
            .fail_first
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(CoachError::Transport("fallo transitorio (simulado)".to_string()));
        }
        Ok(format!(
            "COACH FEEDBACK [{} attachments] :: {}",
            request.attachments.len(),
            request.prompt
        ))
    }
}

/// Capacidad de ingesta simulada con embeddings deterministas en función
/// del texto.
struct MockIngestion {
    caption_calls: AtomicUsize,
    embed_calls: AtomicUsize,
}

impl MockIngestion {
    fn new() -> Self {
        Self {
            caption_calls: AtomicUsize::new(0),
            embed_calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl IngestionCapability for MockIngestion {
    async fn caption(&self, segment: &MediaPayload) -> Result<String> {
        self.caption_calls.fetch_add(1, Ordering::SeqCst);
        Ok(format!("technique notes for {}", segment.label))
    }

    async fn embed(&self, text: &str) -> Result<Vec<f64>> {
        self.embed_calls.fetch_add(1, Ordering::SeqCst);
        let sum: f64 = text.bytes().map(f64::from).sum();
        Ok(vec![sum, text.len() as f64, 1.0])
    }
}

fn write_video(dir: &Path, name: &str, contents: &[u8], kind: MediaKind) -> VideoAsset {
    let path = dir.join(name);
    fs::write(&path, contents).unwrap();
    VideoAsset::new(path, kind)
}

fn demo_corpus(dir: &Path) -> VideoCorpus {
    let a = write_video(dir, "worm-demo-1.mp4", b"demo uno", MediaKind::Instructional);
    let b = write_video(dir, "worm-demo-2.mkv", b"demo dos", MediaKind::Instructional);
    let user = write_video(dir, "mi-intento.mp4", b"mi intento", MediaKind::User);
    VideoCorpus::new(vec![a, b], user).unwrap()
}

fn pipeline(
    generation: Arc<MockGeneration>,
    ingestion: Arc<MockIngestion>,
) -> PipelineOrchestrator {
    PipelineOrchestrator::with_capabilities(AppConfig::for_tests(), generation, None, ingestion)
}

#[tokio::test]
async fn escenario_1_camino_feliz_con_contexto_puesto_a_tierra() {
    let dir = tempfile::tempdir().unwrap();
    let corpus = demo_corpus(dir.path());

    let generation = Arc::new(MockGeneration::ok());
    let ingestion = Arc::new(MockIngestion::new());
    let orchestrator = pipeline(generation.clone(), ingestion.clone());

    let result = orchestrator.run("worm dance", "", &corpus).await;

    assert!(!result.used_fallback);
    // El feedback cita segmentos recuperados del corpus instructivo.
    assert!(result.text.contains("technique notes for worm-demo-1.mp4#0"));
    assert!(result.text.contains("worm-demo-2.mkv"));
    // Tres adjuntos: dos instructivos + el intento del usuario.
    assert!(result.text.contains("[3 attachments]"));
    // Dos llamadas de generación: síntesis de prompt + composición.
    assert_eq!(generation.calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn escenario_2_generacion_siempre_fallida_produce_el_mensaje_fijo() {
    let dir = tempfile::tempdir().unwrap();
    let corpus = demo_corpus(dir.path());

    let orchestrator = pipeline(
        Arc::new(MockGeneration::failing()),
        Arc::new(MockIngestion::new()),
    );

    let result = orchestrator.run("worm dance", "", &corpus).await;
    assert!(result.used_fallback);
    assert_eq!(result.text, FALLBACK_FEEDBACK);
}

#[tokio::test]
async fn el_prompt_de_reserva_llega_a_la_composicion() {
    let dir = tempfile::tempdir().unwrap();
    let corpus = demo_corpus(dir.path());

    // Falla sólo la primera llamada (la síntesis); la composición funciona.
    let generation = Arc::new(MockGeneration::failing_first(1));
    let orchestrator = pipeline(generation, Arc::new(MockIngestion::new()));

    let result = orchestrator.run("worm dance", "I'm a beginner", &corpus).await;

    // Degradación visible sólo a través del flag; el texto es el compuesto.
    assert!(result.used_fallback);
    assert_ne!(result.text, FALLBACK_FEEDBACK);
    assert!(result.text.contains(
        "Analyze my worm dance and provide feedback that is encouraging and fun. \
Consider the following: I'm a beginner"
    ));
}

#[tokio::test]
async fn escenario_3_corpus_sin_instructivos_fluye_sin_error() {
    let dir = tempfile::tempdir().unwrap();
    let user = write_video(dir.path(), "solo.mp4", b"intento", MediaKind::User);
    let corpus = VideoCorpus::new(Vec::new(), user).unwrap();

    let ingestion = Arc::new(MockIngestion::new());
    let orchestrator = pipeline(Arc::new(MockGeneration::ok()), ingestion.clone());

    let result = orchestrator.run("juggling", "", &corpus).await;

    assert!(!result.used_fallback);
    assert!(result.text.contains("no relevant instructional segments were found"));
    assert!(result.text.contains("[1 attachments]"));
    // Sin activos instructivos no hay captioning que hacer.
    assert_eq!(ingestion.caption_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn un_video_de_usuario_ilegible_es_fallback_terminal() {
    let dir = tempfile::tempdir().unwrap();
    let a = write_video(dir.path(), "a.mp4", b"demo", MediaKind::Instructional);
    let user = VideoAsset::new(dir.path().join("no-existe.mp4"), MediaKind::User);
    let corpus = VideoCorpus::new(vec![a], user).unwrap();

    let orchestrator = pipeline(Arc::new(MockGeneration::ok()), Arc::new(MockIngestion::new()));
    let result = orchestrator.run("squat", "", &corpus).await;

    assert!(result.used_fallback);
    assert_eq!(result.text, FALLBACK_FEEDBACK);
}

#[tokio::test]
async fn ejecuciones_repetidas_no_reingieren_el_corpus() {
    let dir = tempfile::tempdir().unwrap();
    let corpus = demo_corpus(dir.path());

    let ingestion = Arc::new(MockIngestion::new());
    let orchestrator = pipeline(Arc::new(MockGeneration::ok()), ingestion.clone());

    orchestrator.run("worm dance", "", &corpus).await;
    let captions_after_first = ingestion.caption_calls.load(Ordering::SeqCst);
    assert_eq!(captions_after_first, 2); // un segmento por vídeo instructivo

    orchestrator.run("worm dance", "", &corpus).await;
    assert_eq!(ingestion.caption_calls.load(Ordering::SeqCst), captions_after_first);
}

#[tokio::test]
async fn dos_ejecuciones_concurrentes_comparten_una_unica_construccion() {
    let dir = tempfile::tempdir().unwrap();
    let corpus = demo_corpus(dir.path());

    let ingestion = Arc::new(MockIngestion::new());
    let orchestrator = Arc::new(pipeline(Arc::new(MockGeneration::ok()), ingestion.clone()));

    let (r1, r2) = tokio::join!(
        orchestrator.run("worm dance", "", &corpus),
        orchestrator.run("worm dance", "", &corpus),
    );

    assert!(!r1.used_fallback);
    assert!(!r2.used_fallback);
    // Como mucho una ingesta: dos segmentos descritos en total, aunque
    // hubiera dos ejecuciones en vuelo.
    assert_eq!(ingestion.caption_calls.load(Ordering::SeqCst), 2);
}
