//! Orquestación del pipeline de feedback.
//!
//! Flujo de una ejecución:
//!   1. Síntesis del prompt y del tono (con fallback determinista).
//!   2. Garantizar el índice del corpus (cacheado por identidad).
//!   3. Recuperar el contexto relevante usando el prompt como query.
//!   4. Componer el feedback final con los vídeos adjuntos.
//!
//! Los fallos de las etapas 1–3 degradan la calidad de las entradas de las
//! etapas siguientes pero nunca abortan la ejecución; sólo el propio
//! compositor produce el texto terminal de fallback. El contrato público
//! es devolver siempre un `FeedbackResult`, con la degradación señalada
//! únicamente a través de `used_fallback`.

use std::sync::Arc;

use chrono::Utc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::compose::{FeedbackComposer, FeedbackResult};
use crate::config::AppConfig;
use crate::corpus::VideoCorpus;
use crate::error::Result;
use crate::index::{RetrievedContext, Retriever};
use crate::ingest::{CorpusIndexer, FixedWindowSegmenter};
use crate::llm::{self, GenerationCapability, IngestionCapability};
use crate::prompt::PromptSynthesizer;

/// Orquestador del pipeline: el único punto de entrada externo del núcleo.
/// Una instancia por proceso (o por prueba); no hay estado ambiental.
pub struct PipelineOrchestrator {
    config: AppConfig,
    synthesizer: PromptSynthesizer,
    indexer: CorpusIndexer,
    retriever: Retriever,
    composer: FeedbackComposer,
}

impl PipelineOrchestrator {
    /// Construye el pipeline con los backends que dicta la configuración.
    pub fn new(config: AppConfig) -> Result<Self> {
        let generation = llm::generation_backend(&config)?;
        let advisory = llm::advisory_backend(&config)?;
        let ingestion = llm::ingestion_backend(&config)?;
        Ok(Self::with_capabilities(config, generation, advisory, ingestion))
    }

    /// Construye el pipeline con capacidades explícitas (pruebas o
    /// backends alternativos).
    pub fn with_capabilities(
        config: AppConfig,
        generation: Arc<dyn GenerationCapability>,
        advisory: Option<Arc<dyn GenerationCapability>>,
        ingestion: Arc<dyn IngestionCapability>,
    ) -> Self {
        let synthesizer = PromptSynthesizer::new(&config, generation.clone(), advisory);
        let indexer = CorpusIndexer::new(
            ingestion.clone(),
            Arc::new(FixedWindowSegmenter {
                window_bytes: config.segment_bytes,
            }),
            config.ingest_concurrency,
        );
        let retriever = Retriever::new(ingestion, config.min_score);
        let composer = FeedbackComposer::new(&config, generation);
        Self {
            config,
            synthesizer,
            indexer,
            retriever,
            composer,
        }
    }

    /// Ejecuta el pipeline completo para una petición de análisis.
    ///
    /// Siempre devuelve un resultado textual; `used_fallback` queda a
    /// `true` si cualquier etapa tuvo que degradar (prompt de reserva,
    /// ingesta parcial, recuperación fallida o mensaje terminal fijo).
    pub async fn run(
        &self,
        activity_label: &str,
        accommodations: &str,
        corpus: &VideoCorpus,
    ) -> FeedbackResult {
        let run_id = Uuid::new_v4();
        let started = Utc::now();
        info!(%run_id, activity = activity_label, "Iniciando análisis de rendimiento");

        // 1) Prompt y tono
        let (prompt, prompt_degraded) =
            self.synthesizer.synthesize(activity_label, accommodations).await;

        // 2) Índice del corpus (cacheado, construcción de vuelo único)
        let index = self.indexer.ensure_indexed(corpus).await;

        // 3) Contexto recuperado (el prompt hace de query)
        let (context, retrieval_degraded) = match self
            .retriever
            .retrieve(&index, &prompt.generated_text, self.config.top_k)
            .await
        {
            Ok(context) => (context, false),
            Err(err) => {
                warn!(%run_id, "Recuperación degradada a contexto vacío: {err}");
                (RetrievedContext::default(), true)
            }
        };

        // 4) Composición final
        let mut result = self.composer.compose(&prompt, &context, corpus).await;
        result.used_fallback |= prompt_degraded || index.degraded || retrieval_degraded;

        let elapsed = Utc::now() - started;
        info!(
            %run_id,
            used_fallback = result.used_fallback,
            "Análisis terminado en {} ms",
            elapsed.num_milliseconds()
        );
        result
    }
}
