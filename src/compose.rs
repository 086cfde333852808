//! Composición del feedback final.
//!
//! Una única petición de generación reúne: el prompt sintetizado, el tono,
//! un digest textual del contexto recuperado (captions con atribución de
//! fuente, de mayor a menor relevancia) y los bytes de todos los vídeos
//! (instructivos en orden de corpus, el del usuario en último lugar).
//! Cualquier fallo se convierte en un mensaje fijo con `used_fallback`;
//! esta frontera nunca propaga errores.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::config::AppConfig;
use crate::corpus::{VideoAsset, VideoCorpus};
use crate::error::Result;
use crate::index::RetrievedContext;
use crate::llm::{GenerationCapability, GenerationRequest, MediaPayload};
use crate::prompt::PromptSpec;

/// Mensaje fijo que recibe el usuario cuando la composición falla.
pub const FALLBACK_FEEDBACK: &str = "\
We couldn't generate feedback for this attempt because of a temporary \
problem with the analysis service. Your videos were not the issue. Please \
try again in a few minutes.";

/// Artefacto terminal del pipeline.
#[derive(Clone, Debug)]
pub struct FeedbackResult {
    pub text: String,
    pub used_fallback: bool,
}

/// Compositor del feedback: una llamada de generación, un fallback propio.
pub struct FeedbackComposer {
    generation: Arc<dyn GenerationCapability>,
    temperature: f64,
    max_output_tokens: u32,
}

impl FeedbackComposer {
    pub fn new(cfg: &AppConfig, generation: Arc<dyn GenerationCapability>) -> Self {
        Self {
            generation,
            temperature: cfg.temperature,
            max_output_tokens: cfg.max_output_tokens,
        }
    }

    /// Compone el feedback. Exactamente una llamada saliente de
    /// generación por invocación; sin reintentos.
    pub async fn compose(
        &self,
        prompt: &PromptSpec,
        context: &RetrievedContext,
        corpus: &VideoCorpus,
    ) -> FeedbackResult {
        let request = match self.build_request(prompt, context, corpus) {
            Ok(request) => request,
            Err(err) => {
                warn!("Composición degradada a fallback al preparar la petición: {err}");
                return FeedbackResult {
                    text: FALLBACK_FEEDBACK.to_string(),
                    used_fallback: true,
                };
            }
        };

        match self.generation.generate(&request).await {
            Ok(text) if !text.trim().is_empty() => FeedbackResult {
                text: text.trim().to_string(),
                used_fallback: false,
            },
            Ok(_) => {
                warn!("El backend devolvió feedback vacío; usando mensaje de fallback");
                FeedbackResult {
                    text: FALLBACK_FEEDBACK.to_string(),
                    used_fallback: true,
                }
            }
            Err(err) => {
                warn!("Composición degradada a fallback: {err}");
                FeedbackResult {
                    text: FALLBACK_FEEDBACK.to_string(),
                    used_fallback: true,
                }
            }
        }
    }

    fn build_request(
        &self,
        prompt: &PromptSpec,
        context: &RetrievedContext,
        corpus: &VideoCorpus,
    ) -> Result<GenerationRequest> {
        // Instructivos en orden de corpus; el intento del usuario al final.
        // Cualquier vídeo ilegible aquí (incluido el del usuario) aborta la
        // composición hacia el fallback.
        let mut attachments = Vec::with_capacity(corpus.instructional().len() + 1);
        for asset in corpus.instructional() {
            attachments.push(load_payload(asset)?);
        }
        attachments.push(load_payload(corpus.user())?);

        debug!(
            "Petición de composición: {} adjuntos, {} entradas de contexto",
            attachments.len(),
            context.hits.len()
        );

        Ok(GenerationRequest {
            prompt: render_prompt(prompt, context),
            attachments,
            temperature: self.temperature,
            max_output_tokens: self.max_output_tokens,
        })
    }
}

fn load_payload(asset: &VideoAsset) -> Result<MediaPayload> {
    Ok(MediaPayload {
        label: asset.label(),
        mime_type: asset.mime_type(),
        bytes: asset.read_bytes()?,
    })
}

/// Digest textual del contexto recuperado, con atribución de fuente y en
/// orden de relevancia descendente.
fn render_context(context: &RetrievedContext) -> String {
    if context.is_empty() {
        return "(no relevant instructional segments were found)".to_string();
    }
    context
        .hits
        .iter()
        .map(|hit| {
            format!(
                "[{}, segment {}] {}",
                hit.entry.asset_label, hit.entry.segment_id, hit.entry.caption
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n---\n\n")
}

fn render_prompt(prompt: &PromptSpec, context: &RetrievedContext) -> String {
    format!(
        "{}\n\nCoaching tone: {}.\n\nContext retrieved from the instructional \
videos:\n{}\n\nThe attached videos are the instructional references in corpus \
order, followed by the athlete's own attempt as the last attachment. Ground \
your feedback in the retrieved context, reference the specific segments it \
cites, and compare the final video against the references.",
        prompt.generated_text,
        prompt.tone.phrase(),
        render_context(context)
    )
}
