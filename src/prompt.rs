//! Síntesis del prompt de coaching y del tono a partir de la actividad.
//!
//! El tono se infiere con una tabla cerrada de patrones (dato, no control
//! de flujo): añadir una actividad nueva es añadir una fila. El texto del
//! prompt tiene un camino primario (una llamada al backend de generación,
//! opcionalmente enriquecida con la guía de un backend consultivo) y un
//! fallback determinista que nunca falla.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::config::AppConfig;
use crate::llm::{GenerationCapability, GenerationRequest};

/// Tono de coaching inferido de la actividad.
#[derive(Clone, Debug, PartialEq)]
pub enum CoachingTone {
    EncouragingFun,
    PreciseMotivating,
    HelpfulDirect,
    /// Tono literal suministrado por el llamante en lugar de inferido.
    Custom(String),
}

impl CoachingTone {
    /// Frase en lenguaje natural con la que el tono aparece en los prompts.
    pub fn phrase(&self) -> &str {
        match self {
            Self::EncouragingFun => "encouraging and fun",
            Self::PreciseMotivating => "precise and motivating",
            Self::HelpfulDirect => "helpful and direct",
            Self::Custom(phrase) => phrase,
        }
    }
}

/// Tabla (patrón → tono). Se evalúa en orden sobre la actividad en
/// minúsculas; la primera coincidencia gana.
const TONE_RULES: &[(&str, CoachingTone)] = &[
    ("dance", CoachingTone::EncouragingFun),
    ("squat", CoachingTone::PreciseMotivating),
    ("pushup", CoachingTone::PreciseMotivating),
];

/// Infiere el tono por coincidencia de subcadena, sin distinguir
/// mayúsculas. Sin coincidencia, el tono por defecto es directo y útil.
pub fn infer_tone(activity_label: &str) -> CoachingTone {
    let lowered = activity_label.to_lowercase();
    for (pattern, tone) in TONE_RULES {
        if lowered.contains(pattern) {
            return tone.clone();
        }
    }
    CoachingTone::HelpfulDirect
}

/// Prompt sintetizado, inmutable. `generated_text` hace también de query
/// de recuperación.
#[derive(Clone, Debug)]
pub struct PromptSpec {
    pub activity_label: String,
    pub accommodations: String,
    pub generated_text: String,
    pub tone: CoachingTone,
}

/// Prompt de reserva, función pura de (actividad, acomodaciones, tono).
pub fn fallback_prompt(activity_label: &str, accommodations: &str, tone: &CoachingTone) -> String {
    let mut prompt = format!(
        "Analyze my {activity_label} and provide feedback that is {}.",
        tone.phrase()
    );
    if !accommodations.is_empty() {
        prompt.push_str(&format!(" Consider the following: {accommodations}"));
    }
    prompt
}

/// Sintetizador de prompts: camino primario vía backend externo, fallback
/// determinista local.
pub struct PromptSynthesizer {
    generation: Arc<dyn GenerationCapability>,
    advisory: Option<Arc<dyn GenerationCapability>>,
    temperature: f64,
    max_output_tokens: u32,
}

impl PromptSynthesizer {
    pub fn new(
        cfg: &AppConfig,
        generation: Arc<dyn GenerationCapability>,
        advisory: Option<Arc<dyn GenerationCapability>>,
    ) -> Self {
        Self {
            generation,
            advisory,
            temperature: cfg.temperature,
            max_output_tokens: cfg.max_output_tokens,
        }
    }

    /// Sintetiza el prompt y el tono. Nunca falla: si el backend externo
    /// falla por cualquier motivo se usa el fallback determinista (un
    /// intento, sin reintentos). Devuelve también si hubo fallback.
    pub async fn synthesize(&self, activity_label: &str, accommodations: &str) -> (PromptSpec, bool) {
        let tone = infer_tone(activity_label);

        let (generated_text, used_fallback) =
            match self.request_prompt(activity_label, accommodations, &tone).await {
                Ok(text) => (text, false),
                Err(err) => {
                    warn!("Síntesis de prompt degradada a fallback: {err}");
                    (fallback_prompt(activity_label, accommodations, &tone), true)
                }
            };

        (
            PromptSpec {
                activity_label: activity_label.to_string(),
                accommodations: accommodations.to_string(),
                generated_text,
                tone,
            },
            used_fallback,
        )
    }

    async fn request_prompt(
        &self,
        activity_label: &str,
        accommodations: &str,
        tone: &CoachingTone,
    ) -> crate::error::Result<String> {
        // La guía consultiva es mejor-esfuerzo: su fallo no degrada el
        // camino primario y nunca altera el tono ya inferido.
        let advisory_text = match &self.advisory {
            Some(backend) => {
                let request = GenerationRequest::text_only(
                    format!(
                        "In two or three sentences, what should a coach pay special \
attention to when reviewing a {activity_label} performance?"
                    ),
                    self.temperature,
                    self.max_output_tokens,
                );
                match backend.generate(&request).await {
                    Ok(text) => {
                        debug!("Guía consultiva recibida ({} caracteres)", text.len());
                        Some(text)
                    }
                    Err(err) => {
                        warn!("Guía consultiva no disponible: {err}");
                        None
                    }
                }
            }
            None => None,
        };

        let mut meta_prompt = format!(
            "Write a single, self-contained coaching prompt that asks for an \
analysis of a {activity_label} performance. The feedback requested must be \
{} in tone.",
            tone.phrase()
        );
        if !accommodations.is_empty() {
            meta_prompt.push_str(&format!(
                " The athlete adds this context, which the prompt must take into \
account: {accommodations}."
            ));
        }
        if let Some(guidance) = advisory_text {
            meta_prompt.push_str(&format!(
                "\n\nAdditional guidance from a second reviewer:\n{guidance}"
            ));
        }
        meta_prompt.push_str("\n\nReturn only the prompt text, nothing else.");

        let request =
            GenerationRequest::text_only(meta_prompt, self.temperature, self.max_output_tokens);
        let text = self.generation.generate(&request).await?;
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Err(crate::error::CoachError::Capability(
                "el backend devolvió un prompt vacío".to_string(),
            ));
        }
        Ok(trimmed.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dance_implica_tono_animado() {
        assert_eq!(infer_tone("worm dance"), CoachingTone::EncouragingFun);
        assert_eq!(infer_tone("Breakdance Battle"), CoachingTone::EncouragingFun);
        assert_eq!(infer_tone("DANCE"), CoachingTone::EncouragingFun);
    }

    #[test]
    fn squat_y_pushup_implican_tono_preciso() {
        assert_eq!(infer_tone("barbell squat"), CoachingTone::PreciseMotivating);
        assert_eq!(infer_tone("Pushup challenge"), CoachingTone::PreciseMotivating);
        assert_eq!(infer_tone("SQUAT"), CoachingTone::PreciseMotivating);
    }

    #[test]
    fn sin_coincidencia_el_tono_es_directo() {
        assert_eq!(infer_tone("violin"), CoachingTone::HelpfulDirect);
        assert_eq!(infer_tone(""), CoachingTone::HelpfulDirect);
    }

    #[test]
    fn el_fallback_es_determinista_byte_a_byte() {
        let tone = infer_tone("worm dance");
        let a = fallback_prompt("worm dance", "I'm a beginner", &tone);
        let b = fallback_prompt("worm dance", "I'm a beginner", &tone);
        assert_eq!(a, b);
        assert_eq!(
            a,
            "Analyze my worm dance and provide feedback that is encouraging and fun. \
Consider the following: I'm a beginner"
        );
    }

    #[test]
    fn el_fallback_omite_acomodaciones_vacias() {
        let tone = infer_tone("squat");
        assert_eq!(
            fallback_prompt("squat", "", &tone),
            "Analyze my squat and provide feedback that is precise and motivating."
        );
    }

    #[test]
    fn el_tono_custom_usa_la_frase_literal() {
        let tone = CoachingTone::Custom("calm and clinical".to_string());
        assert_eq!(
            fallback_prompt("serve", "", &tone),
            "Analyze my serve and provide feedback that is calm and clinical."
        );
    }
}
