//! Carga y gestión de configuración de la aplicación (proveedores + pipeline).
//!
//! Toda la configuración entra por variables de entorno (con `.env` si
//! existe) y se valida de forma temprana: una credencial ausente es un
//! `CoachError::Configuration` al arrancar, nunca un fallo diferido dentro
//! del pipeline.

use std::env;
use std::time::Duration;

use crate::error::{CoachError, Result};

/// Proveedor del backend de generación.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum GenProvider {
    Gemini,
    Anthropic,
    OpenAI,
}

impl GenProvider {
    pub fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "gemini" => Ok(Self::Gemini),
            "anthropic" => Ok(Self::Anthropic),
            "openai" => Ok(Self::OpenAI),
            other => Err(CoachError::Configuration(format!(
                "Proveedor de generación no soportado: {other}"
            ))),
        }
    }
}

/// Configuración completa de la aplicación.
#[derive(Clone, Debug)]
pub struct AppConfig {
    pub provider: GenProvider,
    pub gemini_api_key: Option<String>,
    pub anthropic_api_key: Option<String>,

    pub chat_model: String,
    pub caption_model: String,
    pub embedding_model: String,

    /// Modelo consultivo opcional: una segunda pasada de un backend
    /// independiente cuya guía se concatena al sintetizar el prompt.
    pub advisory_provider: Option<GenProvider>,
    pub advisory_model: Option<String>,

    pub top_k: usize,
    pub min_score: f64,
    pub segment_bytes: u64,
    pub ingest_concurrency: usize,
    pub request_timeout: Duration,
    pub max_output_tokens: u32,
    pub temperature: f64,
}

fn env_parse<T: std::str::FromStr>(name: &str, default: T) -> Result<T> {
    match env::var(name) {
        Ok(raw) => raw
            .parse::<T>()
            .map_err(|_| CoachError::Configuration(format!("Valor inválido para {name}: '{raw}'"))),
        Err(_) => Ok(default),
    }
}

impl AppConfig {
    /// Carga la configuración desde variables de entorno (usando .env si existe).
    pub fn from_env() -> Result<Self> {
        let provider_str = env::var("COACH_PROVIDER").unwrap_or_else(|_| "gemini".to_string());
        let provider = GenProvider::from_str(&provider_str)?;

        let gemini_api_key = env::var("GEMINI_API_KEY").ok().filter(|v| !v.is_empty());
        let anthropic_api_key = env::var("ANTHROPIC_API_KEY").ok().filter(|v| !v.is_empty());
        let openai_api_key = env::var("OPENAI_API_KEY").ok().filter(|v| !v.is_empty());

        // Validación temprana de credenciales según el proveedor elegido.
        match provider {
            GenProvider::Gemini if gemini_api_key.is_none() => {
                return Err(CoachError::Configuration(
                    "Falta GEMINI_API_KEY en el entorno".to_string(),
                ));
            }
            GenProvider::Anthropic if anthropic_api_key.is_none() => {
                return Err(CoachError::Configuration(
                    "Falta ANTHROPIC_API_KEY en el entorno".to_string(),
                ));
            }
            GenProvider::OpenAI if openai_api_key.is_none() => {
                return Err(CoachError::Configuration(
                    "Falta OPENAI_API_KEY en el entorno".to_string(),
                ));
            }
            _ => {}
        }

        let chat_model =
            env::var("COACH_CHAT_MODEL").unwrap_or_else(|_| "gemini-2.0-flash".to_string());
        let caption_model =
            env::var("COACH_CAPTION_MODEL").unwrap_or_else(|_| "gemini-2.0-flash".to_string());
        let embedding_model =
            env::var("COACH_EMBEDDING_MODEL").unwrap_or_else(|_| "text-embedding-004".to_string());

        let advisory_model = env::var("COACH_ADVISORY_MODEL").ok().filter(|v| !v.is_empty());
        let advisory_provider = match env::var("COACH_ADVISORY_PROVIDER") {
            Ok(raw) if !raw.is_empty() => Some(GenProvider::from_str(&raw)?),
            _ => None,
        };

        let timeout_secs: u64 = env_parse("COACH_TIMEOUT_SECS", 60)?;

        Ok(Self {
            provider,
            gemini_api_key,
            anthropic_api_key,
            chat_model,
            caption_model,
            embedding_model,
            advisory_provider,
            advisory_model,
            top_k: env_parse("COACH_TOP_K", 5)?,
            min_score: env_parse("COACH_MIN_SCORE", f64::MIN)?,
            segment_bytes: env_parse("COACH_SEGMENT_BYTES", 4 * 1024 * 1024)?,
            ingest_concurrency: env_parse("COACH_INGEST_CONCURRENCY", 2)?,
            request_timeout: Duration::from_secs(timeout_secs),
            max_output_tokens: env_parse("COACH_MAX_OUTPUT_TOKENS", 1024)?,
            temperature: env_parse("COACH_TEMPERATURE", 0.7)?,
        })
    }

    /// Configuración mínima para pruebas: sin credenciales reales y con
    /// valores deterministas.
    pub fn for_tests() -> Self {
        Self {
            provider: GenProvider::Gemini,
            gemini_api_key: Some("test-key".to_string()),
            anthropic_api_key: None,
            chat_model: "gemini-2.0-flash".to_string(),
            caption_model: "gemini-2.0-flash".to_string(),
            embedding_model: "text-embedding-004".to_string(),
            advisory_provider: None,
            advisory_model: None,
            top_k: 5,
            min_score: f64::MIN,
            segment_bytes: 4 * 1024 * 1024,
            ingest_concurrency: 2,
            request_timeout: Duration::from_secs(5),
            max_output_tokens: 512,
            temperature: 0.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn proveedor_desconocido_es_error_de_configuracion() {
        let err = GenProvider::from_str("mistral").unwrap_err();
        assert!(matches!(err, CoachError::Configuration(_)));
    }

    #[test]
    fn proveedores_conocidos_se_parsean_sin_distincion_de_mayusculas() {
        assert_eq!(GenProvider::from_str("Gemini").unwrap(), GenProvider::Gemini);
        assert_eq!(
            GenProvider::from_str("ANTHROPIC").unwrap(),
            GenProvider::Anthropic
        );
        assert_eq!(GenProvider::from_str("openai").unwrap(), GenProvider::OpenAI);
    }
}
