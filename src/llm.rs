//! Capacidades externas de generación y de captioning/embeddings.
//!
//! El núcleo del pipeline sólo conoce los traits `GenerationCapability` e
//! `IngestionCapability`; el backend concreto se elige por configuración:
//!   - `GeminiBackend`: REST `generateContent`/`embedContent`, multimodal
//!     (los vídeos viajan como `inline_data` en base64).
//!   - `AnthropicBackend`: REST de mensajes, sólo texto.
//!   - `OpenAiBackend`: chat y embeddings vía Rig, sólo texto.
//!
//! Todas las llamadas llevan un timeout acotado; un timeout se trata como
//! fallo de transporte y dispara el fallback de la etapa que llamaba.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine as _;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::config::{AppConfig, GenProvider};
use crate::error::{CoachError, Result};

const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
const ANTHROPIC_BASE_URL: &str = "https://api.anthropic.com/v1";
const ANTHROPIC_VERSION: &str = "2023-06-01";

const COACH_PREAMBLE: &str = "\
You are an experienced coach for sports and performance activities. \
You give concrete, actionable feedback grounded in the reference material \
you are shown, and you never invent techniques that are not in it.";

const CAPTION_PROMPT: &str = "\
Describe this video segment for a coaching knowledge base. Summarize the \
technique being demonstrated, the key body positions, and any spoken \
instructions. Be concrete and concise.";

/// Adjunto multimedia de una petición de generación.
#[derive(Clone, Debug)]
pub struct MediaPayload {
    pub label: String,
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

/// Petición única de generación: prompt + adjuntos + parámetros acotados.
#[derive(Clone, Debug)]
pub struct GenerationRequest {
    pub prompt: String,
    pub attachments: Vec<MediaPayload>,
    pub temperature: f64,
    pub max_output_tokens: u32,
}

impl GenerationRequest {
    pub fn text_only(prompt: impl Into<String>, temperature: f64, max_output_tokens: u32) -> Self {
        Self {
            prompt: prompt.into(),
            attachments: Vec::new(),
            temperature,
            max_output_tokens,
        }
    }
}

/// Capacidad de generación de texto (usada por la síntesis de prompts y la
/// composición de feedback).
#[async_trait]
pub trait GenerationCapability: Send + Sync {
    async fn generate(&self, request: &GenerationRequest) -> Result<String>;
}

/// Capacidad de captioning + embeddings (usada por la ingesta y la
/// recuperación). Caption y embedding comparten espacio: los segmentos se
/// describen como texto y ese texto es lo que se vectoriza.
#[async_trait]
pub trait IngestionCapability: Send + Sync {
    async fn caption(&self, segment: &MediaPayload) -> Result<String>;
    async fn embed(&self, text: &str) -> Result<Vec<f64>>;
}

// ---------------------------------------------------------------------
// GEMINI (REST)
// ---------------------------------------------------------------------

pub struct GeminiBackend {
    client: reqwest::Client,
    api_key: String,
    chat_model: String,
    caption_model: String,
    embedding_model: String,
    timeout: Duration,
}

impl GeminiBackend {
    pub fn from_config(cfg: &AppConfig) -> Result<Self> {
        let api_key = cfg.gemini_api_key.clone().ok_or_else(|| {
            CoachError::Configuration("Falta GEMINI_API_KEY en el entorno".to_string())
        })?;
        Ok(Self {
            client: reqwest::Client::new(),
            api_key,
            chat_model: cfg.chat_model.clone(),
            caption_model: cfg.caption_model.clone(),
            embedding_model: cfg.embedding_model.clone(),
            timeout: cfg.request_timeout,
        })
    }

    /// Variante con otro modelo de chat (para el backend consultivo).
    pub fn with_chat_model(mut self, model: &str) -> Self {
        self.chat_model = model.to_string();
        self
    }

    async fn generate_content(
        &self,
        model: &str,
        parts: Vec<serde_json::Value>,
        temperature: f64,
        max_output_tokens: u32,
    ) -> Result<String> {
        let url = format!(
            "{GEMINI_BASE_URL}/models/{model}:generateContent?key={}",
            self.api_key
        );
        let body = serde_json::json!({
            "contents": [{ "parts": parts }],
            "generationConfig": {
                "temperature": temperature,
                "maxOutputTokens": max_output_tokens,
            },
        });

        let response = self
            .client
            .post(&url)
            .json(&body)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| CoachError::Transport(format!("fallo de red hacia Gemini: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let detail = response.text().await.unwrap_or_default();
            return Err(CoachError::Transport(format!(
                "Gemini devolvió {status}: {detail}"
            )));
        }

        let parsed: GeminiGenerateResponse = response
            .json()
            .await
            .map_err(|e| CoachError::Capability(format!("respuesta de Gemini no parseable: {e}")))?;
        gemini_text(parsed)
    }
}

#[derive(Debug, Deserialize)]
struct GeminiGenerateResponse {
    candidates: Option<Vec<GeminiCandidate>>,
}

#[derive(Debug, Deserialize)]
struct GeminiCandidate {
    content: Option<GeminiContent>,
}

#[derive(Debug, Deserialize)]
struct GeminiContent {
    parts: Option<Vec<GeminiPart>>,
}

#[derive(Debug, Deserialize)]
struct GeminiPart {
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GeminiEmbedResponse {
    embedding: Option<GeminiEmbeddingValues>,
}

#[derive(Debug, Deserialize)]
struct GeminiEmbeddingValues {
    values: Vec<f64>,
}

/// Concatena las partes de texto de la primera candidata; una respuesta sin
/// texto es un fallo de capacidad, no de transporte.
fn gemini_text(response: GeminiGenerateResponse) -> Result<String> {
    let text = response
        .candidates
        .unwrap_or_default()
        .into_iter()
        .next()
        .and_then(|c| c.content)
        .and_then(|c| c.parts)
        .unwrap_or_default()
        .into_iter()
        .filter_map(|p| p.text)
        .collect::<Vec<_>>()
        .join("");

    if text.trim().is_empty() {
        return Err(CoachError::Capability(
            "Gemini devolvió una respuesta sin texto".to_string(),
        ));
    }
    Ok(text)
}

fn inline_media_part(payload: &MediaPayload) -> serde_json::Value {
    serde_json::json!({
        "inline_data": {
            "mime_type": payload.mime_type,
            "data": base64::engine::general_purpose::STANDARD.encode(&payload.bytes),
        }
    })
}

#[async_trait]
impl GenerationCapability for GeminiBackend {
    async fn generate(&self, request: &GenerationRequest) -> Result<String> {
        let mut parts = vec![serde_json::json!({
            "text": format!("{COACH_PREAMBLE}\n\n{}", request.prompt)
        })];
        for attachment in &request.attachments {
            debug!(
                "Adjuntando '{}' ({}, {} bytes) a la petición de Gemini",
                attachment.label,
                attachment.mime_type,
                attachment.bytes.len()
            );
            parts.push(inline_media_part(attachment));
        }
        self.generate_content(
            &self.chat_model,
            parts,
            request.temperature,
            request.max_output_tokens,
        )
        .await
    }
}

#[async_trait]
impl IngestionCapability for GeminiBackend {
    async fn caption(&self, segment: &MediaPayload) -> Result<String> {
        let parts = vec![
            serde_json::json!({ "text": CAPTION_PROMPT }),
            inline_media_part(segment),
        ];
        self.generate_content(&self.caption_model, parts, 0.2, 256).await
    }

    async fn embed(&self, text: &str) -> Result<Vec<f64>> {
        let url = format!(
            "{GEMINI_BASE_URL}/models/{}:embedContent?key={}",
            self.embedding_model, self.api_key
        );
        let body = serde_json::json!({
            "content": { "parts": [{ "text": text }] },
        });

        let response = self
            .client
            .post(&url)
            .json(&body)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| CoachError::Transport(format!("fallo de red hacia Gemini: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let detail = response.text().await.unwrap_or_default();
            return Err(CoachError::Transport(format!(
                "Gemini devolvió {status}: {detail}"
            )));
        }

        let parsed: GeminiEmbedResponse = response
            .json()
            .await
            .map_err(|e| CoachError::Capability(format!("embedding de Gemini no parseable: {e}")))?;
        let values = parsed
            .embedding
            .map(|e| e.values)
            .filter(|v| !v.is_empty())
            .ok_or_else(|| {
                CoachError::Capability("Gemini devolvió un embedding vacío".to_string())
            })?;
        Ok(values)
    }
}

// ---------------------------------------------------------------------
// ANTHROPIC (REST, sólo texto)
// ---------------------------------------------------------------------

pub struct AnthropicBackend {
    client: reqwest::Client,
    api_key: String,
    chat_model: String,
    timeout: Duration,
}

impl AnthropicBackend {
    pub fn from_config(cfg: &AppConfig) -> Result<Self> {
        let api_key = cfg.anthropic_api_key.clone().ok_or_else(|| {
            CoachError::Configuration("Falta ANTHROPIC_API_KEY en el entorno".to_string())
        })?;
        Ok(Self {
            client: reqwest::Client::new(),
            api_key,
            chat_model: cfg.chat_model.clone(),
            timeout: cfg.request_timeout,
        })
    }

    pub fn with_chat_model(mut self, model: &str) -> Self {
        self.chat_model = model.to_string();
        self
    }
}

#[derive(Debug, Deserialize)]
struct AnthropicResponse {
    content: Option<Vec<AnthropicContent>>,
}

#[derive(Debug, Deserialize)]
struct AnthropicContent {
    text: Option<String>,
}

fn anthropic_text(response: AnthropicResponse) -> Result<String> {
    let text = response
        .content
        .unwrap_or_default()
        .into_iter()
        .filter_map(|c| c.text)
        .collect::<Vec<_>>()
        .join("");
    if text.trim().is_empty() {
        return Err(CoachError::Capability(
            "Anthropic devolvió una respuesta sin texto".to_string(),
        ));
    }
    Ok(text)
}

/// Nota textual que sustituye a los adjuntos en backends de sólo texto.
fn attachment_note(attachments: &[MediaPayload]) -> String {
    if attachments.is_empty() {
        return String::new();
    }
    let listing = attachments
        .iter()
        .map(|a| format!("- {} ({}, {} bytes)", a.label, a.mime_type, a.bytes.len()))
        .collect::<Vec<_>>()
        .join("\n");
    format!(
        "\n\n[The following video attachments could not be transmitted to this \
backend and are described only by the retrieved context above:]\n{listing}"
    )
}

#[async_trait]
impl GenerationCapability for AnthropicBackend {
    async fn generate(&self, request: &GenerationRequest) -> Result<String> {
        if !request.attachments.is_empty() {
            warn!(
                "El backend Anthropic no transmite vídeo; {} adjuntos se describen sólo como texto",
                request.attachments.len()
            );
        }
        let prompt = format!("{}{}", request.prompt, attachment_note(&request.attachments));
        let body = serde_json::json!({
            "model": self.chat_model,
            "max_tokens": request.max_output_tokens,
            "temperature": request.temperature,
            "system": COACH_PREAMBLE,
            "messages": [{ "role": "user", "content": prompt }],
        });

        let response = self
            .client
            .post(format!("{ANTHROPIC_BASE_URL}/messages"))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&body)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| CoachError::Transport(format!("fallo de red hacia Anthropic: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let detail = response.text().await.unwrap_or_default();
            return Err(CoachError::Transport(format!(
                "Anthropic devolvió {status}: {detail}"
            )));
        }

        let parsed: AnthropicResponse = response.json().await.map_err(|e| {
            CoachError::Capability(format!("respuesta de Anthropic no parseable: {e}"))
        })?;
        anthropic_text(parsed)
    }
}

// ---------------------------------------------------------------------
// OPENAI (vía Rig, sólo texto)
// ---------------------------------------------------------------------

pub struct OpenAiBackend {
    chat_model: String,
    embedding_model: String,
    timeout: Duration,
}

impl OpenAiBackend {
    pub fn from_config(cfg: &AppConfig) -> Self {
        Self {
            chat_model: cfg.chat_model.clone(),
            embedding_model: cfg.embedding_model.clone(),
            timeout: cfg.request_timeout,
        }
    }

    pub fn with_chat_model(mut self, model: &str) -> Self {
        self.chat_model = model.to_string();
        self
    }
}

#[async_trait]
impl GenerationCapability for OpenAiBackend {
    async fn generate(&self, request: &GenerationRequest) -> Result<String> {
        use rig::client::CompletionClient as _;
        use rig::completion::Prompt;
        use rig::providers::openai;

        if !request.attachments.is_empty() {
            warn!(
                "El backend OpenAI no transmite vídeo; {} adjuntos se describen sólo como texto",
                request.attachments.len()
            );
        }
        let prompt = format!("{}{}", request.prompt, attachment_note(&request.attachments));

        let model_name = if self.chat_model.is_empty() {
            "gpt-4o-mini"
        } else {
            self.chat_model.as_str()
        };

        let fut = async {
            let client = openai::Client::from_env();
            let agent = client
                .agent(model_name)
                .preamble(COACH_PREAMBLE)
                .temperature(request.temperature)
                .build();
            agent.prompt(prompt.as_str()).await
        };

        match tokio::time::timeout(self.timeout, fut).await {
            Err(_) => Err(CoachError::Transport(
                "tiempo de espera agotado en la llamada a OpenAI".to_string(),
            )),
            Ok(Err(e)) => Err(CoachError::Transport(format!(
                "fallo en la llamada a OpenAI: {e}"
            ))),
            Ok(Ok(text)) if text.trim().is_empty() => Err(CoachError::Capability(
                "OpenAI devolvió una respuesta vacía".to_string(),
            )),
            Ok(Ok(text)) => Ok(text),
        }
    }
}

#[async_trait]
impl IngestionCapability for OpenAiBackend {
    async fn caption(&self, segment: &MediaPayload) -> Result<String> {
        // El API de chat de OpenAI vía Rig no acepta segmentos de vídeo;
        // la ingesta tratará cada segmento como activo omitible.
        Err(CoachError::Capability(format!(
            "captioning de vídeo no disponible en el backend OpenAI (segmento '{}')",
            segment.label
        )))
    }

    async fn embed(&self, text: &str) -> Result<Vec<f64>> {
        use rig::client::EmbeddingsClient as _;
        use rig::embeddings::EmbeddingModel as _;
        use rig::providers::openai::{self, TEXT_EMBEDDING_3_SMALL};

        let model_name = if self.embedding_model.is_empty() {
            TEXT_EMBEDDING_3_SMALL
        } else {
            self.embedding_model.as_str()
        };

        let owned = text.to_string();
        let fut = async {
            let client = openai::Client::from_env();
            let embedding_model = client.embedding_model(model_name);
            embedding_model.embed_texts(vec![owned]).await
        };

        let embeddings = match tokio::time::timeout(self.timeout, fut).await {
            Err(_) => {
                return Err(CoachError::Transport(
                    "tiempo de espera agotado en el embedding de OpenAI".to_string(),
                ))
            }
            Ok(Err(e)) => {
                return Err(CoachError::Transport(format!(
                    "fallo en el embedding de OpenAI: {e}"
                )))
            }
            Ok(Ok(embeddings)) => embeddings,
        };

        embeddings
            .first()
            .map(|e| e.vec.clone())
            .ok_or_else(|| CoachError::Capability("OpenAI no devolvió embeddings".to_string()))
    }
}

// ---------------------------------------------------------------------
// Selección de backend por configuración
// ---------------------------------------------------------------------

/// Backend de generación principal según `AppConfig::provider`.
pub fn generation_backend(cfg: &AppConfig) -> Result<Arc<dyn GenerationCapability>> {
    match cfg.provider {
        GenProvider::Gemini => Ok(Arc::new(GeminiBackend::from_config(cfg)?)),
        GenProvider::Anthropic => Ok(Arc::new(AnthropicBackend::from_config(cfg)?)),
        GenProvider::OpenAI => Ok(Arc::new(OpenAiBackend::from_config(cfg))),
    }
}

/// Backend consultivo opcional (guía adicional al sintetizar el prompt).
/// Si no hay modelo consultivo configurado, no hay segunda pasada.
pub fn advisory_backend(cfg: &AppConfig) -> Result<Option<Arc<dyn GenerationCapability>>> {
    let Some(model) = cfg.advisory_model.as_deref() else {
        return Ok(None);
    };
    let provider = cfg.advisory_provider.clone().unwrap_or_else(|| cfg.provider.clone());
    let backend: Arc<dyn GenerationCapability> = match provider {
        GenProvider::Gemini => Arc::new(GeminiBackend::from_config(cfg)?.with_chat_model(model)),
        GenProvider::Anthropic => {
            Arc::new(AnthropicBackend::from_config(cfg)?.with_chat_model(model))
        }
        GenProvider::OpenAI => Arc::new(OpenAiBackend::from_config(cfg).with_chat_model(model)),
    };
    Ok(Some(backend))
}

/// Backend de ingesta (caption + embed). Gemini es el único backend
/// multimodal disponible; con OpenAI los segmentos no se pueden describir
/// y la ingesta degradará a un índice vacío.
pub fn ingestion_backend(cfg: &AppConfig) -> Result<Arc<dyn IngestionCapability>> {
    if cfg.gemini_api_key.is_some() {
        return Ok(Arc::new(GeminiBackend::from_config(cfg)?));
    }
    if cfg.provider == GenProvider::OpenAI {
        return Ok(Arc::new(OpenAiBackend::from_config(cfg)));
    }
    Err(CoachError::Configuration(
        "La ingesta necesita GEMINI_API_KEY (multimodal) u OPENAI_API_KEY (sólo embeddings)"
            .to_string(),
    ))
}
