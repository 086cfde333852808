//! Ingesta del corpus instructivo en un índice de recuperación.
//!
//! Cada vídeo instructivo se trocea en segmentos (estrategia enchufable),
//! cada segmento se describe y vectoriza vía la capacidad de ingesta, y
//! las entradas se acumulan en orden de fuente. El índice resultante se
//! cachea por identidad de corpus durante la vida del proceso: consultas
//! repetidas sobre un corpus sin cambios no vuelven a ingerir nada, y dos
//! peticiones concurrentes sobre la misma identidad comparten una única
//! construcción en vuelo.

use std::collections::HashMap;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::sync::Arc;

use futures::stream::{self, StreamExt};
use tokio::sync::{Mutex, OnceCell};
use tracing::{debug, info, warn};

use crate::corpus::{VideoAsset, VideoCorpus};
use crate::error::{CoachError, Result};
use crate::index::{IndexEntry, RetrievalIndex};
use crate::llm::{IngestionCapability, MediaPayload};

/// Sub-tramo contiguo de un vídeo: la unidad atómica recuperable.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct VideoSegment {
    pub id: u32,
    pub offset: u64,
    pub len: u64,
}

/// Estrategia de segmentación. La política concreta (tamaño fijo, cortes
/// de escena...) queda fuera del núcleo; la implementación por defecto usa
/// ventanas de tamaño fijo.
pub trait SegmentationStrategy: Send + Sync {
    fn segments(&self, asset: &VideoAsset) -> Result<Vec<VideoSegment>>;
}

/// Segmentación en ventanas de bytes de tamaño fijo.
pub struct FixedWindowSegmenter {
    pub window_bytes: u64,
}

impl SegmentationStrategy for FixedWindowSegmenter {
    fn segments(&self, asset: &VideoAsset) -> Result<Vec<VideoSegment>> {
        let total = asset.byte_len()?;
        let window = self.window_bytes.max(1);
        let mut segments = Vec::new();
        let mut offset = 0u64;
        let mut id = 0u32;
        while offset < total {
            let len = window.min(total - offset);
            segments.push(VideoSegment { id, offset, len });
            offset += len;
            id += 1;
        }
        Ok(segments)
    }
}

/// Resumen de los resultados de una operación de ingesta.
#[derive(Debug, Default)]
pub struct IngestionSummary {
    pub assets_scanned: usize,
    pub assets_ingested: usize,
    pub assets_skipped: usize,
    pub segments_indexed: usize,
}

impl std::fmt::Display for IngestionSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Resumen: {} activos escaneados, {} ingeridos, {} omitidos, {} segmentos indexados.",
            self.assets_scanned, self.assets_ingested, self.assets_skipped, self.segments_indexed
        )
    }
}

/// Indexador de corpus, idempotente por identidad.
pub struct CorpusIndexer {
    ingestion: Arc<dyn IngestionCapability>,
    segmenter: Arc<dyn SegmentationStrategy>,
    concurrency: usize,
    builds: Mutex<HashMap<String, Arc<OnceCell<Arc<RetrievalIndex>>>>>,
}

impl CorpusIndexer {
    pub fn new(
        ingestion: Arc<dyn IngestionCapability>,
        segmenter: Arc<dyn SegmentationStrategy>,
        concurrency: usize,
    ) -> Self {
        Self {
            ingestion,
            segmenter,
            concurrency,
            builds: Mutex::new(HashMap::new()),
        }
    }

    /// Garantiza que exista un índice para el corpus y lo devuelve.
    ///
    /// Nunca falla: si ningún activo pudo ingerirse el índice queda vacío
    /// y marcado como degradado, y la recuperación posterior devolverá un
    /// contexto vacío. La construcción por identidad es de vuelo único:
    /// los llamantes concurrentes esperan a la misma construcción. Si la
    /// construcción en vuelo se cancela, la celda queda sin inicializar y
    /// el siguiente llamante la reintenta; no queda ningún candado cogido.
    pub async fn ensure_indexed(&self, corpus: &VideoCorpus) -> Arc<RetrievalIndex> {
        let (identity, readable, skipped) = corpus.identity();
        let assets: Vec<VideoAsset> = readable.into_iter().cloned().collect();

        let cell = {
            let mut builds = self.builds.lock().await;
            builds
                .entry(identity.clone())
                .or_insert_with(|| Arc::new(OnceCell::new()))
                .clone()
        };

        cell.get_or_init(|| async {
            Arc::new(self.build_index(identity, &assets, skipped).await)
        })
        .await
        .clone()
    }

    async fn build_index(
        &self,
        identity: String,
        assets: &[VideoAsset],
        identity_skipped: bool,
    ) -> RetrievalIndex {
        let mut summary = IngestionSummary {
            assets_scanned: assets.len(),
            ..Default::default()
        };

        // La ingesta de activos distintos es independiente: se paraleliza
        // acotada por la concurrencia configurada y se reordena después
        // por ordinal para conservar el orden de fuente.
        let mut results: Vec<(usize, Result<Vec<IndexEntry>>)> =
            stream::iter(assets.iter().enumerate().map(|(ordinal, asset)| async move {
                (ordinal, self.ingest_asset(ordinal, asset).await)
            }))
            .buffer_unordered(self.concurrency.max(1))
            .collect()
            .await;
        results.sort_by_key(|(ordinal, _)| *ordinal);

        let mut entries = Vec::new();
        let mut degraded = identity_skipped;
        for (ordinal, result) in results {
            match result {
                Ok(asset_entries) => {
                    summary.assets_ingested += 1;
                    summary.segments_indexed += asset_entries.len();
                    entries.extend(asset_entries);
                }
                Err(err) => {
                    summary.assets_skipped += 1;
                    degraded = true;
                    warn!("Omitiendo activo {ordinal} tras fallo de ingesta: {err}");
                }
            }
        }

        info!("Índice {} construido. {summary}", &identity[..identity.len().min(12)]);
        RetrievalIndex {
            identity,
            entries,
            degraded,
        }
    }

    /// Ingiere un activo completo. Cualquier fallo (lectura, caption o
    /// embedding) descarta el activo entero; la cobertura parcial del
    /// corpus es aceptable.
    async fn ingest_asset(&self, ordinal: usize, asset: &VideoAsset) -> Result<Vec<IndexEntry>> {
        let digest = asset.digest()?;
        let segments = self.segmenter.segments(asset)?;
        if segments.is_empty() {
            debug!("El activo '{}' no produjo segmentos", asset.label());
            return Ok(Vec::new());
        }

        let mut entries = Vec::with_capacity(segments.len());
        for segment in segments {
            let payload = read_segment(asset, &segment)?;
            let caption = self.ingestion.caption(&payload).await?;
            let embedding = self.ingestion.embed(&caption).await?;
            entries.push(IndexEntry {
                asset_ordinal: ordinal,
                asset_digest: digest.clone(),
                asset_label: asset.label(),
                segment_id: segment.id,
                caption,
                embedding,
            });
        }
        Ok(entries)
    }
}

fn read_segment(asset: &VideoAsset, segment: &VideoSegment) -> Result<MediaPayload> {
    let mut file = File::open(asset.path()).map_err(|e| CoachError::asset(asset.path(), e))?;
    file.seek(SeekFrom::Start(segment.offset))
        .map_err(|e| CoachError::asset(asset.path(), e))?;
    let mut bytes = Vec::with_capacity(segment.len as usize);
    file.take(segment.len)
        .read_to_end(&mut bytes)
        .map_err(|e| CoachError::asset(asset.path(), e))?;
    Ok(MediaPayload {
        label: format!("{}#{}", asset.label(), segment.id),
        mime_type: asset.mime_type(),
        bytes,
    })
}
