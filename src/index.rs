//! Índice de recuperación y búsqueda por similitud.
//!
//! API pública:
//!   - `RetrievalIndex` / `IndexEntry`: el índice construido por la ingesta.
//!   - `Retriever::retrieve(&index, query, k)`: ranking coseno con desempate
//!     determinista por (orden del activo fuente, id de segmento).

use std::cmp::Ordering;
use std::sync::Arc;

use tracing::debug;

use crate::error::Result;
use crate::llm::IngestionCapability;

/// Entrada del índice: un segmento descrito y vectorizado, con referencia
/// a su activo de origen (ordinal de inserción + digest + etiqueta).
#[derive(Clone, Debug)]
pub struct IndexEntry {
    pub asset_ordinal: usize,
    pub asset_digest: String,
    pub asset_label: String,
    pub segment_id: u32,
    pub caption: String,
    pub embedding: Vec<f64>,
}

/// Índice de un corpus concreto, identificado por el fingerprint de sus
/// activos instructivos. `degraded` indica que alguna parte del corpus no
/// pudo ingerirse (cobertura parcial).
#[derive(Clone, Debug, Default)]
pub struct RetrievalIndex {
    pub identity: String,
    pub entries: Vec<IndexEntry>,
    pub degraded: bool,
}

impl RetrievalIndex {
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

/// Entrada recuperada con su puntuación de relevancia.
#[derive(Clone, Debug)]
pub struct ScoredEntry {
    pub entry: IndexEntry,
    pub score: f64,
}

/// Contexto recuperado, de mayor a menor relevancia. Puede estar vacío.
#[derive(Clone, Debug, Default)]
pub struct RetrievedContext {
    pub hits: Vec<ScoredEntry>,
}

impl RetrievedContext {
    pub fn is_empty(&self) -> bool {
        self.hits.is_empty()
    }
}

/// Similitud coseno. Vectores de distinta dimensión o de norma cero
/// puntúan 0.0 en lugar de fallar.
pub fn cosine_similarity(a: &[f64], b: &[f64]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let mut dot = 0.0;
    let mut norm_a = 0.0;
    let mut norm_b = 0.0;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

/// Recuperador: vectoriza la query en el mismo espacio que la ingesta y
/// devuelve las `k` entradas mejor puntuadas por encima del umbral.
pub struct Retriever {
    ingestion: Arc<dyn IngestionCapability>,
    min_score: f64,
}

impl Retriever {
    pub fn new(ingestion: Arc<dyn IngestionCapability>, min_score: f64) -> Self {
        Self { ingestion, min_score }
    }

    /// Busca las `k` entradas más relevantes para `query_text`.
    ///
    /// Un índice vacío o `k == 0` devuelven contexto vacío sin llamar al
    /// backend. El único error posible es el fallo del embedding de la
    /// query; el llamante lo trata como contexto vacío degradado.
    pub async fn retrieve(
        &self,
        index: &RetrievalIndex,
        query_text: &str,
        k: usize,
    ) -> Result<RetrievedContext> {
        if k == 0 || index.is_empty() {
            return Ok(RetrievedContext::default());
        }

        let query_vec = self.ingestion.embed(query_text).await?;

        let mut hits: Vec<ScoredEntry> = index
            .entries
            .iter()
            .map(|entry| ScoredEntry {
                score: cosine_similarity(&query_vec, &entry.embedding),
                entry: entry.clone(),
            })
            .filter(|hit| hit.score >= self.min_score)
            .collect();

        // Puntuación descendente; a igualdad de puntuación decide el orden
        // de inserción del activo fuente y después el id de segmento.
        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.entry.asset_ordinal.cmp(&b.entry.asset_ordinal))
                .then_with(|| a.entry.segment_id.cmp(&b.entry.segment_id))
        });
        hits.truncate(k);

        debug!(
            "Recuperadas {} entradas de {} para la query ({} caracteres)",
            hits.len(),
            index.len(),
            query_text.len()
        );
        Ok(RetrievedContext { hits })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use crate::error::CoachError;
    use crate::llm::MediaPayload;

    /// Capacidad de ingesta determinista para pruebas: el embedding de un
    /// texto es una función fija de su primer byte.
    struct StubIngestion;

    #[async_trait]
    impl IngestionCapability for StubIngestion {
        async fn caption(&self, _segment: &MediaPayload) -> Result<String> {
            Ok("caption".to_string())
        }

        async fn embed(&self, text: &str) -> Result<Vec<f64>> {
            if text.is_empty() {
                return Err(CoachError::Capability("texto vacío".to_string()));
            }
            let seed = f64::from(text.as_bytes()[0]);
            Ok(vec![seed, 1.0, 0.0])
        }
    }

    fn entry(ordinal: usize, segment: u32, embedding: Vec<f64>) -> IndexEntry {
        IndexEntry {
            asset_ordinal: ordinal,
            asset_digest: format!("digest-{ordinal}"),
            asset_label: format!("video-{ordinal}.mp4"),
            segment_id: segment,
            caption: format!("segmento {segment} del vídeo {ordinal}"),
            embedding,
        }
    }

    fn retriever() -> Retriever {
        Retriever::new(Arc::new(StubIngestion), f64::MIN)
    }

    #[test]
    fn coseno_de_vectores_identicos_es_uno() {
        let v = vec![0.5, 0.5, 0.1];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn coseno_con_dimensiones_distintas_es_cero() {
        assert_eq!(cosine_similarity(&[1.0, 2.0], &[1.0]), 0.0);
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 1.0]), 0.0);
    }

    #[tokio::test]
    async fn indice_vacio_devuelve_contexto_vacio_sin_error() {
        let index = RetrievalIndex::default();
        let ctx = retriever().retrieve(&index, "cualquier query", 5).await.unwrap();
        assert!(ctx.is_empty());
    }

    #[tokio::test]
    async fn k_cero_devuelve_contexto_vacio() {
        let index = RetrievalIndex {
            identity: "id".to_string(),
            entries: vec![entry(0, 0, vec![1.0, 1.0, 0.0])],
            degraded: false,
        };
        let ctx = retriever().retrieve(&index, "query", 0).await.unwrap();
        assert!(ctx.is_empty());
    }

    #[tokio::test]
    async fn el_desempate_es_por_orden_de_fuente_y_segmento() {
        // Tres entradas con el mismo embedding (misma puntuación exacta),
        // insertadas en desorden.
        let same = vec![1.0, 1.0, 0.0];
        let index = RetrievalIndex {
            identity: "id".to_string(),
            entries: vec![
                entry(1, 2, same.clone()),
                entry(0, 7, same.clone()),
                entry(1, 0, same.clone()),
            ],
            degraded: false,
        };

        let ctx = retriever().retrieve(&index, "query", 10).await.unwrap();
        let order: Vec<(usize, u32)> = ctx
            .hits
            .iter()
            .map(|h| (h.entry.asset_ordinal, h.entry.segment_id))
            .collect();
        assert_eq!(order, vec![(0, 7), (1, 0), (1, 2)]);
    }

    #[tokio::test]
    async fn el_umbral_filtra_entradas_poco_relevantes() {
        let index = RetrievalIndex {
            identity: "id".to_string(),
            entries: vec![
                // Casi paralela a la query "a" (byte 97): puntuación alta.
                entry(0, 0, vec![97.0, 1.0, 0.0]),
                // Ortogonal: puntuación 0.
                entry(1, 0, vec![0.0, 0.0, 1.0]),
            ],
            degraded: false,
        };

        let strict = Retriever::new(Arc::new(StubIngestion), 0.5);
        let ctx = strict.retrieve(&index, "a", 10).await.unwrap();
        assert_eq!(ctx.hits.len(), 1);
        assert_eq!(ctx.hits[0].entry.asset_ordinal, 0);
    }

    #[tokio::test]
    async fn truncado_a_k_resultados() {
        let same = vec![1.0, 1.0, 0.0];
        let index = RetrievalIndex {
            identity: "id".to_string(),
            entries: (0..5).map(|i| entry(i, 0, same.clone())).collect(),
            degraded: false,
        };
        let ctx = retriever().retrieve(&index, "query", 2).await.unwrap();
        assert_eq!(ctx.hits.len(), 2);
    }
}
