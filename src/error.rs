//! Taxonomía de errores del núcleo del pipeline.
//!
//! Cada variante se corresponde con una familia de fallos con política de
//! recuperación propia:
//!   - `Transport`: fallo de red/API/timeout hacia un proveedor externo.
//!   - `Capability`: el proveedor respondió, pero con contenido vacío o malformado.
//!   - `Asset`: un fichero de vídeo no se pudo leer.
//!   - `Configuration`: credenciales o parámetros ausentes; se detecta al
//!     arrancar, nunca dentro del pipeline.
//!
//! `Transport` y `Capability` se recuperan localmente en la etapa que los
//! produce (fallback determinista); `Asset` durante la ingesta omite el
//! activo afectado. El contrato público del pipeline nunca propaga un error.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoachError {
    /// Fallo de red, de cuota/autenticación o de tiempo de espera.
    #[error("error de transporte hacia el proveedor: {0}")]
    Transport(String),

    /// Respuesta vacía o malformada de un modelo externo.
    #[error("respuesta inválida del modelo: {0}")]
    Capability(String),

    /// Fichero de vídeo ilegible.
    #[error("no se pudo leer el vídeo {}: {message}", .path.display())]
    Asset { path: PathBuf, message: String },

    /// Configuración incompleta o inválida (se valida al construir `AppConfig`).
    #[error("configuración inválida: {0}")]
    Configuration(String),
}

impl CoachError {
    /// Construye un `Asset` a partir de un error de E/S sobre una ruta.
    pub fn asset(path: impl Into<PathBuf>, err: impl std::fmt::Display) -> Self {
        Self::Asset {
            path: path.into(),
            message: err.to_string(),
        }
    }
}

/// Alias de resultado usado en todo el núcleo.
pub type Result<T, E = CoachError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn asset_error_incluye_la_ruta() {
        let err = CoachError::asset("/tmp/clip.mp4", "permiso denegado");
        let msg = err.to_string();
        assert!(msg.contains("/tmp/clip.mp4"));
        assert!(msg.contains("permiso denegado"));
    }
}
