//! Modelos de dominio del corpus de vídeo (activos, corpus e identidad).
//!
//! Un `VideoCorpus` agrupa los vídeos instructivos (en orden de
//! presentación) y exactamente un vídeo del usuario. La identidad del
//! corpus es un fingerprint estable sobre los digests de los vídeos
//! instructivos y sirve como clave de caché del índice de recuperación.

use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use mime_guess::MimeGuess;
use sha2::{Digest, Sha256};
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::error::{CoachError, Result};

/// Extensiones de vídeo reconocidas por el colaborador de directorio.
pub const VIDEO_EXTENSIONS: &[&str] = &["mp4", "avi", "mov", "mkv"];

/// Papel de un activo dentro de una petición de análisis.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MediaKind {
    /// Contenido de referencia, indexable y recuperable.
    Instructional,
    /// El intento del usuario: nunca se indexa, sólo se evalúa.
    User,
}

/// Referencia inmutable a un fichero de vídeo.
///
/// El tamaño y el digest de contenido se calculan de forma perezosa la
/// primera vez que se necesitan y se memorizan para el resto de la vida
/// del activo.
#[derive(Clone, Debug)]
pub struct VideoAsset {
    path: PathBuf,
    kind: MediaKind,
    byte_len: OnceLock<u64>,
    digest: OnceLock<String>,
}

impl VideoAsset {
    pub fn new(path: impl Into<PathBuf>, kind: MediaKind) -> Self {
        Self {
            path: path.into(),
            kind,
            byte_len: OnceLock::new(),
            digest: OnceLock::new(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn kind(&self) -> MediaKind {
        self.kind
    }

    /// Nombre de fichero legible, usado para atribuir fuentes en el contexto.
    pub fn label(&self) -> String {
        self.path
            .file_name()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| self.path.to_string_lossy().to_string())
    }

    /// Tipo MIME estimado a partir de la extensión.
    pub fn mime_type(&self) -> String {
        MimeGuess::from_path(&self.path)
            .first()
            .map(|m| m.to_string())
            .unwrap_or_else(|| "video/mp4".to_string())
    }

    /// Tamaño en bytes (perezoso).
    pub fn byte_len(&self) -> Result<u64> {
        if let Some(len) = self.byte_len.get() {
            return Ok(*len);
        }
        let len = std::fs::metadata(&self.path)
            .map_err(|e| CoachError::asset(&self.path, e))?
            .len();
        Ok(*self.byte_len.get_or_init(|| len))
    }

    /// Digest SHA-256 del contenido, en hexadecimal (perezoso).
    ///
    /// Se lee el fichero por bloques para no cargar vídeos completos en
    /// memoria sólo para identificarlos.
    pub fn digest(&self) -> Result<String> {
        if let Some(d) = self.digest.get() {
            return Ok(d.clone());
        }
        let mut file = File::open(&self.path).map_err(|e| CoachError::asset(&self.path, e))?;
        let mut hasher = Sha256::new();
        let mut buf = [0u8; 64 * 1024];
        loop {
            let n = file.read(&mut buf).map_err(|e| CoachError::asset(&self.path, e))?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
        }
        let digest = hex::encode(hasher.finalize());
        Ok(self.digest.get_or_init(|| digest).clone())
    }

    /// Lee el contenido completo del activo.
    pub fn read_bytes(&self) -> Result<Vec<u8>> {
        std::fs::read(&self.path).map_err(|e| CoachError::asset(&self.path, e))
    }
}

/// Corpus de una petición de análisis: vídeos instructivos ordenados más
/// el vídeo del usuario.
#[derive(Clone, Debug)]
pub struct VideoCorpus {
    instructional: Vec<VideoAsset>,
    user: VideoAsset,
}

impl VideoCorpus {
    /// Construye el corpus validando los papeles de cada activo.
    ///
    /// Un corpus sin vídeos instructivos es válido (el pipeline degrada a
    /// un índice vacío), pero se avisa porque el feedback perderá toda la
    /// base de referencia.
    pub fn new(instructional: Vec<VideoAsset>, user: VideoAsset) -> Result<Self> {
        if user.kind() != MediaKind::User {
            return Err(CoachError::Configuration(
                "El activo del usuario no está marcado como MediaKind::User".to_string(),
            ));
        }
        if let Some(bad) = instructional.iter().find(|a| a.kind() != MediaKind::Instructional) {
            return Err(CoachError::Configuration(format!(
                "El activo '{}' no está marcado como instructivo",
                bad.label()
            )));
        }
        if instructional.is_empty() {
            warn!("Corpus sin vídeos instructivos: el feedback no tendrá referencias.");
        }
        Ok(Self { instructional, user })
    }

    pub fn instructional(&self) -> &[VideoAsset] {
        &self.instructional
    }

    pub fn user(&self) -> &VideoAsset {
        &self.user
    }

    /// Identidad del corpus: SHA-256 sobre los digests ordenados de los
    /// vídeos instructivos. El vídeo del usuario queda excluido a
    /// propósito: no es contenido buscable.
    ///
    /// Los activos ilegibles se omiten del fingerprint (la misma política
    /// de omisión que aplica la ingesta); se devuelve también la lista de
    /// activos que sí participan y si hubo omisiones.
    pub fn identity(&self) -> (String, Vec<&VideoAsset>, bool) {
        let mut hasher = Sha256::new();
        let mut readable = Vec::new();
        let mut skipped = false;
        for asset in &self.instructional {
            match asset.digest() {
                Ok(d) => {
                    hasher.update(d.as_bytes());
                    readable.push(asset);
                }
                Err(err) => {
                    warn!("Omitiendo activo ilegible del fingerprint: {err}");
                    skipped = true;
                }
            }
        }
        (hex::encode(hasher.finalize()), readable, skipped)
    }
}

/// Recorre un directorio (sin recursión) y devuelve los vídeos
/// instructivos reconocidos, ordenados por ruta para una presentación
/// estable.
pub fn scan_instructional_dir(dir: &Path) -> Result<Vec<VideoAsset>> {
    if !dir.is_dir() {
        return Err(CoachError::Configuration(format!(
            "La ruta no es un directorio: {}",
            dir.display()
        )));
    }

    let mut paths: Vec<PathBuf> = WalkDir::new(dir)
        .max_depth(1)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| e.path().to_path_buf())
        .filter(|p| {
            p.extension()
                .and_then(|ext| ext.to_str())
                .map(|ext| VIDEO_EXTENSIONS.contains(&ext.to_lowercase().as_str()))
                .unwrap_or(false)
        })
        .collect();
    paths.sort();

    debug!("Encontrados {} vídeos instructivos en {}", paths.len(), dir.display());
    Ok(paths
        .into_iter()
        .map(|p| VideoAsset::new(p, MediaKind::Instructional))
        .collect())
}
