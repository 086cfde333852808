//! Driver de línea de comandos: colaborador puro del núcleo del pipeline.

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use video_rag_coach::{
    config::AppConfig,
    corpus::{self, MediaKind, VideoAsset, VideoCorpus},
    pipeline::PipelineOrchestrator,
};

/// Analiza un vídeo de rendimiento contra un corpus de vídeos instructivos
/// y genera feedback de coaching personalizado.
#[derive(Parser, Debug)]
#[command(name = "video_rag_coach", version)]
struct Args {
    /// Directorio con los vídeos instructivos (.mp4, .avi, .mov, .mkv)
    #[arg(long)]
    instructional_dir: std::path::PathBuf,

    /// Ruta al vídeo del usuario que se quiere analizar
    #[arg(long)]
    user_video: std::path::PathBuf,

    /// Nombre de la actividad (p. ej. 'worm dance', 'squat')
    #[arg(long)]
    activity: String,

    /// Información adicional del usuario para el coach
    /// (p. ej. 'I have knee problems', 'I'm a beginner')
    #[arg(long, default_value = "")]
    additional_info: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    // 1. Cargar .env e inicializar logging
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args = Args::parse();

    // 2. Cargar y validar configuración (credenciales incluidas)
    let cfg = AppConfig::from_env().context("Error al cargar la configuración")?;

    // 3. Construir el corpus desde el directorio instructivo
    let instructional = corpus::scan_instructional_dir(&args.instructional_dir)
        .context("Error al escanear el directorio instructivo")?;
    let user = VideoAsset::new(&args.user_video, MediaKind::User);
    let corpus = VideoCorpus::new(instructional, user).context("Corpus inválido")?;

    // 4. Construir el pipeline y ejecutar el análisis
    let pipeline = PipelineOrchestrator::new(cfg).context("Error inicializando el pipeline")?;
    let result = pipeline
        .run(&args.activity, &args.additional_info, &corpus)
        .await;

    if result.used_fallback {
        info!("El análisis se completó con degradación (used_fallback=true)");
    }

    println!("Coaching feedback:");
    println!("{}", result.text);
    Ok(())
}
