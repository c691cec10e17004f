use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use veriface_core::{EngineConfig, FaceEngine, MatchResult, SeetaDetector, Template};

/// Call-site enrollment policy: accept nothing below five captures, even
/// though the engine itself only needs three clean images to build a template.
const MIN_ENROLLMENT_IMAGES: usize = 5;

#[derive(Parser)]
#[command(name = "veriface", about = "Veriface biometric face matching CLI")]
struct Cli {
    /// Path to the SeetaFace detection model
    #[arg(long, global = true, default_value = "models/seeta_fd_frontal_v1.0.bin")]
    model: String,

    /// Engine configuration TOML (defaults apply when omitted)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build an enrollment template from a batch of capture images
    Enroll {
        /// Label for this template (e.g. "workstation", "glasses")
        #[arg(short, long)]
        label: String,
        /// Where to write the template record
        #[arg(short, long, default_value = "template.json")]
        output: PathBuf,
        /// Capture images (at least 5)
        images: Vec<PathBuf>,
    },
    /// Verify a capture against a stored template
    Verify {
        /// Template record written by `enroll`
        #[arg(short, long)]
        template: PathBuf,
        image: PathBuf,
    },
    /// Compare two captures directly
    Compare { image_a: PathBuf, image_b: PathBuf },
}

/// On-disk template record.
#[derive(serde::Serialize, serde::Deserialize)]
struct TemplateRecord {
    id: String,
    label: String,
    created_at: String,
    images_processed: usize,
    augmented_samples: usize,
    template: Template,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => EngineConfig::load_from_path(path)?,
        None => EngineConfig::default(),
    };
    let detector = SeetaDetector::load(&cli.model)?;
    let engine = FaceEngine::new(Box::new(detector), config)?;
    tracing::debug!(model = %cli.model, "engine ready");

    match cli.command {
        Commands::Enroll { label, output, images } => enroll(&engine, &label, &output, &images),
        Commands::Verify { template, image } => verify(&engine, &template, &image),
        Commands::Compare { image_a, image_b } => compare(&engine, &image_a, &image_b),
    }
}

fn enroll(engine: &FaceEngine, label: &str, output: &Path, images: &[PathBuf]) -> Result<()> {
    if images.len() < MIN_ENROLLMENT_IMAGES {
        bail!(
            "enrollment needs at least {MIN_ENROLLMENT_IMAGES} images for reliable templates, got {}",
            images.len()
        );
    }

    let buffers = images
        .iter()
        .map(|path| load_image(path))
        .collect::<Result<Vec<_>>>()?;

    let enrollment = engine.enroll(&buffers)?;

    for warning in &enrollment.warnings {
        eprintln!("warning: {warning}");
    }
    println!(
        "Enrolled '{label}': {}/{} images processed, {} augmented samples",
        enrollment.images_processed, enrollment.total_images, enrollment.augmented_samples
    );

    let record = TemplateRecord {
        id: uuid::Uuid::new_v4().to_string(),
        label: label.to_string(),
        created_at: chrono::Utc::now().to_rfc3339(),
        images_processed: enrollment.images_processed,
        augmented_samples: enrollment.augmented_samples,
        template: enrollment.template,
    };
    let json = serde_json::to_string_pretty(&record)?;
    std::fs::write(output, json)
        .with_context(|| format!("failed to write template to {}", output.display()))?;
    println!("Template written to {}", output.display());
    Ok(())
}

fn verify(engine: &FaceEngine, template_path: &Path, image_path: &Path) -> Result<()> {
    let record = load_template(template_path)?;
    let image = load_image(image_path)?;

    let result = engine.verify(&image, &record.template)?;
    print_result(&result, &format!("template '{}'", record.label));

    if !result.matched {
        exit_no_match();
    }
    Ok(())
}

fn compare(engine: &FaceEngine, path_a: &Path, path_b: &Path) -> Result<()> {
    let image_a = load_image(path_a)?;
    let image_b = load_image(path_b)?;

    let result = engine.compare(&image_a, &image_b)?;
    print_result(
        &result,
        &format!("{} vs {}", path_a.display(), path_b.display()),
    );

    if !result.matched {
        exit_no_match();
    }
    Ok(())
}

/// Exit with code 1 so scripts can branch on the decision.
fn exit_no_match() -> ! {
    use std::io::Write;
    let _ = std::io::stdout().flush();
    std::process::exit(1);
}

fn print_result(result: &MatchResult, subject: &str) {
    println!("Match result for {subject}:");
    println!("  matched:             {}", result.matched);
    println!("  combined similarity: {:.4}", result.combined_similarity);
    println!("  pixel similarity:    {:.4}", result.pixel_similarity);
    println!("  euclidean distance:  {:.4}", result.euclidean_distance);
    println!("  confidence:          {:.2}%", result.confidence);
}

fn load_image(path: &Path) -> Result<image::RgbImage> {
    let img = image::open(path)
        .with_context(|| format!("failed to open image {}", path.display()))?;
    Ok(img.to_rgb8())
}

fn load_template(path: &Path) -> Result<TemplateRecord> {
    let json = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read template {}", path.display()))?;
    serde_json::from_str(&json)
        .with_context(|| format!("invalid template record in {}", path.display()))
}
