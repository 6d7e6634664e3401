// CHONKER HARVEST - pull text, links and images out of a PDF
use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use log::info;
use std::fs;
use std::path::{Path, PathBuf};

use chonker_harvest::{ExtractionConductor, ExtractionResult, PipelineConfig, RecognitionEngine};

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Json,
    Text,
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Extract text, hyperlinks and images from a PDF")]
struct Args {
    /// PDF file to process
    pdf_file: PathBuf,

    /// Config file (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Maximum number of images to keep
    #[arg(long)]
    max_images: Option<usize>,

    /// Write recovered images here
    #[arg(short, long)]
    out_dir: Option<PathBuf>,

    #[arg(short, long, value_enum, default_value_t = OutputFormat::Json)]
    format: OutputFormat,

    /// Skip the OCR fallback
    #[arg(long)]
    no_ocr: bool,

    /// Skip hyperlink correlation
    #[arg(long)]
    no_links: bool,

    /// Always run the byte scan for images
    #[arg(long)]
    exhaustive_images: bool,
}

fn build_config(args: &Args) -> Result<PipelineConfig> {
    let mut config = PipelineConfig::load(args.config.as_deref()).context("Failed to load configuration")?;
    if let Some(max) = args.max_images {
        config.max_images = max;
    }
    if args.no_ocr {
        config.ocr_enabled = false;
    }
    if args.no_links {
        config.hyperlinks = false;
    }
    if args.exhaustive_images {
        config.exhaustive_image_scan = true;
    }
    Ok(config)
}

fn write_images(result: &ExtractionResult, out_dir: &Path) -> Result<()> {
    fs::create_dir_all(out_dir)
        .with_context(|| format!("Failed to create output directory {}", out_dir.display()))?;
    for image in &result.images {
        let path = out_dir.join(&image.filename);
        fs::write(&path, &image.bytes).with_context(|| format!("Failed to write {}", path.display()))?;
        info!("wrote {} ({} bytes)", path.display(), image.size);
    }
    Ok(())
}

fn print_text(result: &ExtractionResult) {
    println!("--- Extracted Text ---");
    println!("{}", result.text);
    println!();
    println!("--- Hyperlinks ({}) ---", result.hyperlinks.len());
    for link in &result.hyperlinks {
        match link.page {
            Some(page) => println!("{:>6}  p{}  {}  [{}]", link.offset, page, link.url, link.anchor_text),
            None => println!("{:>6}  --  {}  [{}]", link.offset, link.url, link.anchor_text),
        }
    }
    println!();
    println!("--- Images ({}) ---", result.images.len());
    for image in &result.images {
        println!("{}  {}  {} bytes", image.filename, image.format.mime_type(), image.size);
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let args = Args::parse();
    let config = build_config(&args)?;

    let engine = config.ocr_enabled.then(|| RecognitionEngine::system(&config));
    let conductor = ExtractionConductor::new(config, engine.clone());
    let outcome = conductor.extract_file(&args.pdf_file).await;
    if let Some(engine) = &engine {
        engine.shutdown();
    }
    let result = outcome.with_context(|| format!("Failed to extract {}", args.pdf_file.display()))?;

    if let Some(out_dir) = &args.out_dir {
        write_images(&result, out_dir)?;
    }

    match args.format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&result)?),
        OutputFormat::Text => print_text(&result),
    }
    Ok(())
}
