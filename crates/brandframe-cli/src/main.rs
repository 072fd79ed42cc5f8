use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use brandframe_contracts::runs::{write_result, PipelineResult};
use brandframe_engine::{
    CreativeRequest, EngineConfig, PosterEngine, ProductRequest, TemplateRequest,
};
use clap::{Args, Parser, Subcommand};
use image::ImageFormat;
use tracing::info;
use tracing_subscriber::EnvFilter;

const DEFAULT_LOG_FILTER: &str = "brandframe_engine=info,brandframe_cli=info";

#[derive(Debug, Parser)]
#[command(name = "brandframe", version, about = "Brand-aware poster generation")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Refine a prompt against the brand and generate one image.
    Creative(CreativeArgs),
    /// Design and build product posters for every format.
    Product(ProductArgs),
    /// Fill a stored template with brand data and generated copy.
    Template(TemplateArgs),
    /// List the template catalog.
    Templates(TemplatesArgs),
}

#[derive(Debug, Clone, Default, Args)]
struct EngineArgs {
    #[arg(long)]
    text_model: Option<String>,
    #[arg(long)]
    image_model: Option<String>,
    #[arg(long)]
    data_dir: Option<PathBuf>,
    #[arg(long)]
    events_dir: Option<PathBuf>,
    /// Use the offline backend even when a credential is set.
    #[arg(long)]
    dryrun: bool,
}

impl EngineArgs {
    fn apply(&self, mut config: EngineConfig) -> EngineConfig {
        if let Some(model) = non_empty(self.text_model.as_deref()) {
            config.text_model = model;
        }
        if let Some(model) = non_empty(self.image_model.as_deref()) {
            config.image_model = model;
        }
        if let Some(dir) = &self.data_dir {
            config.data_dir = dir.clone();
        }
        if let Some(dir) = &self.events_dir {
            config.events_dir = Some(dir.clone());
        }
        config.dryrun |= self.dryrun;
        config
    }

    fn engine(&self) -> Result<PosterEngine> {
        PosterEngine::from_config(&self.apply(EngineConfig::from_env()))
    }
}

#[derive(Debug, Parser)]
struct CreativeArgs {
    #[arg(long, default_value = "demo")]
    user: String,
    #[arg(long)]
    brandkit: String,
    #[arg(long)]
    prompt: String,
    #[arg(long)]
    aspect_ratio: Option<String>,
    #[arg(long)]
    out: Option<PathBuf>,
    #[command(flatten)]
    engine: EngineArgs,
}

#[derive(Debug, Parser)]
struct ProductArgs {
    #[arg(long, default_value = "demo")]
    user: String,
    #[arg(long)]
    brandkit: String,
    #[arg(long)]
    name: String,
    #[arg(long)]
    description: Option<String>,
    #[arg(long, default_value = "sale")]
    poster_type: String,
    #[arg(long)]
    poster_description: Option<String>,
    #[arg(long)]
    tagline: Option<String>,
    /// URL, data URI, or local image file.
    #[arg(long)]
    product_image: Option<String>,
    #[arg(long)]
    out: Option<PathBuf>,
    #[command(flatten)]
    engine: EngineArgs,
}

#[derive(Debug, Parser)]
struct TemplateArgs {
    #[arg(long, default_value = "demo")]
    user: String,
    #[arg(long)]
    brandkit: String,
    #[arg(long)]
    template: String,
    #[arg(long)]
    out: Option<PathBuf>,
    #[command(flatten)]
    engine: EngineArgs,
}

#[derive(Debug, Parser)]
struct TemplatesArgs {
    #[command(flatten)]
    engine: EngineArgs,
}

fn main() {
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("brandframe error: {err:#}");
            std::process::exit(1);
        }
    }
}

fn run() -> Result<i32> {
    dotenvy::dotenv().ok();
    init_tracing();
    let cli = Cli::parse();
    match cli.command {
        Command::Creative(args) => run_creative(args),
        Command::Product(args) => run_product(args),
        Command::Template(args) => run_template(args),
        Command::Templates(args) => {
            let engine = args.engine.engine()?;
            println!("{}", serde_json::to_string_pretty(&engine.list_templates())?);
            Ok(0)
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn run_creative(args: CreativeArgs) -> Result<i32> {
    let engine = args.engine.engine()?;
    let result = engine.run_creative(CreativeRequest {
        user_id: args.user,
        brandkit_id: args.brandkit,
        prompt: args.prompt,
        aspect_ratio: args.aspect_ratio,
    });
    report(&result, args.out.as_deref())
}

fn run_product(args: ProductArgs) -> Result<i32> {
    let engine = args.engine.engine()?;
    let product_image = args
        .product_image
        .as_deref()
        .map(product_image_input)
        .transpose()?;
    let result = engine.run_product(ProductRequest {
        user_id: args.user,
        brandkit_id: args.brandkit,
        product_name: args.name,
        product_description: args.description,
        poster_type: args.poster_type,
        poster_description: args.poster_description,
        tagline: args.tagline,
        product_image,
    });
    report(&result, args.out.as_deref())
}

fn run_template(args: TemplateArgs) -> Result<i32> {
    let engine = args.engine.engine()?;
    let result = engine.run_template(TemplateRequest {
        user_id: args.user,
        brandkit_id: args.brandkit,
        template_id: args.template,
    });
    report(&result, args.out.as_deref())
}

/// Prints or writes the result and maps its class to an exit code.
fn report(result: &PipelineResult, out: Option<&Path>) -> Result<i32> {
    match out {
        Some(path) => {
            write_result(path, result)?;
            info!(run_id = %result.run_id, path = %path.display(), "result written");
        }
        None => println!("{}", serde_json::to_string_pretty(result)?),
    }
    info!(
        run_id = %result.run_id,
        pipeline = %result.pipeline,
        status = ?result.status,
        warnings = result.warnings.len(),
        "run complete"
    );
    Ok(result.response_class().exit_code())
}

/// URLs and data URIs pass through; anything else is read as a local file
/// and inlined as a data URI.
fn product_image_input(raw: &str) -> Result<String> {
    let raw = raw.trim();
    let lowered = raw.to_ascii_lowercase();
    if lowered.starts_with("http://") || lowered.starts_with("https://") || lowered.starts_with("data:") {
        return Ok(raw.to_string());
    }
    let path = Path::new(raw);
    let bytes = fs::read(path)
        .with_context(|| format!("failed reading product image {}", path.display()))?;
    let mime = ImageFormat::from_path(path)
        .map(|format| format.to_mime_type())
        .unwrap_or("application/octet-stream");
    Ok(format!("data:{mime};base64,{}", BASE64.encode(bytes)))
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}
