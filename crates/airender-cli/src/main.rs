use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use airender_contracts::capabilities::DEFAULT_UPSCALER;
use airender_contracts::catalog::{CatalogKind, CatalogStore, FileCatalogStore, UPSCALER_MODEL_KEY};
use airender_contracts::events::{ErrorLog, FanoutSink, LogSink};
use airender_contracts::samplers::DEFAULT_SAMPLER;
use airender_engine::config::parse_timeout_secs;
use airender_engine::{
    Automatic1111Backend, ControlMode, ControlNetUnit, FileConditioningImage, GenerationParams,
    ServerConfig, TempDirAllocator, UpscaleOptions,
};
use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use serde_json::{json, Map, Value};

#[derive(Debug, Parser)]
#[command(name = "airender", version, about = "Automatic1111 render client")]
struct Cli {
    #[command(flatten)]
    server: ServerArgs,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Args)]
struct ServerArgs {
    /// Server base URL; defaults to AIRENDER_SD_URL.
    #[arg(long, global = true)]
    url: Option<String>,
    /// Request timeout in seconds; defaults to AIRENDER_SD_TIMEOUT.
    #[arg(long, global = true)]
    timeout: Option<String>,
    #[arg(long, global = true, default_value = "airender-catalogs.json")]
    store: PathBuf,
    /// Optional JSONL file receiving reported errors.
    #[arg(long, global = true)]
    events: Option<PathBuf>,
    /// Directory for generated images; defaults to the system temp dir.
    #[arg(long, global = true)]
    temp_dir: Option<PathBuf>,
}

#[derive(Debug, Subcommand)]
enum Command {
    Generate(GenerateArgs),
    Upscale(UpscaleArgs),
    Catalogs(CatalogArgs),
    Samplers,
    Capabilities,
}

#[derive(Debug, Parser)]
struct GenerateArgs {
    #[arg(long)]
    prompt: String,
    #[arg(long, default_value = "")]
    negative_prompt: String,
    /// Image-to-image source; text-to-image when absent.
    #[arg(long)]
    init_image: Option<PathBuf>,
    #[arg(long, default_value_t = 0.4)]
    similarity: f64,
    #[arg(long, default_value = DEFAULT_SAMPLER)]
    sampler: String,
    #[arg(long, default_value_t = 30)]
    steps: u32,
    #[arg(long, default_value_t = 7.0)]
    cfg_scale: f64,
    #[arg(long, default_value_t = 512)]
    width: u32,
    #[arg(long, default_value_t = 512)]
    height: u32,
    #[arg(long)]
    seed: Option<i64>,
    #[arg(long)]
    tiling: bool,
    /// ControlNet unit, e.g. `image=depth.png,module=depth_midas,model=control_depth,weight=0.8`.
    #[arg(long = "controlnet")]
    controlnets: Vec<String>,
    /// Extra request field as `key=value`; the value is parsed as JSON when possible.
    #[arg(long = "param")]
    params: Vec<String>,
    #[arg(long, default_value = "ai-render")]
    prefix: String,
}

#[derive(Debug, Parser)]
struct UpscaleArgs {
    #[arg(long)]
    image: PathBuf,
    #[arg(long, default_value_t = 2.0)]
    factor: f64,
    /// Upscaler name; defaults to the stored selection.
    #[arg(long)]
    upscaler: Option<String>,
    #[arg(long, default_value = "ai-render-upscaled")]
    prefix: String,
}

#[derive(Debug, Parser)]
struct CatalogArgs {
    #[arg(long, value_enum, default_value_t = CatalogChoice::All)]
    kind: CatalogChoice,
    /// Print the stored catalogs without contacting the server.
    #[arg(long)]
    cached: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum CatalogChoice {
    All,
    SdModels,
    Upscalers,
    ControlnetModels,
    ControlnetModules,
}

impl CatalogChoice {
    fn kinds(self) -> Vec<CatalogKind> {
        match self {
            CatalogChoice::All => CatalogKind::ALL.to_vec(),
            CatalogChoice::SdModels => vec![CatalogKind::SdModels],
            CatalogChoice::Upscalers => vec![CatalogKind::UpscalerModels],
            CatalogChoice::ControlnetModels => vec![CatalogKind::ControlNetModels],
            CatalogChoice::ControlnetModules => vec![CatalogKind::ControlNetModules],
        }
    }
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("airender error: {err:#}");
            std::process::exit(1);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    match cli.command {
        Command::Samplers => {
            for sampler in airender_contracts::samplers::samplers() {
                println!("{:>4}  {}", sampler.tag, sampler.id);
            }
            Ok(0)
        }
        Command::Capabilities => {
            let backend = build_backend(&cli.server)?;
            println!("{}", serde_json::to_string_pretty(&capabilities_json(&backend)?)?);
            Ok(0)
        }
        Command::Generate(args) => run_generate(&cli.server, args),
        Command::Upscale(args) => run_upscale(&cli.server, args),
        Command::Catalogs(args) => run_catalogs(&cli.server, args),
    }
}

fn server_config(args: &ServerArgs) -> Result<ServerConfig> {
    let mut config = ServerConfig::from_env();
    if let Some(url) = &args.url {
        config = config.with_base_url(Some(url.clone()));
    }
    if let Some(raw) = &args.timeout {
        let Some(timeout) = parse_timeout_secs(raw) else {
            bail!("--timeout expects a positive number of seconds, got {raw:?}");
        };
        config = config.with_timeout(timeout);
    }
    Ok(config)
}

fn build_backend(args: &ServerArgs) -> Result<Automatic1111Backend> {
    let config = server_config(args)?;
    log::debug!(
        "server {:?}, timeout {:.1}s",
        config.base_url,
        config.timeout.as_secs_f64()
    );
    let mut sink = FanoutSink::new().with(LogSink);
    if let Some(path) = &args.events {
        sink = sink.with(ErrorLog::new(path, uuid::Uuid::new_v4().to_string()));
    }
    let temp_files = args
        .temp_dir
        .clone()
        .map(TempDirAllocator::new)
        .unwrap_or_else(TempDirAllocator::system);
    Ok(Automatic1111Backend::new(config, sink).with_temp_files(temp_files))
}

fn run_generate(server: &ServerArgs, args: GenerateArgs) -> Result<i32> {
    let backend = build_backend(server)?;
    let params = generation_params(&args)?;
    let units = args
        .controlnets
        .iter()
        .map(|raw| parse_controlnet_unit(raw))
        .collect::<Result<Vec<_>>>()?;
    let prefix = format!("{}-{}", args.prefix, timestamp_secs());

    match backend.generate(params, args.init_image.as_deref(), &prefix, &units) {
        Ok(path) => {
            println!("{}", path.display());
            Ok(0)
        }
        Err(_) => Ok(2),
    }
}

fn run_upscale(server: &ServerArgs, args: UpscaleArgs) -> Result<i32> {
    let backend = build_backend(server)?;
    let mut store = FileCatalogStore::new(&server.store);
    let upscaler_model = args
        .upscaler
        .clone()
        .or_else(|| store.get(UPSCALER_MODEL_KEY).filter(|value| !value.is_empty()))
        .unwrap_or_else(|| DEFAULT_UPSCALER.to_string());
    let options = UpscaleOptions {
        factor: args.factor,
        upscaler_model,
    };

    match backend.upscale(&args.image, &args.prefix, &options) {
        Ok(path) => {
            println!("{}", path.display());
            Ok(0)
        }
        Err(_) => Ok(2),
    }
}

fn run_catalogs(server: &ServerArgs, args: CatalogArgs) -> Result<i32> {
    let mut store = FileCatalogStore::new(&server.store);
    let context = store_context(&server.store);
    let mut failures = 0;

    if !args.cached {
        let backend = build_backend(server)?;
        for kind in args.kind.kinds() {
            if backend.load_catalog(kind, &mut store, Some(&context)).is_err() {
                failures += 1;
            }
        }
        let wants_controlnet = args.kind == CatalogChoice::All
            || args.kind == CatalogChoice::ControlnetModels
            || args.kind == CatalogChoice::ControlnetModules;
        if wants_controlnet {
            if let Some(defaults) = airender_engine::choose_controlnet_defaults(&mut store)
                .context("failed to store ControlNet defaults")?
            {
                println!("ControlNet defaults: {} / {}", defaults.model, defaults.module);
            }
        }
    }

    for kind in args.kind.kinds() {
        let catalog = store.catalog(kind);
        println!("{} ({}):", kind.label(), catalog.len());
        for item in catalog.iter() {
            println!("  {item}");
        }
    }
    Ok(if failures == 0 { 0 } else { 2 })
}

fn generation_params(args: &GenerateArgs) -> Result<GenerationParams> {
    let mut params = json_object(json!({
        "prompt": args.prompt,
        "negative_prompt": args.negative_prompt,
        "image_similarity": args.similarity,
        "sampler": args.sampler,
        "steps": args.steps,
        "cfg_scale": args.cfg_scale,
        "width": args.width,
        "height": args.height,
        "seed": args.seed.unwrap_or(-1),
        "tiling": args.tiling,
    }));
    for raw in &args.params {
        let (key, value) = parse_param(raw)?;
        params.insert(key, value);
    }
    Ok(params)
}

fn parse_param(raw: &str) -> Result<(String, Value)> {
    let Some((key, value)) = raw.split_once('=') else {
        bail!("--param expects key=value, got {raw:?}");
    };
    let key = key.trim();
    if key.is_empty() {
        bail!("--param key is empty in {raw:?}");
    }
    let value = serde_json::from_str::<Value>(value.trim())
        .unwrap_or_else(|_| Value::String(value.to_string()));
    Ok((key.to_string(), value))
}

fn parse_controlnet_unit(raw: &str) -> Result<ControlNetUnit> {
    let mut fields = Map::new();
    for part in raw.split(',').map(str::trim).filter(|part| !part.is_empty()) {
        let Some((key, value)) = part.split_once('=') else {
            bail!("ControlNet field {part:?} is not key=value");
        };
        fields.insert(
            key.trim().to_ascii_lowercase().replace('-', "_"),
            Value::String(value.trim().to_string()),
        );
    }
    let text = |key: &str| fields.get(key).and_then(Value::as_str).map(str::to_string);
    let number = |key: &str| -> Result<Option<f64>> {
        text(key)
            .map(|value| {
                value
                    .parse::<f64>()
                    .with_context(|| format!("ControlNet {key} must be a number, got {value:?}"))
            })
            .transpose()
    };
    let flag = |key: &str| -> Result<Option<bool>> {
        text(key)
            .map(|value| match value.to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => Ok(true),
                "0" | "false" | "no" | "off" => Ok(false),
                _ => bail!("ControlNet {key} must be true or false, got {value:?}"),
            })
            .transpose()
    };

    let Some(image) = text("image") else {
        bail!("ControlNet unit {raw:?} needs image=<path>");
    };
    let Some(model) = text("model") else {
        bail!("ControlNet unit {raw:?} needs model=<name>");
    };
    let module = text("module").unwrap_or_else(|| "none".to_string());

    let mut unit = ControlNetUnit::new(Box::new(FileConditioningImage::new(image)), module, model);
    if let Some(weight) = number("weight")? {
        unit.weight = weight;
    }
    if let Some(resolution) = number("resolution")? {
        unit.preprocessor_res = resolution.max(0.0) as u32;
    }
    if let Some(value) = number("threshold_a")? {
        unit.threshold_a = value;
    }
    if let Some(value) = number("threshold_b")? {
        unit.threshold_b = value;
    }
    if let Some(value) = number("start")? {
        unit.guidance_start = value;
    }
    if let Some(value) = number("end")? {
        unit.guidance_end = value;
    }
    if let Some(value) = flag("lowvram")? {
        unit.lowvram = value;
    }
    if let Some(value) = flag("pixel_perfect")? {
        unit.pixel_perfect = value;
    }
    if let Some(raw_mode) = text("mode") {
        let Some(mode) = ControlMode::parse(&raw_mode) else {
            bail!("unknown ControlNet mode {raw_mode:?}");
        };
        unit.control_mode = mode;
    }
    Ok(unit)
}

fn capabilities_json(backend: &Automatic1111Backend) -> Result<Value> {
    let mut payload = json_object(serde_json::to_value(backend.capabilities())?);
    payload.insert("server_url".to_string(), json!(backend.config().base_url));
    Ok(Value::Object(payload))
}

fn store_context(path: &Path) -> String {
    path.file_name()
        .and_then(|value| value.to_str())
        .unwrap_or("catalogs")
        .to_string()
}

fn timestamp_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|duration| duration.as_secs())
        .unwrap_or(0)
}

fn json_object(value: Value) -> Map<String, Value> {
    value.as_object().cloned().unwrap_or_default()
}
