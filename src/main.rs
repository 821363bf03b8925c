//! `tunehost` command line: load a provider and exercise its capabilities.

use anyhow::{Context, Result};
use clap::{CommandFactory, Parser, Subcommand};
use serde_json::json;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use tunehost::plugins::{
    load_configured_provider, MediaQuality, Payload, PluginHost, ProviderCatalog, ProviderSource,
    ScriptLoader, SearchKind,
};
use tunehost::Config;

/// CLI arguments.
#[derive(Parser, Debug)]
#[command(name = "tunehost", version, about = "Host runtime for scripted music source providers")]
struct Cli {
    /// Configuration file (defaults to the platform config directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show a provider's identity and implemented capabilities
    Info {
        /// Script path, or a catalog id
        script: String,
        /// Print the evaluated exports with function sources instead
        #[arg(long)]
        dump: bool,
    },
    /// Search through a provider
    Search {
        script: String,
        keyword: String,
        #[arg(long, default_value_t = 1)]
        page: u32,
        #[arg(long, default_value = "music", value_parser = parse_kind)]
        kind: SearchKind,
    },
    /// Fetch lyrics for a track given as JSON
    Lyric { script: String, track: String },
    /// Resolve a playable source for a track given as JSON
    Media {
        script: String,
        track: String,
        #[arg(long, default_value = "standard", value_parser = parse_quality)]
        quality: MediaQuality,
    },
    /// List chart groups
    TopLists { script: String },
    /// Import a sheet by URL or id
    Import { script: String, url: String },
    /// List providers known to the catalog
    List,
    /// Print the configuration JSON schema
    Schema,
    /// Generate shell completions
    Completions {
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

fn parse_kind(value: &str) -> Result<SearchKind, String> {
    SearchKind::parse(value).ok_or_else(|| format!("unknown search kind '{value}'"))
}

fn parse_quality(value: &str) -> Result<MediaQuality, String> {
    serde_json::from_value(json!(value)).map_err(|_| format!("unknown quality '{value}'"))
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging();

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to start async runtime")?;
    runtime.block_on(run(cli))
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Schema => return print_json(&Config::json_schema()),
        Command::Completions { shell } => {
            clap_complete::generate(shell, &mut Cli::command(), "tunehost", &mut std::io::stdout());
            return Ok(());
        }
        _ => {}
    }

    let config = Config::load_or_default(cli.config.as_deref())?;
    let base_dir = config_base_dir(cli.config.as_deref());
    let catalog = ProviderCatalog::new(&config.plugins, &base_dir);

    if let Command::List = cli.command {
        let entries: Vec<_> = catalog
            .entries()
            .into_iter()
            .map(|entry| {
                json!({
                    "id": entry.id,
                    "script": entry.script_path.display().to_string(),
                    "enabled": entry.enabled,
                    "configured": entry.configured,
                })
            })
            .collect();
        return print_json(&entries);
    }

    let loader = Arc::new(ScriptLoader::from_config(&config)?);
    match cli.command {
        Command::Info { script, dump: true } => {
            let path = script_path(&catalog, &script)?;
            let text = tokio::fs::read_to_string(&path)
                .await
                .with_context(|| format!("Failed to read provider script: {}", path.display()))?;
            let module = loader
                .build(&text, &path.display().to_string())
                .await
                .map_err(|err| anyhow::anyhow!(err))?;
            let exports = module.dump_exports().await.map_err(|err| anyhow::anyhow!(err))?;
            print_json(&exports)
        }
        Command::Info { script, dump: false } => {
            let host = open(&catalog, loader, &script).await?;
            let provider = host.provider();
            print_json(&json!({
                "identity": provider.identity(),
                "path": provider.path(),
                "fallback": provider.is_fallback(),
                "capabilities": provider.capabilities().iter().map(|c| c.as_str()).collect::<Vec<_>>(),
            }))
        }
        Command::Search {
            script,
            keyword,
            page,
            kind,
        } => {
            let host = open(&catalog, loader, &script).await?;
            print_json(&host.provider().search(&keyword, page, kind).await?)
        }
        Command::Lyric { script, track } => {
            let track = parse_item(&track)?;
            let host = open(&catalog, loader, &script).await?;
            print_json(&host.provider().get_lyric(&track).await?)
        }
        Command::Media {
            script,
            track,
            quality,
        } => {
            let track = parse_item(&track)?;
            let host = open(&catalog, loader, &script).await?;
            print_json(&host.provider().get_media_source(&track, quality).await?)
        }
        Command::TopLists { script } => {
            let host = open(&catalog, loader, &script).await?;
            print_json(&host.provider().get_top_lists().await?)
        }
        Command::Import { script, url } => {
            let host = open(&catalog, loader, &script).await?;
            print_json(&host.provider().import_music_sheet(&url).await?)
        }
        Command::List | Command::Schema | Command::Completions { .. } => Ok(()),
    }
}

/// Load `script` from disk when it names a file, otherwise by catalog id.
async fn open(catalog: &ProviderCatalog, loader: Arc<ScriptLoader>, script: &str) -> Result<PluginHost> {
    let path = Path::new(script);
    if path.is_file() {
        let bytes = tokio::fs::read(path)
            .await
            .with_context(|| format!("Failed to read provider script: {}", path.display()))?;
        return Ok(PluginHost::load(loader, ProviderSource::from_bytes(bytes), script).await);
    }
    Ok(load_configured_provider(Some(catalog), loader, script).await)
}

/// `script` itself when it names a file, otherwise the catalog entry's path.
fn script_path(catalog: &ProviderCatalog, script: &str) -> Result<PathBuf> {
    let path = Path::new(script);
    if path.is_file() {
        return Ok(path.to_path_buf());
    }
    catalog
        .get(script)
        .map(|entry| entry.script_path)
        .with_context(|| format!("No provider script or catalog entry named '{script}'"))
}

fn config_base_dir(explicit: Option<&Path>) -> PathBuf {
    explicit
        .map(Path::to_path_buf)
        .or_else(Config::default_path)
        .and_then(|path| path.parent().map(Path::to_path_buf))
        .unwrap_or_else(|| PathBuf::from("."))
}

fn parse_item(text: &str) -> Result<Payload> {
    serde_json::from_str(text).with_context(|| format!("Argument is not valid JSON: {text}"))
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
