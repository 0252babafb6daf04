// Mentora command line interface
// Analyze text, inspect configuration and run scripted avatar sessions

mod simulate;

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use mentora_core::{render_settings, EnvOverrides, SettingsFormat};
use mentora_me::{AnalyticsConfig, ContentAnalyzer, EngineConfig, InteractionEvent, InteractionKind, InteractionTracker};
use std::path::PathBuf;
use tracing::debug;
use tracing_subscriber::EnvFilter;

const ENV_PREFIX: &str = "MENTORA";

#[derive(Parser)]
#[command(name = "mentora")]
#[command(about = "Mentora tutor avatar engine", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Settings file (TOML, JSON or YAML)
    #[arg(long, short, global = true)]
    config: Option<PathBuf>,

    #[arg(long, short, global = true)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Recommend a gesture for a piece of text
    Analyze {
        /// Text to analyze
        text: String,

        /// Bias as a user who mostly sends SQL queries (technical) or clicks (expressive)
        #[arg(long, value_enum)]
        style: Option<StyleArg>,

        /// Print the full analysis as JSON
        #[arg(long)]
        json: bool,
    },

    /// Configuration management
    #[command(subcommand)]
    Config(ConfigCommands),

    /// Run a scripted session against a console renderer and speech backend
    Simulate {
        /// Script file; a built-in tutoring exchange is used when omitted
        #[arg(long, short)]
        script: Option<PathBuf>,

        /// Time compression factor (2.0 runs twice as fast)
        #[arg(long, default_value = "1.0")]
        speed: f64,
    },
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Print the effective configuration
    Show {
        #[arg(long, short, value_enum, default_value = "toml")]
        format: OutputFormat,
    },

    /// Validate a settings file
    Validate {
        path: PathBuf,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum OutputFormat {
    Json,
    Toml,
    Yaml,
}

impl From<OutputFormat> for SettingsFormat {
    fn from(format: OutputFormat) -> Self {
        match format {
            OutputFormat::Json => SettingsFormat::Json,
            OutputFormat::Toml => SettingsFormat::Toml,
            OutputFormat::Yaml => SettingsFormat::Yaml,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum StyleArg {
    Technical,
    Expressive,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    if cli.json_logs {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).with_target(false).init();
    }

    let env = EnvOverrides::from_env(ENV_PREFIX);
    match cli.command {
        Commands::Analyze { text, style, json } => {
            let config = load_config(cli.config.as_deref(), &env)?;
            analyze(&config, &text, style, json)?;
        }
        Commands::Config(ConfigCommands::Show { format }) => {
            let config = load_config(cli.config.as_deref(), &env)?;
            show_config(&config, format)?;
        }
        Commands::Config(ConfigCommands::Validate { path }) => {
            let config = load_config(Some(&path), &EnvOverrides::default())?;
            println!("✅ {} is valid", path.display());
            debug!(?config, "validated configuration");
        }
        Commands::Simulate { script, speed } => {
            let config = load_config(cli.config.as_deref(), &env)?;
            simulate::run(config, script.as_deref(), speed).await?;
        }
    }

    Ok(())
}

fn load_config(path: Option<&std::path::Path>, env: &EnvOverrides) -> anyhow::Result<EngineConfig> {
    let config = EngineConfig::load(path, env).with_context(|| match path {
        Some(path) => format!("failed to load settings from {}", path.display()),
        None => "invalid configuration".to_string(),
    })?;
    Ok(config)
}

fn analyze(config: &EngineConfig, text: &str, style: Option<StyleArg>, json: bool) -> anyhow::Result<()> {
    let analyzer = ContentAnalyzer::new(config.avatar.analyzer.clone())?;
    let mut analysis = analyzer.analyze(text);

    if let Some(style) = style {
        let tracker = InteractionTracker::new(AnalyticsConfig::default())?
            .with_confidence_cap(config.avatar.analyzer.confidence_cap);
        let kind = match style {
            StyleArg::Technical => InteractionKind::SqlQuery,
            StyleArg::Expressive => InteractionKind::Click,
        };
        for _ in 0..5 {
            tracker.record(InteractionEvent::new(kind, "cli").for_user("cli"));
        }
        analysis = tracker.recommend("cli", analysis);
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&analysis)?);
        return Ok(());
    }

    match &analysis.recommended_gesture {
        Some(gesture) => println!("gesture:     {} ({:?})", gesture, analysis.source),
        None => println!("gesture:     none"),
    }
    println!("confidence:  {:.2}", analysis.confidence);
    println!("sentiment:   {:?}", analysis.tags.sentiment);
    println!("intent:      {:?}", analysis.tags.intent);
    println!("complexity:  {:?}", analysis.tags.complexity);
    if !analysis.tags.domain_terms.is_empty() {
        println!("terms:       {}", analysis.tags.domain_terms.join(", "));
    }
    Ok(())
}

fn show_config(config: &EngineConfig, format: OutputFormat) -> anyhow::Result<()> {
    let rendered = render_settings(config, format.into()).context("Failed to render configuration")?;
    println!("{}", rendered);
    Ok(())
}
