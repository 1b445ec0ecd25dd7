//! 命令行入口：审计本地 HTML 文件，输出 Markdown 或 JSON 报告

use std::fs;
use std::io::{self, Read, Write};
use std::path::PathBuf;
use std::process;
use std::sync::Arc;

use clap::{Parser, ValueEnum};
use serde::Serialize;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use url::Url;

use altspark::audit::{Counts, ExportedIssue};
use altspark::config::{AuditConfig, ConfigManager, MemorySettingsStore, Settings};
use altspark::env::{core::LogLevel, EnvVar};
use altspark::provider::CapabilitySet;
use altspark::{
    ActivationMonitor, AuditEngine, AuditError, AuditRequest, AuditResult, Page, SuggestionProvider,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Markdown,
    Json,
}

/// Altspark CLI.
#[derive(Parser)]
#[command(name = "altspark")]
#[command(about = "Audit alt text, link labels and headings in an HTML document")]
#[command(version)]
struct Cli {
    /// HTML file to audit, "-" reads stdin
    input: Option<String>,

    /// Maximum number of candidates to audit
    #[arg(short, long)]
    budget: Option<usize>,

    /// Apply all safe fixes after the audit
    #[arg(long)]
    apply_safe: bool,

    /// Report format
    #[arg(short, long, value_enum, default_value_t = OutputFormat::Markdown)]
    format: OutputFormat,

    /// Write the report to a file instead of stdout
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Write the (possibly fixed) document to a file
    #[arg(long)]
    fixed_html: Option<PathBuf>,

    /// Charset of the input document
    #[arg(short, long, default_value = "utf-8")]
    encoding: String,

    /// Language for suggestions, "auto" follows the page
    #[arg(short, long)]
    language: Option<String>,

    /// Page address used to resolve relative image sources
    #[arg(short = 'u', long)]
    base_url: Option<String>,

    /// Use power saver budgets
    #[arg(long)]
    power_saver: bool,

    /// Configuration file path
    #[arg(short, long)]
    config: Option<String>,

    /// Write an example configuration file and exit
    #[arg(long)]
    generate_config: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct JsonReport {
    audit_id: String,
    language: String,
    summary: String,
    has_more: bool,
    counts: Counts,
    issues: Vec<ExportedIssue>,
}

fn init_tracing() {
    let level = LogLevel::get().unwrap_or_else(|_| "warn".to_string());
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_target(false).with_writer(io::stderr))
        .init();
}

fn load_config(path: Option<&str>) -> AuditResult<AuditConfig> {
    let manager = match path {
        Some(path) => ConfigManager::with_path(path)?,
        None => ConfigManager::new()?,
    };
    Ok(manager.into_config())
}

fn read_input(input: &str) -> AuditResult<Vec<u8>> {
    if input == "-" {
        let mut data = Vec::new();
        io::stdin().read_to_end(&mut data)?;
        return Ok(data);
    }
    Ok(fs::read(input)?)
}

async fn run(cli: Cli) -> AuditResult<()> {
    if let Some(path) = cli.generate_config.as_deref() {
        ConfigManager::generate_example_config(path)?;
        eprintln!("示例配置已写入 {}", path);
        return Ok(());
    }

    let Some(input) = cli.input.as_deref() else {
        return Err(AuditError::ConfigError("缺少输入文件".to_string()));
    };

    let config = load_config(cli.config.as_deref())?;
    let url = match cli.base_url.as_deref() {
        Some(raw) => Some(
            Url::parse(raw).map_err(|e| AuditError::ParseError(format!("无效的地址 {}: {}", raw, e)))?,
        ),
        None => None,
    };

    let data = read_input(input)?;
    let page = Page::from_bytes(&data, &cli.encoding, url)?;

    // 命令行调用本身就是一次用户交互
    let monitor = Arc::new(ActivationMonitor::activated());
    let provider = SuggestionProvider::new(CapabilitySet::new(), monitor, &config);

    let mut settings = Settings {
        power_saver_mode: cli.power_saver,
        ..Settings::default()
    };
    if let Some(language) = cli.language {
        settings.user_language = language;
    }

    let engine = AuditEngine::new(
        page,
        Arc::new(provider),
        Box::new(MemorySettingsStore::new(settings)),
        config,
    );

    let mut request = AuditRequest::page();
    if let Some(budget) = cli.budget {
        request = request.with_budget(budget);
    }
    let report = engine.run(request).await?;

    if cli.apply_safe {
        let applied = engine.apply_all_safe();
        tracing::info!("应用了 {} 个安全修复", applied);
    }

    let rendered = match cli.format {
        OutputFormat::Markdown => engine.export_markdown(None),
        OutputFormat::Json => {
            let json = JsonReport {
                audit_id: report.audit_id.clone(),
                language: report.language.clone(),
                summary: report.summary.clone(),
                has_more: report.has_more,
                counts: engine.counts(),
                issues: engine.exported_issues(),
            };
            serde_json::to_string_pretty(&json)?
        }
    };

    match cli.output {
        Some(path) => fs::write(path, rendered)?,
        None => {
            let mut stdout = io::stdout().lock();
            writeln!(stdout, "{}", rendered)?;
        }
    }

    if let Some(path) = cli.fixed_html {
        fs::write(path, engine.page().serialize(&cli.encoding)?)?;
    }

    Ok(())
}

fn main() {
    let cli = Cli::parse();
    init_tracing();

    // 引擎持有 Rc DOM，只能在单线程运行时上执行
    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("Error: 无法创建运行时: {}", e);
            process::exit(1);
        }
    };

    if let Err(error) = runtime.block_on(run(cli)) {
        eprintln!("Error: {}", error);
        process::exit(1);
    }
}
