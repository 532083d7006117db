mod config;
mod output;
mod since;

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, ValueEnum};
use crossterm::tty::IsTty;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use ktail_k8s::{KubeClient, KubeSource, NamespaceScope};
use ktail_logs::{
    Admission, Callbacks, ContainerSpec, Controller, ControllerOptions, KeyStrategy, LogEvent,
    Matcher, PodInfo, TailError,
};

use crate::config::FileConfig;
use crate::output::{ColorMode, OutputConfig, Printer, Template};

/// How tailers tell container restarts apart
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
enum KeyBy {
    /// Runtime container id; a restart gets a fresh tailer
    #[default]
    Id,
    /// Container name; one tailer follows the container across restarts
    Name,
}

impl From<KeyBy> for KeyStrategy {
    fn from(key: KeyBy) -> Self {
        match key {
            KeyBy::Id => KeyStrategy::StreamIdentity,
            KeyBy::Name => KeyStrategy::ContainerName,
        }
    }
}

/// ktail - Tail logs from every matching Kubernetes container
#[derive(Parser, Debug)]
#[command(name = "ktail")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Regular expressions matched against pod and container names
    #[arg(value_name = "PATTERN")]
    patterns: Vec<String>,

    /// Kubernetes context name
    #[arg(long)]
    context: Option<String>,

    /// Namespace to watch (repeatable; defaults to the context's namespace)
    #[arg(short = 'n', long = "namespace", value_name = "NAMESPACE")]
    namespaces: Vec<String>,

    /// Watch every namespace
    #[arg(long, conflicts_with = "namespaces")]
    all_namespaces: bool,

    /// Exclude pods or containers matching this regular expression (repeatable; wins over includes)
    #[arg(short = 'x', long = "exclude", value_name = "PATTERN")]
    exclude: Vec<String>,

    /// Match pods by label (kubectl syntax)
    #[arg(short = 'l', long)]
    selector: Option<String>,

    /// Read each log from the start of the container's lifetime
    #[arg(short = 's', long)]
    since_start: bool,

    /// Get logs since a time (e.g. 2023-03-30) or duration (e.g. 1h) for containers found at startup
    #[arg(short = 'S', long)]
    since: Option<String>,

    /// Path to kubeconfig
    #[arg(long)]
    kubeconfig: Option<PathBuf>,

    /// Path to the config file (default ~/.config/ktail/config.toml)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Line template, e.g. '{pod} {message}'
    #[arg(short = 't', long)]
    template: Option<String>,

    /// Print messages only (plus timestamps with --timestamps)
    #[arg(short = 'r', long)]
    raw: bool,

    /// Prefix each line with its timestamp
    #[arg(short = 'T', long)]
    timestamps: bool,

    /// Don't print container attach/leave messages
    #[arg(short = 'q', long)]
    quiet: bool,

    /// When to use colors
    #[arg(long, value_enum, visible_alias = "colour")]
    color: Option<ColorMode>,

    /// Alias for --color=never
    #[arg(long)]
    no_color: bool,

    /// How container restarts are told apart
    #[arg(long, value_enum, default_value_t)]
    key_by: KeyBy,

    /// Enable debug logging
    #[arg(short = 'v', long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let level = if args.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::WARN
    };
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()))
        .with_writer(std::io::stderr)
        .init();

    let result = run(args).await;

    if let Err(e) = &result {
        eprintln!("Error: {:#}", e);
    }

    result
}

fn color_mode(args: &Args, file: &FileConfig) -> ColorMode {
    if args.no_color {
        return ColorMode::Never;
    }
    if let Some(mode) = args.color {
        return mode;
    }
    if file.no_color {
        return ColorMode::Never;
    }
    file.color_mode.unwrap_or_default()
}

async fn run(args: Args) -> Result<()> {
    let file = FileConfig::load(args.config.as_deref())?;

    let inclusion = Matcher::from_patterns(&args.patterns, args.selector.as_deref(), true)
        .context("Invalid include pattern")?;
    let exclusion =
        Matcher::from_patterns(&args.exclude, None, false).context("Invalid exclude pattern")?;

    let template = args
        .template
        .as_deref()
        .or(file.template.as_deref())
        .map(Template::parse)
        .transpose()
        .context("Invalid template")?;

    let since = args
        .since
        .as_deref()
        .map(|expr| {
            since::parse_since(expr, Utc::now())
                .with_context(|| format!("Invalid --since value {expr:?}"))
        })
        .transpose()?;

    let kubeconfig = args.kubeconfig.clone().or_else(|| file.kubeconfig.clone());
    let kube = KubeClient::new(kubeconfig.as_deref(), args.context.clone())?;
    tracing::debug!(context = kube.context().unwrap_or("<in-cluster>"), "kubernetes client configured");

    let namespaces = if args.all_namespaces {
        vec![NamespaceScope::All]
    } else if args.namespaces.is_empty() {
        vec![NamespaceScope::Named(kube.default_namespace())]
    } else {
        args.namespaces
            .iter()
            .cloned()
            .map(NamespaceScope::Named)
            .collect()
    };

    let printer = Arc::new(Printer::new(OutputConfig {
        color: color_mode(&args, &file).enabled(io::stdout().is_tty()),
        raw: args.raw || file.raw,
        timestamps: args.timestamps || file.timestamps,
        quiet: args.quiet || file.quiet,
        qualify_namespace: args.all_namespaces || namespaces.len() > 1,
        template,
    }));

    let client = kube.client().await?;
    let source = Arc::new(KubeSource::new(client));

    let cancel = CancellationToken::new();
    let callbacks = callbacks(Arc::clone(&printer), cancel.clone());

    let controller = Controller::new(
        source.clone(),
        source,
        ControllerOptions {
            namespaces,
            admission: Admission::new(inclusion, exclusion),
            since_start: args.since_start,
            since,
            key_strategy: args.key_by.into(),
            ..Default::default()
        },
        callbacks,
    );

    let interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::debug!("interrupted; stopping tailers");
            interrupt.cancel();
        }
    });

    controller.run(cancel).await?;
    Ok(())
}

fn callbacks(printer: Arc<Printer>, cancel: CancellationToken) -> Callbacks {
    let stdout = Arc::new(Mutex::new(io::stdout()));

    let on_event = {
        let printer = Arc::clone(&printer);
        move |event: LogEvent| {
            let mut out = stdout.lock();
            if let Err(err) = printer.write_event(&mut *out, &event) {
                printer.error(&format!("Could not write event: {err}"));
                cancel.cancel();
            }
        }
    };
    let on_enter = {
        let printer = Arc::clone(&printer);
        move |pod: &PodInfo, container: &ContainerSpec, initial: bool| {
            printer.entered(pod, container, initial);
            true
        }
    };
    let on_exit = {
        let printer = Arc::clone(&printer);
        move |pod: &PodInfo, container: &ContainerSpec| printer.left(pod, container)
    };
    let on_error = {
        let printer = Arc::clone(&printer);
        move |pod: &PodInfo, container: &ContainerSpec, err: &TailError| {
            printer.error(&format!(
                "Error while tailing container [{}]: {err}",
                printer.label(pod, container)
            ));
        }
    };

    Callbacks::default()
        .with_event(on_event)
        .with_enter(on_enter)
        .with_exit(on_exit)
        .with_error(on_error)
        .with_nothing_discovered(move || printer.info("No matching pods running yet"))
}
