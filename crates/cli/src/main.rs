use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use palisade_backend::MemoryBackend;
use palisade_core::{
    ApplyContext, BackendOps, Converter, DomainRecord, ListScope, ResourceObject, Validator,
    WatchEvent,
};
use palisade_kinds::{
    AddressGroup, AddressGroupConverter, AddressGroupRecord, AddressGroupTabulator,
    AddressGroupValidator, PolicyRule, PolicyRuleConverter, PolicyRuleRecord,
    PolicyRuleTabulator, PolicyRuleValidator, Service, ServiceConverter, ServiceRecord,
    ServiceTabulator, ServiceValidator,
};
use palisade_registry::{BaseStorage, StatusStorage, Table, Tabulator};
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "palisadectl", version, about = "Palisade policy registry CLI")]
struct Cli {
    /// Output format
    #[arg(short = 'o', long = "output", value_enum, global = true, default_value_t = Output::Human)]
    output: Output,

    /// Namespace for namespaced kinds
    #[arg(long = "ns", global = true)]
    namespace: Option<String>,

    /// Directory holding the backend state files shared between runs
    #[arg(long = "state", global = true, default_value = ".palisade")]
    state: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum Output {
    Human,
    Json,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List objects of a kind
    Ls {
        /// Kind name, e.g. "service", "addressgroup", "policyrule"
        kind: String,
    },
    /// Fetch one object
    Get { kind: String, name: String },
    /// Create an object from a YAML or JSON manifest
    Create {
        #[arg(short = 'f', long = "file")]
        file: PathBuf,
        /// Validate the whole pipeline but persist nothing
        #[arg(long = "dry-run", action = ArgAction::SetTrue)]
        dry_run: bool,
    },
    /// Delete one object
    Delete { kind: String, name: String },
    /// Patch one object
    Patch {
        kind: String,
        name: String,
        /// Patch payload, e.g. '{"spec":{"description":"x"}}'
        patch: String,
        /// Patch media type
        #[arg(long = "type", default_value = palisade_patch::MERGE_PATCH_TYPE)]
        patch_type: String,
    },
    /// Merge-patch the status subresource only
    StatusPatch { kind: String, name: String, patch: String },
    /// Stream events for a kind until interrupted
    Watch { kind: String },
}

fn init_tracing() {
    let env = std::env::var("PALISADE_LOG").unwrap_or_else(|_| "info".to_string());
    let filter = tracing_subscriber::EnvFilter::from_str(&env)
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(true).init();
}

fn init_metrics() {
    if let Ok(addr) = std::env::var("PALISADE_METRICS_ADDR") {
        if let Ok(sock) = addr.parse::<std::net::SocketAddr>() {
            let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
            match builder.with_http_listener(sock).install() {
                Ok(_) => tracing::info!(addr = %addr, "Prometheus metrics exporter listening"),
                Err(e) => tracing::warn!(error = %e, "failed to install metrics exporter"),
            }
        } else {
            tracing::warn!(addr = %addr, "invalid PALISADE_METRICS_ADDR; expected host:port");
        }
    }
}

/// One kind's wiring: registry in front, snapshot file behind.
struct KindCtl<K: ResourceObject, D: DomainRecord> {
    storage: Arc<BaseStorage<K, D>>,
    backend: Arc<MemoryBackend<D>>,
    path: PathBuf,
}

impl<K: ResourceObject, D: DomainRecord> KindCtl<K, D> {
    fn open(
        state_dir: &Path,
        file: &str,
        converter: Arc<dyn Converter<K, D>>,
        validator: Arc<dyn Validator<K>>,
        tabulator: Arc<dyn Tabulator<K>>,
    ) -> Result<Self> {
        let path = state_dir.join(file);
        let backend = Arc::new(
            MemoryBackend::load(&path)
                .with_context(|| format!("loading state from {}", path.display()))?,
        );
        let ops: Arc<dyn BackendOps<D>> = backend.clone();
        let storage =
            Arc::new(BaseStorage::new(converter, validator, ops).with_tabulator(tabulator));
        Ok(Self { storage, backend, path })
    }

    fn persist(&self) -> Result<()> {
        if let Some(dir) = self.path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        self.backend
            .save(&self.path)
            .with_context(|| format!("saving state to {}", self.path.display()))
    }
}

fn service_ctl(state: &Path) -> Result<KindCtl<Service, ServiceRecord>> {
    KindCtl::open(
        state,
        "services.json",
        Arc::new(ServiceConverter),
        Arc::new(ServiceValidator),
        Arc::new(ServiceTabulator),
    )
}

fn group_ctl(state: &Path) -> Result<KindCtl<AddressGroup, AddressGroupRecord>> {
    KindCtl::open(
        state,
        "addressgroups.json",
        Arc::new(AddressGroupConverter),
        Arc::new(AddressGroupValidator),
        Arc::new(AddressGroupTabulator),
    )
}

fn rule_ctl(state: &Path) -> Result<KindCtl<PolicyRule, PolicyRuleRecord>> {
    KindCtl::open(
        state,
        "policyrules.json",
        Arc::new(PolicyRuleConverter),
        Arc::new(PolicyRuleValidator),
        Arc::new(PolicyRuleTabulator),
    )
}

#[derive(Copy, Clone, Debug)]
enum KindKey {
    Service,
    AddressGroup,
    PolicyRule,
}

impl KindKey {
    fn parse(kind: &str) -> Result<Self> {
        match kind.to_ascii_lowercase().as_str() {
            "service" | "services" | "svc" => Ok(Self::Service),
            "addressgroup" | "addressgroups" | "ag" => Ok(Self::AddressGroup),
            "policyrule" | "policyrules" | "rule" | "rules" => Ok(Self::PolicyRule),
            other => bail!("unknown kind {other:?}; expected service, addressgroup or policyrule"),
        }
    }
}

macro_rules! with_kind_ctl {
    ($kind:expr, $state:expr, $ctl:ident, $body:expr) => {
        match KindKey::parse($kind)? {
            KindKey::Service => {
                let $ctl = service_ctl($state)?;
                $body
            }
            KindKey::AddressGroup => {
                let $ctl = group_ctl($state)?;
                $body
            }
            KindKey::PolicyRule => {
                let $ctl = rule_ctl($state)?;
                $body
            }
        }
    };
}

fn scope_for<K: ResourceObject>(ns: Option<&str>) -> ListScope {
    match ns {
        Some(n) if K::NAMESPACED => ListScope::in_namespace(n),
        _ => ListScope::all(),
    }
}

fn print_table(table: &Table) {
    let mut widths: Vec<usize> = table.columns.iter().map(|c| c.label.len()).collect();
    for row in &table.rows {
        for (i, cell) in row.iter().enumerate() {
            widths[i] = widths[i].max(cell.len());
        }
    }
    let header: Vec<String> = table
        .columns
        .iter()
        .zip(&widths)
        .map(|(c, w)| format!("{:<w$}", c.label.to_uppercase(), w = w))
        .collect();
    println!("{}", header.join("  "));
    for row in &table.rows {
        let line: Vec<String> =
            row.iter().zip(&widths).map(|(cell, w)| format!("{:<w$}", cell, w = w)).collect();
        println!("{}", line.join("  "));
    }
}

fn print_one<K: ResourceObject>(obj: &K, output: Output) -> Result<()> {
    match output {
        Output::Human => print!("{}", serde_yaml::to_string(obj)?),
        Output::Json => println!("{}", serde_json::to_string_pretty(obj)?),
    }
    Ok(())
}

fn print_event<K: ResourceObject>(ev: &WatchEvent<K>, output: Output) -> Result<()> {
    if output == Output::Json {
        println!("{}", serde_json::to_string(ev)?);
        return Ok(());
    }
    match ev {
        WatchEvent::Added(o) => println!("+ {} rv={}", o.id(), o.resource_version().unwrap_or("-")),
        WatchEvent::Modified(o) => {
            println!("~ {} rv={}", o.id(), o.resource_version().unwrap_or("-"))
        }
        WatchEvent::Deleted(o) => println!("- {}", o.id()),
        WatchEvent::Bookmark { resource_version } => println!("bookmark rv={resource_version}"),
        WatchEvent::Error(err) => eprintln!("watch error: {err}"),
    }
    Ok(())
}

async fn run_ls<K: ResourceObject, D: DomainRecord>(
    ctl: &KindCtl<K, D>,
    ns: Option<&str>,
    output: Output,
) -> Result<()> {
    let list = ctl.storage.list(&scope_for::<K>(ns)).await?;
    match output {
        Output::Human => print_table(&ctl.storage.table(&list.items)),
        Output::Json => println!("{}", serde_json::to_string_pretty(&list)?),
    }
    Ok(())
}

async fn run_get<K: ResourceObject, D: DomainRecord>(
    ctl: &KindCtl<K, D>,
    ns: Option<&str>,
    name: &str,
    output: Output,
) -> Result<()> {
    let obj = ctl.storage.get(ns, name).await?;
    print_one(&obj, output)
}

async fn run_create<K: ResourceObject, D: DomainRecord>(
    ctl: &KindCtl<K, D>,
    doc: serde_yaml::Value,
    ctx: ApplyContext,
) -> Result<()> {
    let obj: K = serde_yaml::from_value(doc).context("manifest does not match the kind's schema")?;
    let created = ctl.storage.create(&obj, &ctx).await?;
    if ctx.dry_run_requested() {
        println!("{}/{} created (dry run)", K::KIND, created.id());
    } else {
        ctl.persist()?;
        println!("{}/{} created", K::KIND, created.id());
    }
    Ok(())
}

async fn run_delete<K: ResourceObject, D: DomainRecord>(
    ctl: &KindCtl<K, D>,
    ns: Option<&str>,
    name: &str,
) -> Result<()> {
    let (gone, _) = ctl.storage.delete(ns, name, &ApplyContext::new("palisadectl")).await?;
    ctl.persist()?;
    println!("{}/{} deleted", K::KIND, gone.id());
    Ok(())
}

async fn run_patch<K: ResourceObject, D: DomainRecord>(
    ctl: &KindCtl<K, D>,
    ns: Option<&str>,
    name: &str,
    patch_type: &str,
    patch: &str,
    output: Output,
) -> Result<()> {
    let mut ctx = ApplyContext::new("palisadectl");
    ctx.raw = patch.as_bytes().to_vec();
    let stored = ctl.storage.patch(ns, name, patch_type, patch.as_bytes(), &ctx).await?;
    ctl.persist()?;
    print_one(&stored, output)
}

async fn run_status_patch<K: ResourceObject, D: DomainRecord>(
    ctl: &KindCtl<K, D>,
    ns: Option<&str>,
    name: &str,
    patch: &str,
    output: Output,
) -> Result<()> {
    let status = StatusStorage::new(Arc::clone(&ctl.storage));
    let mut ctx = ApplyContext::new("palisadectl");
    ctx.raw = patch.as_bytes().to_vec();
    let stored = status
        .patch(ns, name, palisade_patch::MERGE_PATCH_TYPE, patch.as_bytes(), &ctx)
        .await?;
    ctl.persist()?;
    print_one(&stored, output)
}

async fn run_watch<K: ResourceObject, D: DomainRecord>(
    ctl: &KindCtl<K, D>,
    ns: Option<&str>,
    output: Output,
) -> Result<()> {
    let mut handle = ctl.storage.watch(scope_for::<K>(ns))?;
    info!(kind = K::KIND, "watching; ctrl-c to stop");
    loop {
        tokio::select! {
            ev = handle.recv() => match ev {
                Some(ev) => print_event(&ev, output)?,
                None => break,
            },
            _ = tokio::signal::ctrl_c() => break,
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    init_metrics();
    let cli = Cli::parse();
    let ns = cli.namespace.as_deref();
    let state = cli.state.as_path();

    match &cli.command {
        Commands::Ls { kind } => {
            with_kind_ctl!(kind, state, ctl, run_ls(&ctl, ns, cli.output).await?)
        }
        Commands::Get { kind, name } => {
            with_kind_ctl!(kind, state, ctl, run_get(&ctl, ns, name, cli.output).await?)
        }
        Commands::Create { file, dry_run } => {
            let raw = std::fs::read_to_string(file)
                .with_context(|| format!("reading {}", file.display()))?;
            let doc: serde_yaml::Value = serde_yaml::from_str(&raw).context("parsing manifest")?;
            let kind = doc
                .get("kind")
                .and_then(|k| k.as_str())
                .context("manifest has no \"kind\" field")?
                .to_string();
            let mut ctx = ApplyContext::new("palisadectl");
            ctx.raw = raw.into_bytes();
            if *dry_run {
                ctx = ctx.dry_run_all();
            }
            with_kind_ctl!(&kind, state, ctl, run_create(&ctl, doc.clone(), ctx.clone()).await?)
        }
        Commands::Delete { kind, name } => {
            with_kind_ctl!(kind, state, ctl, run_delete(&ctl, ns, name).await?)
        }
        Commands::Patch { kind, name, patch, patch_type } => {
            with_kind_ctl!(
                kind,
                state,
                ctl,
                run_patch(&ctl, ns, name, patch_type, patch, cli.output).await?
            )
        }
        Commands::StatusPatch { kind, name, patch } => {
            with_kind_ctl!(
                kind,
                state,
                ctl,
                run_status_patch(&ctl, ns, name, patch, cli.output).await?
            )
        }
        Commands::Watch { kind } => {
            with_kind_ctl!(kind, state, ctl, run_watch(&ctl, ns, cli.output).await?)
        }
    }
    Ok(())
}
