//! dynaproto - Describe, template and call protobuf services at runtime
//!
//! Loads `.proto` sources without code generation, then lists services,
//! describes messages, prints default request templates, or performs
//! grpc-web calls with JSON requests.

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use dynaproto_core::{CallOptions, Client, ClientConfig, Schema, SchemaLoader, SourceUnit};
use serde_json::Value;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, trace, warn, Level};
use tracing_subscriber::EnvFilter;
use walkdir::WalkDir;

/// Describe, template and call protobuf services from .proto sources
#[derive(Parser, Debug)]
#[command(name = "dynaproto")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    #[command(flatten)]
    sources: SourceArgs,

    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Fail instead of warning when a source does not load cleanly
    #[arg(long, global = true)]
    strict: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args, Debug)]
struct SourceArgs {
    /// Individual .proto files to load
    #[arg(short = 'p', long = "proto", global = true)]
    protos: Vec<PathBuf>,

    /// Directories searched recursively for .proto files
    #[arg(
        short = 'I',
        long = "proto-path",
        global = true,
        env = "DYNAPROTO_PROTO_PATH",
        value_delimiter = ','
    )]
    include: Vec<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List services and their methods
    List {
        /// Print JSON instead of text
        #[arg(long)]
        json: bool,

        /// Also list messages, including the well-known types
        #[arg(long)]
        messages: bool,
    },
    /// Show the fields of a message
    Describe {
        /// Fully-qualified message name
        message: String,
    },
    /// Print a fully populated default value of a message
    Template {
        /// Fully-qualified message name
        message: String,
    },
    /// Call a method over grpc-web
    Call(CallArgs),
}

#[derive(Args, Debug)]
struct CallArgs {
    /// Method as /pkg.Service/Method, pkg.Service/Method or pkg.Service.Method
    method: String,

    /// Base URL of the grpc-web endpoint
    #[arg(short, long, env = "DYNAPROTO_URL")]
    url: String,

    /// Request as JSON, or @path to read it from a file (default: template)
    #[arg(short, long)]
    data: Option<String>,

    /// Extra request header, name:value (repeatable)
    #[arg(short = 'H', long = "header", value_parser = parse_header)]
    headers: Vec<(String, String)>,

    /// Deadline in seconds
    #[arg(short, long)]
    timeout: Option<f64>,
}

/// Tracks loaded sources so the same unit is only parsed once
#[derive(Default)]
struct SourceSet {
    /// Maps unit name -> content hash
    seen: HashMap<String, String>,
    units: Vec<SourceUnit>,
    stats: SourceStats,
}

#[derive(Default)]
struct SourceStats {
    total_found: usize,
    duplicates_skipped: usize,
    conflicts_skipped: usize,
}

impl SourceSet {
    fn new() -> Self {
        Self::default()
    }

    /// Compute a short hash of the content (first 8 chars of blake3)
    fn content_hash(content: &str) -> String {
        let hash = blake3::hash(content.as_bytes());
        hash.to_hex()[..8].to_string()
    }

    /// Adds a unit unless one with the same name was already added.
    /// Returns true if the unit was kept.
    fn add(&mut self, name: String, content: String) -> bool {
        self.stats.total_found += 1;
        let hash = Self::content_hash(&content);

        match self.seen.get(&name) {
            Some(existing) if *existing == hash => {
                debug!("Skipping duplicate: {} (hash: {})", name, hash);
                self.stats.duplicates_skipped += 1;
                false
            }
            Some(existing) => {
                warn!(
                    "Skipping {}: content differs from the first copy ({} vs {})",
                    name, hash, existing
                );
                self.stats.conflicts_skipped += 1;
                false
            }
            None => {
                trace!("Adding {} (hash: {})", name, hash);
                self.seen.insert(name.clone(), hash);
                self.units.push(SourceUnit::new(name, content));
                true
            }
        }
    }

    fn print_summary(&self) {
        info!(
            "Sources: {} found, {} duplicates skipped, {} conflicts skipped",
            self.stats.total_found, self.stats.duplicates_skipped, self.stats.conflicts_skipped
        );
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    let level = match cli.verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(level.into()))
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let sources = collect_sources(&cli.sources)?;
    let schema = load_schema(&sources, cli.strict)?;

    match cli.command {
        Command::List { json, messages } => list(&schema, json, messages),
        Command::Describe { message } => describe(&schema, &message),
        Command::Template { message } => template(&schema, &message),
        Command::Call(args) => call(&schema, &args).await,
    }
}

/// Gathers every source named on the command line
fn collect_sources(args: &SourceArgs) -> Result<SourceSet> {
    let mut set = SourceSet::new();

    for file in &args.protos {
        if !file.is_file() {
            bail!("Proto file does not exist: {}", file.display());
        }
        let name = unit_name(file, &args.include);
        let content = fs::read_to_string(file)
            .with_context(|| format!("Failed to read proto file: {}", file.display()))?;
        set.add(name, content);
    }

    for directory in &args.include {
        if !directory.is_dir() {
            bail!("Proto path is not a directory: {}", directory.display());
        }
        scan_directory(directory, &mut set)?;
    }

    if set.units.is_empty() {
        warn!("No .proto sources given; only the well-known types are available");
    }
    set.print_summary();
    Ok(set)
}

/// Adds every .proto below `directory`, named relative to it
fn scan_directory(directory: &Path, set: &mut SourceSet) -> Result<()> {
    info!("Scanning directory: {}", directory.display());

    for entry in WalkDir::new(directory)
        .follow_links(true)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|e| e.ok())
    {
        let path = entry.path();
        if !path.is_file() || !is_proto(path) {
            continue;
        }

        let name = relative_name(path, directory).unwrap_or_else(|| slash_path(path));
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read proto file: {}", path.display()))?;
        set.add(name, content);
    }
    Ok(())
}

fn is_proto(path: &Path) -> bool {
    path.extension().and_then(|e| e.to_str()) == Some("proto")
}

/// Names a file relative to the first include directory containing it,
/// so that imports written against the include path match.
fn unit_name(file: &Path, include: &[PathBuf]) -> String {
    include
        .iter()
        .find_map(|dir| relative_name(file, dir))
        .unwrap_or_else(|| {
            file.file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| slash_path(file))
        })
}

fn relative_name(path: &Path, base: &Path) -> Option<String> {
    path.strip_prefix(base).ok().map(slash_path)
}

fn slash_path(path: &Path) -> String {
    path.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

fn load_schema(sources: &SourceSet, strict: bool) -> Result<Schema> {
    let mut loader = SchemaLoader::new().context("Failed to seed the well-known types")?;
    let accepted = loader.add_all(&sources.units);
    debug!("{} of {} units accepted", accepted, sources.units.len());

    let report = loader.finish();
    if strict {
        return report
            .into_result()
            .context("Sources did not load cleanly");
    }
    for err in &report.errors {
        warn!("{}", err);
    }
    Ok(report.schema)
}

fn list(schema: &Schema, json: bool, messages: bool) -> Result<()> {
    let services = schema.services();
    let names = if messages {
        message_names(schema)
    } else {
        Vec::new()
    };

    if json {
        let listing = if messages {
            serde_json::json!({ "services": services, "messages": names })
        } else {
            serde_json::to_value(&services)?
        };
        println!("{}", serde_json::to_string_pretty(&listing)?);
        return Ok(());
    }

    for service in &services {
        println!("{} ({})", service.full_name, service.origin);
        for method in &service.methods {
            let input = if method.client_streaming {
                format!("stream {}", method.input)
            } else {
                method.input.clone()
            };
            let output = if method.server_streaming {
                format!("stream {}", method.output)
            } else {
                method.output.clone()
            };
            let marker = if method.resolved { "" } else { "  [unresolved]" };
            println!("  {}({}) returns ({}){}", method.name, input, output, marker);
        }
    }
    for name in &names {
        println!("{}", name);
    }
    Ok(())
}

fn message_names(schema: &Schema) -> Vec<&str> {
    let mut names: Vec<&str> = schema
        .registry()
        .messages()
        .into_iter()
        .map(|m| m.full_name.as_str())
        .collect();
    names.sort_unstable();
    names
}

fn describe(schema: &Schema, message: &str) -> Result<()> {
    let fields = schema.fields(message)?;
    println!("{}", serde_json::to_string_pretty(&fields)?);
    Ok(())
}

fn template(schema: &Schema, message: &str) -> Result<()> {
    let value = schema.default_value(message)?;
    println!("{}", serde_json::to_string_pretty(&value)?);
    Ok(())
}

async fn call(schema: &Schema, args: &CallArgs) -> Result<()> {
    let method = schema.method(&args.method)?;
    if method.client_streaming {
        bail!("{} is client-streaming, which grpc-web cannot carry", method.path);
    }

    let request = match &args.data {
        Some(data) => read_request(data)?,
        None => schema.default_value(&method.input)?,
    };

    let mut options = CallOptions::default();
    for (name, value) in &args.headers {
        options = options.header(name.as_str(), value.as_str());
    }
    if let Some(secs) = args.timeout {
        options = options.timeout(parse_timeout(secs)?);
    }

    let client = Client::new(ClientConfig::new(args.url.as_str()))?;
    info!("Calling {} at {}", method.path, args.url);

    if method.server_streaming {
        let responses = client
            .server_streaming(schema, &method.path, &request, &options)
            .await?;
        for response in responses {
            println!("{}", serde_json::to_string_pretty(&response)?);
        }
    } else {
        let response = client.unary(schema, &method.path, &request, &options).await?;
        println!("{}", serde_json::to_string_pretty(&response)?);
    }
    Ok(())
}

/// Parses `--data`: inline JSON, or `@path` for a file
fn parse_timeout(secs: f64) -> Result<Duration> {
    if secs <= 0.0 {
        bail!("Timeout must be a positive number of seconds: {}", secs);
    }
    match Duration::try_from_secs_f64(secs) {
        Ok(timeout) => Ok(timeout),
        Err(_) => bail!("Timeout must be a positive number of seconds: {}", secs),
    }
}

fn read_request(data: &str) -> Result<Value> {
    let (text, origin) = match data.strip_prefix('@') {
        Some(path) => (
            fs::read_to_string(path)
                .with_context(|| format!("Failed to read request file: {}", path))?,
            path,
        ),
        None => (data.to_string(), "--data"),
    };
    serde_json::from_str(&text).with_context(|| format!("Invalid JSON in {}", origin))
}

fn parse_header(raw: &str) -> std::result::Result<(String, String), String> {
    let (name, value) = raw
        .split_once(':')
        .ok_or_else(|| format!("expected name:value, got {:?}", raw))?;
    let name = name.trim();
    if name.is_empty() {
        return Err(format!("empty header name in {:?}", raw));
    }
    Ok((name.to_string(), value.trim().to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const GREETER: &str = r#"
        syntax = "proto3";
        package demo;
        import "demo/common.proto";
        message HelloRequest { string name = 1; Locale locale = 2; }
        message HelloReply { string message = 1; }
        service Greeter {
          rpc SayHello (HelloRequest) returns (HelloReply);
          rpc Follow (HelloRequest) returns (stream HelloReply);
        }
    "#;

    const COMMON: &str = r#"
        syntax = "proto3";
        package demo;
        enum Locale { LOCALE_UNSPECIFIED = 0; LOCALE_EN = 1; }
    "#;

    fn write(dir: &Path, name: &str, content: &str) -> PathBuf {
        let path = dir.join(name);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn test_source_set_deduplication() {
        let mut set = SourceSet::new();
        assert!(set.add("a.proto".into(), "syntax = \"proto3\";".into()));
        assert!(!set.add("a.proto".into(), "syntax = \"proto3\";".into()));
        assert!(!set.add("a.proto".into(), "syntax = \"proto2\";".into()));
        assert!(set.add("b.proto".into(), "syntax = \"proto3\";".into()));

        assert_eq!(set.units.len(), 2);
        assert_eq!(set.stats.total_found, 4);
        assert_eq!(set.stats.duplicates_skipped, 1);
        assert_eq!(set.stats.conflicts_skipped, 1);
    }

    #[test]
    fn test_content_hash() {
        let hash1 = SourceSet::content_hash("hello");
        let hash2 = SourceSet::content_hash("hello");
        let hash3 = SourceSet::content_hash("world");

        assert_eq!(hash1, hash2);
        assert_ne!(hash1, hash3);
        assert_eq!(hash1.len(), 8);
    }

    #[test]
    fn test_directory_scan_names_units_relative_to_root() {
        let temp_dir = TempDir::new().unwrap();
        write(temp_dir.path(), "demo/greeter.proto", GREETER);
        write(temp_dir.path(), "demo/common.proto", COMMON);
        write(temp_dir.path(), "README.md", "not a proto");

        let args = SourceArgs {
            protos: vec![],
            include: vec![temp_dir.path().to_path_buf()],
        };
        let set = collect_sources(&args).unwrap();
        let mut names: Vec<_> = set.units.iter().map(|u| u.name.clone()).collect();
        names.sort();
        assert_eq!(names, vec!["demo/common.proto", "demo/greeter.proto"]);

        let schema = load_schema(&set, true).unwrap();
        let method = schema.method("demo.Greeter/SayHello").unwrap();
        assert_eq!(method.input, "demo.HelloRequest");
        assert_eq!(
            schema.default_value("demo.HelloRequest").unwrap(),
            serde_json::json!({"name": "", "locale": 0})
        );
    }

    #[test]
    fn test_explicit_file_inside_include_is_not_loaded_twice() {
        let temp_dir = TempDir::new().unwrap();
        let greeter = write(temp_dir.path(), "demo/greeter.proto", GREETER);
        write(temp_dir.path(), "demo/common.proto", COMMON);

        let args = SourceArgs {
            protos: vec![greeter],
            include: vec![temp_dir.path().to_path_buf()],
        };
        let set = collect_sources(&args).unwrap();
        assert_eq!(set.units.len(), 2);
        assert_eq!(set.units[0].name, "demo/greeter.proto");
        assert_eq!(set.stats.duplicates_skipped, 1);
    }

    #[test]
    fn test_missing_sources_are_errors() {
        let temp_dir = TempDir::new().unwrap();
        let args = SourceArgs {
            protos: vec![temp_dir.path().join("nope.proto")],
            include: vec![],
        };
        assert!(collect_sources(&args).is_err());

        let args = SourceArgs {
            protos: vec![],
            include: vec![temp_dir.path().join("nowhere")],
        };
        assert!(collect_sources(&args).is_err());
    }

    #[test]
    fn test_strict_load_fails_on_unresolved_import() {
        let mut set = SourceSet::new();
        set.add("demo/greeter.proto".into(), GREETER.into());
        assert!(load_schema(&set, true).is_err());

        let schema = load_schema(&set, false).unwrap();
        assert!(schema.message("demo.HelloReply").is_ok());
    }

    #[test]
    fn test_read_request() {
        assert_eq!(
            read_request(r#"{"name":"Ada"}"#).unwrap(),
            serde_json::json!({"name": "Ada"})
        );
        assert!(read_request("{").is_err());

        let temp_dir = TempDir::new().unwrap();
        let path = write(temp_dir.path(), "req.json", r#"{"name":"Grace"}"#);
        let arg = format!("@{}", path.display());
        assert_eq!(
            read_request(&arg).unwrap(),
            serde_json::json!({"name": "Grace"})
        );
    }

    #[test]
    fn test_message_names_include_well_known_types() {
        let mut set = SourceSet::new();
        set.add("demo/common.proto".into(), COMMON.into());
        set.add("demo/greeter.proto".into(), GREETER.into());
        let schema = load_schema(&set, true).unwrap();

        let names = message_names(&schema);
        assert!(names.contains(&"demo.HelloRequest"));
        assert!(names.contains(&"google.protobuf.Timestamp"));
        assert!(!names.contains(&"demo.Locale"));
        assert!(names.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn test_parse_timeout() {
        assert_eq!(parse_timeout(1.5).unwrap(), Duration::from_millis(1500));
        assert!(parse_timeout(0.0).is_err());
        assert!(parse_timeout(-2.0).is_err());
        assert!(parse_timeout(f64::NAN).is_err());
        assert!(parse_timeout(f64::INFINITY).is_err());
        assert!(parse_timeout(1e30).is_err());
    }

    #[test]
    fn test_parse_header() {
        assert_eq!(
            parse_header("authorization: Bearer abc").unwrap(),
            ("authorization".to_string(), "Bearer abc".to_string())
        );
        assert_eq!(
            parse_header("x-trace:a:b").unwrap(),
            ("x-trace".to_string(), "a:b".to_string())
        );
        assert!(parse_header("no-colon").is_err());
        assert!(parse_header(": value").is_err());
    }

    #[test]
    fn verify_cli() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }
}
