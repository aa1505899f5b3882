//! KI Resource Loader - command line entry point
//!
//! Loads a single URL through the loader, either asynchronously (pumping the
//! owner loop until the peer reports completion) or with `--sync`, and
//! writes the body to stdout or a file.

use anyhow::{anyhow, bail, Context, Result};
use clap::{Arg, ArgAction, Command};
use http::Method;
use parking_lot::Mutex;
use std::fs::File;
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use url::Url;

use ki_resource_loader::{
    config::{CliArgs, LoaderSettings},
    loader::{LoaderContext, RedirectDecision, ResourceLoaderBridge, ResourcePeer},
    net::{RequestParams, RequestStatus, ResponseInfo, UploadBody},
    runtime::OwnerLoop,
    scheme::DirectorySchemeHandlerFactory,
    NAME, VERSION,
};

/// Build the CLI command parser
fn build_cli() -> Command {
    Command::new(NAME)
        .version(VERSION)
        .author("KI-Browser Team")
        .about("Load a URL through the KI resource loader")
        .long_about(
            "Loads a URL the way an embedded browser would:\n\
             - redirects are reported and followed\n\
             - cookies are attached and stored in memory\n\
             - directories can be served through custom schemes\n\
             - synchronous mode denies cross-origin redirects",
        )
        .arg(
            Arg::new("url")
                .value_name("URL")
                .help("URL to load")
                .required_unless_present("dump-config"),
        )
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("Path to configuration file (TOML or JSON)")
                .value_parser(clap::value_parser!(PathBuf)),
        )
        .arg(
            Arg::new("sync")
                .long("sync")
                .help("Load synchronously, blocking until complete")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("method")
                .short('X')
                .long("method")
                .value_name("METHOD")
                .help("Request method (default: GET, or POST with --data)"),
        )
        .arg(
            Arg::new("header")
                .short('H')
                .long("header")
                .value_name("NAME: VALUE")
                .help("Extra request header (repeatable)")
                .action(ArgAction::Append),
        )
        .arg(
            Arg::new("data")
                .short('d')
                .long("data")
                .value_name("DATA")
                .help("Request body; @FILE uploads a file"),
        )
        .arg(
            Arg::new("scheme")
                .long("scheme")
                .value_name("NAME=DIR")
                .help("Serve DIR through the custom scheme NAME (repeatable)")
                .action(ArgAction::Append),
        )
        .arg(
            Arg::new("output")
                .short('o')
                .long("output")
                .value_name("FILE")
                .help("Write the body to FILE instead of stdout")
                .value_parser(clap::value_parser!(PathBuf)),
        )
        .arg(
            Arg::new("buffer-size")
                .long("buffer-size")
                .value_name("BYTES")
                .help("Read buffer size (default: 999999)")
                .value_parser(clap::value_parser!(usize)),
        )
        .arg(
            Arg::new("max-redirects")
                .long("max-redirects")
                .value_name("COUNT")
                .help("Maximum number of redirects to follow")
                .value_parser(clap::value_parser!(u32)),
        )
        .arg(
            Arg::new("timeout")
                .long("timeout")
                .value_name("MS")
                .help("Synchronous load timeout in milliseconds")
                .value_parser(clap::value_parser!(u64)),
        )
        .arg(
            Arg::new("user-agent")
                .long("user-agent")
                .value_name("STRING")
                .help("Custom user agent string"),
        )
        .arg(
            Arg::new("no-cookies")
                .long("no-cookies")
                .help("Neither send nor store cookies")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("download-dir")
                .long("download-dir")
                .value_name("PATH")
                .help("Directory for download-to-file temp files")
                .value_parser(clap::value_parser!(PathBuf)),
        )
        .arg(
            Arg::new("proxy")
                .long("proxy")
                .value_name("HOST:PORT")
                .help("Proxy server address (e.g., localhost:8080)"),
        )
        .arg(
            Arg::new("proxy-type")
                .long("proxy-type")
                .value_name("TYPE")
                .help("Proxy type: http, https, or socks5")
                .value_parser(["http", "https", "socks5"]),
        )
        .arg(
            Arg::new("proxy-bypass")
                .long("proxy-bypass")
                .value_name("HOSTS")
                .help("Comma-separated hosts loaded without the proxy")
                .value_delimiter(','),
        )
        .arg(
            Arg::new("dump-config")
                .long("dump-config")
                .value_name("FILE")
                .help("Write the effective configuration to FILE (.toml or .json) and exit")
                .value_parser(clap::value_parser!(PathBuf)),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .help("Enable verbose logging")
                .action(ArgAction::Count),
        )
        .arg(
            Arg::new("quiet")
                .short('q')
                .long("quiet")
                .help("Suppress output except errors")
                .action(ArgAction::SetTrue)
                .conflicts_with("verbose"),
        )
}

/// Parse CLI arguments into CliArgs struct
fn parse_cli_args(matches: &clap::ArgMatches) -> CliArgs {
    let mut args = CliArgs::default();

    args.config_file = matches.get_one::<PathBuf>("config").cloned();
    args.read_buffer_size = matches.get_one::<usize>("buffer-size").copied();
    args.max_redirects = matches.get_one::<u32>("max-redirects").copied();
    args.sync_load_timeout_ms = matches.get_one::<u64>("timeout").copied();
    args.user_agent = matches.get_one::<String>("user-agent").cloned();
    args.download_dir = matches.get_one::<PathBuf>("download-dir").cloned();

    if matches.get_flag("no-cookies") {
        args.cookies_enabled = Some(false);
    }

    // Parse proxy settings
    if let Some(proxy) = matches.get_one::<String>("proxy") {
        let parts: Vec<&str> = proxy.rsplitn(2, ':').collect();
        if parts.len() == 2 {
            if let Ok(port) = parts[0].parse::<u16>() {
                args.proxy_host = Some(parts[1].to_string());
                args.proxy_port = Some(port);
            }
        } else {
            args.proxy_host = Some(proxy.clone());
        }
    }

    args.proxy_type = matches.get_one::<String>("proxy-type").cloned();
    args.proxy_bypass = matches
        .get_many::<String>("proxy-bypass")
        .map(|hosts| hosts.cloned().collect())
        .unwrap_or_default();

    args
}

/// Initialize the tracing/logging subsystem. Logs go to stderr so the body
/// can be piped.
fn init_tracing(verbosity: u8, quiet: bool) {
    let level = if quiet {
        Level::ERROR
    } else {
        match verbosity {
            0 => Level::INFO,
            1 => Level::DEBUG,
            _ => Level::TRACE,
        }
    };

    let mut filter = EnvFilter::from_default_env().add_directive(level.into());
    for directive in ["hyper=warn", "hyper_util=warn", "reqwest=info"] {
        if let Ok(directive) = directive.parse() {
            filter = filter.add_directive(directive);
        }
    }

    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_target(true)
                .with_thread_ids(false)
                .with_writer(io::stderr),
        )
        .with(filter)
        .init();
}

/// Parses `NAME=DIR`.
fn parse_scheme_mapping(mapping: &str) -> Result<(String, PathBuf)> {
    let (name, dir) = mapping
        .split_once('=')
        .ok_or_else(|| anyhow!("scheme mapping '{}' is not NAME=DIR", mapping))?;
    if name.is_empty() || dir.is_empty() {
        bail!("scheme mapping '{}' is not NAME=DIR", mapping);
    }
    Ok((name.to_string(), PathBuf::from(dir)))
}

/// Builds the request from the URL, method, headers and body arguments.
fn build_request(matches: &clap::ArgMatches) -> Result<RequestParams> {
    let url = matches
        .get_one::<String>("url")
        .ok_or_else(|| anyhow!("missing URL"))?;
    let url = Url::parse(url).with_context(|| format!("Invalid URL '{}'", url))?;
    let mut params = RequestParams::new(url);

    if let Some(data) = matches.get_one::<String>("data") {
        let upload = match data.strip_prefix('@') {
            Some(path) => {
                let mut body = UploadBody::new();
                body.push_file(path);
                body
            }
            None => UploadBody::from_bytes(data.clone().into_bytes()),
        };
        params = params.with_method(Method::POST).with_upload(upload);
    }

    if let Some(method) = matches.get_one::<String>("method") {
        let method = Method::from_bytes(method.to_ascii_uppercase().as_bytes())
            .with_context(|| format!("Invalid method '{}'", method))?;
        params = params.with_method(method);
    }

    if let Some(headers) = matches.get_many::<String>("header") {
        for header in headers {
            let (name, value) = header
                .split_once(':')
                .ok_or_else(|| anyhow!("header '{}' is not NAME: VALUE", header))?;
            params
                .request
                .set_header_str(name.trim(), value.trim())
                .with_context(|| format!("Invalid header '{}'", header))?;
        }
    }

    Ok(params)
}

/// Opens the body sink.
fn open_output(path: Option<&PathBuf>) -> Result<Box<dyn Write + Send>> {
    match path {
        Some(path) => {
            let file = File::create(path)
                .with_context(|| format!("Failed to create output file {}", path.display()))?;
            Ok(Box::new(io::BufWriter::new(file)))
        }
        None => Ok(Box::new(io::stdout())),
    }
}

/// Peer that streams the body into the output and records the result.
struct CliPeer {
    output: Box<dyn Write + Send>,
    received: u64,
    status: Arc<Mutex<Option<RequestStatus>>>,
}

impl ResourcePeer for CliPeer {
    fn on_upload_progress(&mut self, position: u64, size: u64) {
        debug!("Uploaded {}/{} bytes", position, size);
    }

    fn on_received_redirect(&mut self, new_url: &Url, info: &ResponseInfo) -> RedirectDecision {
        info!("{} {} -> {}", info.status.as_u16(), info.status_text, new_url);
        RedirectDecision::Follow
    }

    fn on_received_response(&mut self, info: &ResponseInfo) {
        info!(
            "{} {} ({}{})",
            info.status.as_u16(),
            info.status_text,
            info.mime_type,
            info.content_length
                .map(|len| format!(", {} bytes", len))
                .unwrap_or_default()
        );
    }

    fn on_received_data(&mut self, data: &[u8]) {
        self.received += data.len() as u64;
        if let Err(e) = self.output.write_all(data) {
            error!("Failed to write body: {}", e);
        }
    }

    fn on_completed_request(&mut self, status: &RequestStatus) {
        if let Err(e) = self.output.flush() {
            warn!("Failed to flush output: {}", e);
        }
        info!("Completed: {} ({} bytes)", status, self.received);
        *self.status.lock() = Some(status.clone());
    }
}

/// Writes the effective settings if `--dump-config` was given. Returns true
/// when there is nothing left to do.
fn dump_config(matches: &clap::ArgMatches, settings: &LoaderSettings) -> Result<bool> {
    let Some(path) = matches.get_one::<PathBuf>("dump-config") else {
        return Ok(false);
    };
    settings
        .to_file(path)
        .with_context(|| format!("Failed to write configuration to {}", path.display()))?;
    info!("Configuration written to {}", path.display());
    Ok(true)
}

/// Maps the final status to a process exit code.
fn exit_code(status: &RequestStatus) -> i32 {
    match status {
        RequestStatus::Success => 0,
        RequestStatus::Canceled => 2,
        RequestStatus::Failed(_) => 1,
    }
}

fn register_schemes(context: &LoaderContext, matches: &clap::ArgMatches) -> Result<()> {
    let Some(mappings) = matches.get_many::<String>("scheme") else {
        return Ok(());
    };
    let registry = context.scheme_registry();
    for mapping in mappings {
        let (name, dir) = parse_scheme_mapping(mapping)?;
        if !dir.is_dir() {
            bail!("scheme directory {} does not exist", dir.display());
        }
        registry
            .register_scheme(&name, true, true, false)
            .with_context(|| format!("Failed to register scheme '{}'", name))?;
        registry
            .add_factory(&name, "", Some(Arc::new(DirectorySchemeHandlerFactory::new(&dir))))
            .with_context(|| format!("Failed to add factory for scheme '{}'", name))?;
        info!("Serving {} as {}://", dir.display(), name);
    }
    Ok(())
}

fn run(matches: &clap::ArgMatches, settings: LoaderSettings) -> Result<i32> {
    let context = Arc::new(
        LoaderContext::builder(settings)
            .build()
            .context("Failed to start loader")?,
    );
    register_schemes(&context, matches)?;

    let params = build_request(matches)?;
    let output_path = matches.get_one::<PathBuf>("output");
    let mut owner = OwnerLoop::new().context("Failed to create owner loop")?;
    let mut bridge = ResourceLoaderBridge::new(context, params, owner.runner());

    if matches.get_flag("sync") {
        let response = bridge.sync_load().context("Synchronous load failed")?;
        info!(
            "{} {} from {} ({} bytes)",
            response.info.status.as_u16(),
            response.info.status_text,
            response.url,
            response.data.len()
        );
        let mut output = open_output(output_path)?;
        output.write_all(&response.data).context("Failed to write body")?;
        output.flush().context("Failed to flush output")?;
        info!("Completed: {}", response.status);
        return Ok(exit_code(&response.status));
    }

    let status = Arc::new(Mutex::new(None));
    bridge
        .start(Box::new(CliPeer {
            output: open_output(output_path)?,
            received: 0,
            status: status.clone(),
        }))
        .context("Failed to start request")?;

    while !owner.run_until(|| status.lock().is_some(), Duration::from_secs(60)) {
        debug!("Still loading...");
    }

    let status = status
        .lock()
        .take()
        .ok_or_else(|| anyhow!("load ended without a status"))?;
    Ok(exit_code(&status))
}

/// Main application entry point
fn main() -> Result<()> {
    // Parse CLI arguments
    let matches = build_cli().get_matches();

    // Get verbosity settings before loading config
    let verbosity = matches.get_count("verbose");
    let quiet = matches.get_flag("quiet");

    // Initialize logging
    init_tracing(verbosity, quiet);

    // Convert matches to CliArgs
    let cli_args = parse_cli_args(&matches);

    // Load configuration with full precedence chain
    let settings = cli_args
        .load_settings()
        .context("Failed to load configuration")?;

    info!("{} v{}", NAME, VERSION);

    if dump_config(&matches, &settings)? {
        return Ok(());
    }

    let code = run(&matches, settings)?;
    if code != 0 {
        std::process::exit(code);
    }
    Ok(())
}
