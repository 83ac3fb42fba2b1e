// sislib test application -- CLI tool for exercising the Extron SIS engine
// against real hardware or a simulated unit.
//
// Usage:
//   sislib-test-app --host 10.0.0.5 --password secret get videoroute 1
//   sislib-test-app --host 10.0.0.5 --password secret set videoroute 3 1
//   sislib-test-app --mock get videomute 3B
//   sislib-test-app --mock stress --count 50
//   sislib-test-app endpoints
//   sislib-test-app mixpoint MicToOut3 4
//   sislib-test-app volume to-device 76
//   sislib-test-app classify "DTP CrossPoint 84 Matrix Switcher"

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};

use sislib_core::{HostLink, Method, SessionKey};
use sislib_extron::commands::{Endpoint, PUBLIC_ENDPOINTS};
use sislib_extron::mixpoint::MixPoint;
use sislib_extron::{Engine, EngineBuilder, models, volume};
use sislib_test_harness::MockHost;
use sislib_transport::TcpHost;

// ---------------------------------------------------------------------------
// CLI argument definitions
// ---------------------------------------------------------------------------

/// sislib test application -- drives Extron SIS units from the command line.
#[derive(Parser)]
#[command(name = "sislib-test-app", version, about)]
struct Cli {
    /// Unit address (`host` or `host:port`), or a full session key
    /// (`user:password@host`). Required for `get`, `set`, and `stress`
    /// unless --mock is used.
    #[arg(long)]
    host: Option<String>,

    /// Login password. Ignored when --host is already a full session key.
    #[arg(long)]
    password: Option<String>,

    /// Talk to a simulated DTP CrossPoint 84 instead of real hardware.
    #[arg(long)]
    mock: bool,

    /// Attempts per command cycle.
    #[arg(long, default_value_t = 2)]
    attempts: u32,

    /// Per-line read timeout in milliseconds.
    #[arg(long, default_value_t = 5000)]
    read_timeout_ms: u64,

    /// Increase log verbosity (-v debug, -vv trace). `RUST_LOG` overrides.
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Read a value from the unit.
    Get {
        /// Endpoint name (see `endpoints`).
        endpoint: String,
        /// Up to three endpoint arguments.
        #[arg(num_args = 0..=3)]
        args: Vec<String>,
    },

    /// Change a setting on the unit.
    Set {
        /// Endpoint name (see `endpoints`).
        endpoint: String,
        /// Up to three endpoint arguments.
        #[arg(num_args = 0..=3)]
        args: Vec<String>,
    },

    /// Print the device category and model of the unit.
    Info,

    /// Concurrent reads on one session to check request ordering.
    Stress {
        /// Number of requests.
        #[arg(long, default_value_t = 20)]
        count: u32,
    },

    /// List every endpoint the engine knows.
    Endpoints,

    /// Compute a DMP mix-point address.
    Mixpoint {
        /// Source token, e.g. MicToOut3 or VRetToSendC.
        input: String,
        /// Destination token, e.g. 4 or B.
        output: String,
    },

    /// Convert between percent and device tenths of a dB.
    Volume {
        #[command(subcommand)]
        action: VolumeAction,
    },

    /// Classify a model description as the engine would.
    Classify {
        /// Reply text of the `2I` query.
        description: String,
    },
}

#[derive(Subcommand)]
enum VolumeAction {
    /// Percent (0-100) to tenths of a dB.
    ToDevice { percent: String },
    /// Tenths of a dB to percent.
    ToPercent { tenths: String },
}

// ---------------------------------------------------------------------------
// Setup
// ---------------------------------------------------------------------------

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "debug",
        _ => "trace",
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        tracing_subscriber::EnvFilter::new(format!(
            "sislib_extron={level},sislib_transport={level},sislib_test_app={level}"
        ))
    });
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();
}

/// Build the session key from --host and --password.
fn session_key(cli: &Cli) -> Result<SessionKey> {
    if cli.mock {
        return Ok(SessionKey::new("admin:extron@mock"));
    }
    let host = cli
        .host
        .as_deref()
        .context("--host is required unless --mock is used")?;
    if host.contains('@') {
        return Ok(SessionKey::new(host));
    }
    Ok(match cli.password.as_deref() {
        Some(password) => SessionKey::new(format!("admin:{password}@{host}")),
        None => SessionKey::new(host),
    })
}

/// A simulated DTP CrossPoint 84 answering the common queries.
fn mock_unit(key: &SessionKey) -> Arc<MockHost> {
    let host = Arc::new(MockHost::new());
    host.login_script(
        key,
        &[
            "(c) Copyright 2020, Extron Electronics, DTP CrossPoint 84, V1.04, 60-1234-01",
            "Mon, 19 Oct 2026 10:12:44",
            "Password:",
            "Login Administrator",
        ],
    );
    let replies = [
        ("2I", "DTP CrossPoint 84 Matrix Switcher"),
        ("Q", "1.04"),
        ("N", "60-1234-01"),
        ("I", "DTP CrossPoint 84"),
        ("W20STAT", "+00035.12"),
        ("0LS", "10100000"),
        ("\x1bVM", "0 0 0 2 0 0"),
        ("1*B", "0"),
        ("1%", "3"),
        ("2%", "1"),
        ("3*1%", "Out1 In3 Vid"),
        ("3*1!", "Out1 In3 All"),
        ("3B*1B", "Vmt3B*1"),
        ("3B*0B", "Vmt3B*0"),
        ("3B*2B", "Vmt3B*2"),
    ];
    for (command, reply) in replies {
        host.respond(key, command, reply);
    }
    host
}

fn create_engine(cli: &Cli, key: &SessionKey) -> Result<Engine> {
    let host: Arc<dyn HostLink> = if cli.mock {
        mock_unit(key)
    } else {
        Arc::new(TcpHost::new().read_timeout(Duration::from_millis(cli.read_timeout_ms)))
    };
    tracing::debug!(session = %key, mock = cli.mock, "creating engine");
    EngineBuilder::new()
        .max_attempts(cli.attempts)
        .keepalive(false)
        .build_with_host(host)
        .context("invalid engine configuration")
}

// ---------------------------------------------------------------------------
// Command handlers
// ---------------------------------------------------------------------------

async fn cmd_request(
    engine: &Engine,
    key: &SessionKey,
    method: Method,
    endpoint: &str,
    args: &[String],
) -> Result<()> {
    let args: Vec<&str> = args.iter().map(String::as_str).collect();
    let (text, err) = engine.dispatch_wire(endpoint, method, key, &args).await;
    println!("{text}");
    if let Some(e) = err {
        bail!("{method} {endpoint} failed: {e}");
    }
    Ok(())
}

async fn cmd_info(engine: &Engine, key: &SessionKey) -> Result<()> {
    let category = engine
        .device_category(key)
        .await
        .context("failed to classify unit")?;
    println!("Session:     {key}");
    println!("Category:    {category}");
    if let Some(c) = engine.cached_classification(key) {
        println!("Description: {}", c.description);
    }
    match engine.device_model(key).await {
        Ok(model) => println!("Model:       {model}"),
        Err(e) => println!("Model:       unavailable ({e})"),
    }
    Ok(())
}

async fn cmd_stress(engine: &Engine, key: &SessionKey, count: u32) -> Result<()> {
    println!("Stress test: {count} concurrent firmware reads on {key}");
    let start = Instant::now();

    let mut tasks = Vec::new();
    for _ in 0..count {
        let engine = engine.clone();
        let key = key.clone();
        tasks.push(tokio::spawn(async move {
            engine.dispatch("firmwareversion", Method::Get, &key, &[]).await
        }));
    }

    let mut failures = 0u32;
    for (i, task) in tasks.into_iter().enumerate() {
        match task.await.context("request task panicked")? {
            Ok(_) => {}
            Err(e) => {
                eprintln!("[{}/{count}] failed: {e}", i + 1);
                failures += 1;
            }
        }
    }

    let elapsed = start.elapsed();
    println!();
    println!("Results:");
    println!("  Requests:   {count}");
    println!("  Failures:   {failures}");
    println!("  Elapsed:    {:.3} s", elapsed.as_secs_f64());

    if failures > 0 {
        bail!("{failures} out of {count} requests failed");
    }
    Ok(())
}

fn cmd_endpoints() {
    println!("Device-dependent endpoints:");
    for endpoint in Endpoint::ALL {
        let mut methods = Vec::new();
        for method in [Method::Get, Method::Set] {
            if endpoint.supports(method) {
                methods.push(method.to_string());
            }
        }
        let note = if endpoint.is_implemented() { "" } else { "  (not implemented)" };
        println!("  {:<20} {}{note}", endpoint.name(), methods.join("/"));
    }
    println!();
    println!("Public endpoints:");
    for public in PUBLIC_ENDPOINTS {
        println!(
            "  {:<34} {:<4} {}",
            public.name,
            public.method.to_string(),
            public.template.escape_debug()
        );
    }
}

fn cmd_mixpoint(input: &str, output: &str) -> Result<()> {
    let point = MixPoint::resolve(input, output)?;
    println!("{point}");
    Ok(())
}

fn cmd_volume(action: &VolumeAction) -> Result<()> {
    match action {
        VolumeAction::ToDevice { percent } => println!("{}", volume::percent_to_device(percent)?),
        VolumeAction::ToPercent { tenths } => println!("{}", volume::device_to_percent(tenths)?),
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    // Offline commands need no unit.
    match &cli.command {
        Command::Endpoints => {
            cmd_endpoints();
            return Ok(());
        }
        Command::Mixpoint { input, output } => return cmd_mixpoint(input, output),
        Command::Volume { action } => return cmd_volume(action),
        Command::Classify { description } => {
            println!("{}", models::classify(description));
            return Ok(());
        }
        _ => {}
    }

    let key = session_key(&cli)?;
    let engine = create_engine(&cli, &key)?;

    match &cli.command {
        Command::Get { endpoint, args } => {
            cmd_request(&engine, &key, Method::Get, endpoint, args).await
        }
        Command::Set { endpoint, args } => {
            cmd_request(&engine, &key, Method::Set, endpoint, args).await
        }
        Command::Info => cmd_info(&engine, &key).await,
        Command::Stress { count } => cmd_stress(&engine, &key, *count).await,
        Command::Endpoints
        | Command::Mixpoint { .. }
        | Command::Volume { .. }
        | Command::Classify { .. } => unreachable!("offline commands handled above"),
    }
}
