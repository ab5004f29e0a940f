//! relay-hello - run the Hello server, or call one
//!
//! `serve` hosts [`HelloService`] behind a logging filter until Ctrl-C.
//! `call` says hi, adds two numbers, then floods the server with blocking
//! calls and prints the client's stats once they have all finished.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use relay::config::{LogLevel, RelayConfig};
use relay::service::FilterExt;
use relay::worker_pool::{WorkerPool, WorkerPoolConfig};
use relay::{
    join_all, ClientBuilder, Deferred, LoggingFilter, ServerBuilder, SummarizingStatsReceiver,
};
use relay_hello::{HelloClient, HelloCodec, HelloService};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// TOML configuration file
    #[arg(short, long, env = "RELAY_HELLO_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Log level (RUST_LOG takes precedence)
    #[arg(long, value_enum, global = true)]
    log_level: Option<LogLevelArg>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the Hello server until Ctrl-C
    Serve {
        /// Address to listen on
        #[arg(short, long)]
        bind: Option<String>,

        /// Close connections idle for this long
        #[arg(long)]
        read_timeout_ms: Option<u64>,

        /// Worker threads for blocking calls
        #[arg(long)]
        pool_size: Option<usize>,
    },

    /// Call a running Hello server
    Call {
        /// Server address (can be specified multiple times)
        #[arg(long = "host")]
        hosts: Vec<String>,

        /// Number of blocking calls to send
        #[arg(short = 'n', long, default_value = "100")]
        calls: usize,

        /// Maximum concurrent connections per host
        #[arg(long)]
        host_connection_limit: Option<usize>,

        /// How long a call may wait for a free connection
        #[arg(long)]
        connect_timeout_ms: Option<u64>,

        /// Additional attempts after a connect failure or timeout
        #[arg(long)]
        retries: Option<u32>,

        /// Give up waiting for the calls after this many seconds
        #[arg(long, default_value = "600")]
        wait_secs: u64,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogLevelArg {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl From<LogLevelArg> for LogLevel {
    fn from(arg: LogLevelArg) -> Self {
        match arg {
            LogLevelArg::Error => LogLevel::Error,
            LogLevelArg::Warn => LogLevel::Warn,
            LogLevelArg::Info => LogLevel::Info,
            LogLevelArg::Debug => LogLevel::Debug,
            LogLevelArg::Trace => LogLevel::Trace,
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => RelayConfig::from_file(path)
            .with_context(|| format!("Failed to load {}", path.display()))?,
        None => RelayConfig::default(),
    };
    if let Some(level) = cli.log_level {
        config.logging.level = level.into();
    }
    relay::logging::init_logging(&config.logging)?;

    match cli.command {
        Command::Serve {
            bind,
            read_timeout_ms,
            pool_size,
        } => {
            if let Some(bind) = bind {
                config.server.bind_to = bind;
            }
            if let Some(ms) = read_timeout_ms {
                config.server.read_timeout_ms = ms;
            }
            if let Some(size) = pool_size {
                config.worker_pool.pool_size = size;
            }
            serve(config)
        }
        Command::Call {
            hosts,
            calls,
            host_connection_limit,
            connect_timeout_ms,
            retries,
            wait_secs,
        } => {
            if !hosts.is_empty() {
                config.client.hosts = hosts;
            } else if config.client.hosts.is_empty() {
                config.client.hosts = vec![config.server.bind_to.clone()];
            }
            if let Some(limit) = host_connection_limit {
                config.client.host_connection_limit = limit;
            }
            if let Some(ms) = connect_timeout_ms {
                config.client.connect_timeout_ms = ms;
            }
            if let Some(retries) = retries {
                config.client.retries = retries;
            }
            call(config, calls, Duration::from_secs(wait_secs))
        }
    }
}

fn serve(config: RelayConfig) -> Result<()> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .thread_name("hello-server")
        .enable_all()
        .build()
        .context("Failed to start runtime")?;

    runtime.block_on(async move {
        let workers = WorkerPool::new(WorkerPoolConfig::from_settings(
            "hello-worker",
            &config.worker_pool,
        ))?;
        let service = LoggingFilter::new("hello").and_then(HelloService::new(workers));

        let stats = SummarizingStatsReceiver::new();
        let server = ServerBuilder::from_config(&config.server)
            .codec(HelloCodec::new())
            .report_to(Arc::new(stats.clone()))
            .build(service)
            .await
            .context("Failed to start Hello server")?;

        info!(
            "Hello server v{} listening on {}",
            env!("CARGO_PKG_VERSION"),
            server.local_addr()
        );
        tokio::signal::ctrl_c()
            .await
            .context("Failed to listen for Ctrl-C")?;

        server.close().await;
        println!("{}", stats.summary());
        Ok(())
    })
}

fn call(config: RelayConfig, calls: usize, wait: Duration) -> Result<()> {
    let stats = SummarizingStatsReceiver::new();
    let client = ClientBuilder::from_config(&config.client)
        .codec(HelloCodec::new())
        .report_to(Arc::new(stats.clone()))
        .build()
        .context("Failed to build Hello client")?;
    let hello = HelloClient::new(client.clone());

    let hi = hello.hi();
    hi.add_listener(
        |greeting| info!("hi call. success: {}", greeting),
        |e| warn!("hi call. failure: {}", e),
    );
    let add = hello.add(40, 2);
    add.add_listener(
        |sum| info!("add call. answer: {}", sum),
        |e| warn!("add call. failure: {}", e),
    );

    let started = Instant::now();
    let blocking: Vec<Deferred<u64>> = (0..calls)
        .map(|i| {
            let call = hello.blocking_call();
            call.add_listener(
                move |ms| info!("blocking call {} returned after {} ms of work", i, ms),
                move |e| warn!("blocking call {} failed: {}", i, e),
            );
            call
        })
        .collect();

    let outcomes = join_all(blocking)
        .get(wait)
        .context("Blocking calls did not finish in time")?;
    let failed = outcomes.iter().filter(|o| o.is_err()).count();
    info!(
        "{} blocking calls finished in {:?} ({} failed)",
        calls,
        started.elapsed(),
        failed
    );

    for quick in [hi.map(|_| ()), add.map(|_| ())] {
        if let Err(e) = quick.get(Duration::from_secs(1)) {
            warn!("quick call did not succeed: {}", e);
        }
    }

    client
        .release()
        .get(Duration::from_secs(5))
        .context("Failed to release client")?;
    println!("{}", stats.summary());
    Ok(())
}
