//! Swarm-Sim: load simulator for the correlation engine.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{ensure, Context};
use clap::{Parser, ValueEnum};
use swarm_correlation::{channel, CorrelationConfig, CorrelationEngine, MatchStrategy, MqMessage};
use swarm_telemetry::{gather_metrics, init_telemetry, PrometheusObserver, TelemetryConfig};
use tracing::info;

use swarm_sim::broker::{BrokerConfig, LoopbackBroker};
use swarm_sim::report::RunReport;
use swarm_sim::scenario::{run_load, LoadPlan};

/// Queue depth of the in-memory request and reply channels
const QUEUE_CAPACITY: usize = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum StrategyArg {
    MessageId,
    CorrelationId,
    Property,
}

/// Swarm-Sim: request/reply load against a loopback broker
#[derive(Parser, Debug)]
#[command(name = "swarm-sim")]
#[command(about = "Drive the correlation engine with virtual users against a loopback broker")]
struct Args {
    /// Number of concurrent virtual users
    #[arg(short, long, default_value = "50")]
    users: usize,

    /// Requests sent by each virtual user
    #[arg(short, long, default_value = "100")]
    requests: usize,

    /// Reply timeout in milliseconds (overrides the configured default)
    #[arg(long)]
    timeout_ms: Option<u64>,

    /// Probability that the broker never answers a request
    #[arg(long, default_value = "0.0")]
    drop_rate: f64,

    /// Upper bound of the broker's reply delay in milliseconds
    #[arg(long, default_value = "20")]
    max_delay_ms: u64,

    /// Correlation strategy (overrides the configured one)
    #[arg(long, value_enum)]
    strategy: Option<StrategyArg>,

    /// Property carrying the token with `--strategy property`
    #[arg(long, default_value = "swarm_token")]
    property_name: String,

    /// Listener tasks draining replies (overrides the configured count)
    #[arg(long)]
    listeners: Option<usize>,

    /// Emit JSON log lines
    #[arg(long)]
    json_logs: bool,

    /// Engine configuration file (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Seed for the broker's drop and delay decisions
    #[arg(long)]
    seed: Option<u64>,

    /// Print the report as JSON instead of text
    #[arg(long)]
    json: bool,
}

impl Args {
    fn engine_config(&self) -> anyhow::Result<CorrelationConfig> {
        let mut config = match &self.config {
            Some(path) => CorrelationConfig::load(path)
                .with_context(|| format!("loading {}", path.display()))?,
            None => CorrelationConfig::default(),
        }
        .with_env_overrides()?;

        if let Some(ms) = self.timeout_ms {
            config.default_timeout = Duration::from_millis(ms);
        }
        if let Some(listeners) = self.listeners {
            config.listener_count = listeners;
        }
        if let Some(strategy) = self.strategy {
            config.match_strategy = match strategy {
                StrategyArg::MessageId => MatchStrategy::MessageId,
                StrategyArg::CorrelationId => MatchStrategy::CorrelationId,
                StrategyArg::Property => MatchStrategy::Property {
                    name: self.property_name.clone(),
                },
            };
        }

        config.validate()?;
        Ok(config)
    }

    /// Broker answering the way `strategy` expects replies to be built.
    fn broker_config(&self, strategy: &MatchStrategy) -> anyhow::Result<BrokerConfig> {
        ensure!(
            (0.0..=1.0).contains(&self.drop_rate),
            "--drop-rate must be between 0 and 1, got {}",
            self.drop_rate
        );
        Ok(BrokerConfig {
            drop_rate: self.drop_rate,
            max_delay: Duration::from_millis(self.max_delay_ms),
            seed: self.seed,
            convention: strategy.reply_convention(),
        })
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut telemetry = TelemetryConfig::from_env();
    telemetry.json_logs |= args.json_logs;
    let _telemetry = init_telemetry(telemetry).await?;

    let config = args.engine_config()?;
    let broker_config = args.broker_config(&config.match_strategy)?;

    let (outbound, requests) = channel::<MqMessage>(QUEUE_CAPACITY);
    let (replies, inbound) = channel::<MqMessage>(QUEUE_CAPACITY);
    let broker = LoopbackBroker::new(broker_config).spawn(requests, replies);

    let engine = Arc::new(
        CorrelationEngine::builder(Arc::new(outbound))
            .config(config)
            .observer(Arc::new(PrometheusObserver::new()?))
            .build()?,
    );
    let listeners = engine.spawn_listeners(Arc::new(inbound));

    info!(
        users = args.users,
        requests = args.requests,
        strategy = engine.matcher_name(),
        "Starting load"
    );
    let plan = LoadPlan {
        users: args.users,
        requests_per_user: args.requests,
        timeout: None,
    };
    let started = Instant::now();
    let outcomes = run_load(Arc::clone(&engine), &plan).await;
    let wall_time = started.elapsed();

    engine.shutdown().await;
    for listener in listeners {
        let _ = listener.await;
    }
    broker.abort();

    let report = RunReport {
        strategy: engine.matcher_name(),
        users: args.users,
        requests_per_user: args.requests,
        wall_time_ms: u64::try_from(wall_time.as_millis()).unwrap_or(u64::MAX),
        outcomes,
        broker: broker.snapshot(),
        registry: engine.stats(),
    };

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("{report}");
        println!();
        print!("{}", gather_metrics()?);
    }

    Ok(())
}
