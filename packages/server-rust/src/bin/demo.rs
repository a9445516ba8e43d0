//! Ringfence demo: drives a burst of calls through the full pipeline.
//!
//! A scripted ledger handler sits behind the canonical interceptor chain. The
//! backend goes down for a window of calls, which trips the breaker; invalid
//! requests exercise validation and the burst rate exercises the limiter.
//! At the end a per-outcome tally and the per-method metrics are printed.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use ringfence_core::{
    BreakerSettings, CallContext, CallInfo, CircuitBreaker, Message, RateLimitSettings, Status,
    Validate, ValidationError,
};
use ringfence_server::observability::{CallOutcome, InMemoryMetrics, MetricsSink, RecorderSink};
use ringfence_server::telemetry::{init_tracing, LogFormat};
use ringfence_server::{
    build_unary_pipeline, handler_fn, MethodRouter, Pipeline, PipelineComponents, PipelineConfig,
    RateLimiter, TracingLogger, TracingTracer,
};
use tokio_util::sync::CancellationToken;

const POST: &str = "/ledger.Ledger/Post";
const BALANCE: &str = "/ledger.Ledger/Balance";

#[derive(Parser, Debug)]
#[command(
    name = "ringfence-demo",
    about = "Drive a burst of calls through the Ringfence interceptor pipeline",
    version
)]
struct Cli {
    /// JSON pipeline config; overrides the individual engine flags
    #[arg(long, env = "RINGFENCE_CONFIG")]
    config: Option<PathBuf>,

    /// Token bucket capacity
    #[arg(long, env = "RINGFENCE_CAPACITY", default_value_t = 20)]
    capacity: u32,

    /// Time to refill an empty bucket, in milliseconds
    #[arg(long, env = "RINGFENCE_PERIOD_MS", default_value_t = 1000)]
    period_ms: u64,

    /// Failure ratio that trips the breaker
    #[arg(long, env = "RINGFENCE_FAILURE_RATIO", default_value_t = 0.6)]
    failure_ratio: f64,

    /// Outcomes required before the ratio is considered
    #[arg(long, env = "RINGFENCE_MIN_SAMPLES", default_value_t = 5)]
    min_samples: u32,

    /// Time spent open before probing, in milliseconds
    #[arg(long, env = "RINGFENCE_OPEN_TIMEOUT_MS", default_value_t = 500)]
    open_timeout_ms: u64,

    /// Half-open probe budget
    #[arg(long, env = "RINGFENCE_MAX_HALF_OPEN", default_value_t = 2)]
    max_half_open: u32,

    /// Number of calls to issue
    #[arg(long, default_value_t = 60)]
    calls: u32,

    /// Delay between calls, in milliseconds
    #[arg(long, default_value_t = 20)]
    pause_ms: u64,

    /// First call index at which the backend fails
    #[arg(long, default_value_t = 10)]
    outage_from: u32,

    /// Number of calls the outage lasts
    #[arg(long, default_value_t = 15)]
    outage_len: u32,

    /// Every n-th call carries an invalid amount (0 disables)
    #[arg(long, default_value_t = 7)]
    invalid_every: u32,

    /// Log output format: pretty or json
    #[arg(long, env = "RINGFENCE_LOG_FORMAT", default_value = "pretty")]
    log_format: LogFormat,

    /// Install the Prometheus recorder and print its exposition at the end
    #[arg(long)]
    prometheus: bool,
}

impl Cli {
    fn pipeline_config(&self) -> anyhow::Result<PipelineConfig> {
        if let Some(path) = &self.config {
            return PipelineConfig::from_json_file(path);
        }
        let config = PipelineConfig {
            rate_limit: RateLimitSettings {
                capacity: self.capacity,
                period_ms: self.period_ms,
            },
            breaker: BreakerSettings {
                name: "ledger".to_string(),
                failure_ratio: self.failure_ratio,
                min_samples: self.min_samples,
                open_timeout_ms: self.open_timeout_ms,
                max_half_open_requests: self.max_half_open,
                interval_ms: None,
            },
        };
        config.validate()?;
        Ok(config)
    }
}

// ---------------------------------------------------------------------------
// Ledger service
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct LedgerRequest {
    account: String,
    amount: i64,
}

impl Validate for LedgerRequest {
    fn validate(&self) -> Result<(), ValidationError> {
        if self.account.is_empty() {
            return Err(ValidationError::for_field("account", "must not be empty"));
        }
        if self.amount == 0 {
            return Err(ValidationError::for_field("amount", "must be non-zero"));
        }
        Ok(())
    }
}

impl Message for LedgerRequest {
    fn validator(&self) -> Option<&dyn Validate> {
        Some(self)
    }
}

fn ledger_router(backend_up: &Arc<AtomicBool>) -> MethodRouter<LedgerRequest, i64> {
    let post = {
        let backend_up = Arc::clone(backend_up);
        handler_fn(move |_ctx, req: LedgerRequest, _info| {
            let up = backend_up.load(Ordering::Relaxed);
            async move {
                if !up {
                    return Err(Status::unavailable("ledger backend down"));
                }
                Ok(req.amount)
            }
        })
    };
    let balance = handler_fn(|_ctx, req: LedgerRequest, _info| async move {
        Ok::<_, Status>(i64::try_from(req.account.len()).unwrap_or(i64::MAX) * 100)
    });

    MethodRouter::new().route(POST, post).route(BALANCE, balance)
}

/// Reports to both the in-memory summary and the installed recorder.
struct Fanout {
    memory: Arc<InMemoryMetrics>,
    recorder: RecorderSink,
}

impl MetricsSink for Fanout {
    fn inc_requests(&self, method: &str) {
        self.memory.inc_requests(method);
        self.recorder.inc_requests(method);
    }

    fn inc_responses(&self, outcome: CallOutcome, method: &str) {
        self.memory.inc_responses(outcome, method);
        self.recorder.inc_responses(outcome, method);
    }

    fn observe_latency(&self, outcome: CallOutcome, method: &str, seconds: f64) {
        self.memory.observe_latency(outcome, method, seconds);
        self.recorder.observe_latency(outcome, method, seconds);
    }
}

// ---------------------------------------------------------------------------
// Driver
// ---------------------------------------------------------------------------

async fn run_burst(
    cli: &Cli,
    pipeline: &Pipeline<LedgerRequest, i64>,
    backend_up: &AtomicBool,
) -> BTreeMap<&'static str, u64> {
    let mut tally = BTreeMap::new();
    let outage = cli.outage_from..cli.outage_from.saturating_add(cli.outage_len);

    for i in 0..cli.calls {
        backend_up.store(!outage.contains(&i), Ordering::Relaxed);

        let invalid = cli.invalid_every > 0 && (i + 1) % cli.invalid_every == 0;
        let (method, amount) = if i % 4 == 3 {
            (BALANCE, 1)
        } else {
            (POST, if invalid { 0 } else { i64::from(i) + 1 })
        };
        let request = LedgerRequest {
            account: format!("acct-{}", i % 3),
            amount,
        };

        let result = pipeline
            .invoke(CallContext::new(), request, CallInfo::new(method))
            .await;
        let key = match &result {
            Ok(_) => "ok",
            Err(err) => err.kind(),
        };
        *tally.entry(key).or_insert(0) += 1;

        if cli.pause_ms > 0 {
            tokio::time::sleep(Duration::from_millis(cli.pause_ms)).await;
        }
    }

    tally
}

fn print_summary(
    tally: &BTreeMap<&'static str, u64>,
    memory: &InMemoryMetrics,
    breaker: &CircuitBreaker,
    prometheus: Option<&PrometheusHandle>,
) {
    println!("outcomes:");
    for (kind, count) in tally {
        println!("  {kind:<18} {count}");
    }

    println!("methods:");
    for m in memory.summary() {
        println!(
            "  {:<24} requests={} ok={} err={} mean_latency={}",
            m.method,
            m.requests,
            m.successes,
            m.errors,
            m.mean_latency_seconds
                .map_or_else(|| "-".to_string(), |s| format!("{:.3}ms", s * 1000.0)),
        );
    }

    let snapshot = breaker.snapshot();
    println!(
        "breaker '{}': state={} requests={} failures={}",
        snapshot.name, snapshot.state, snapshot.counts.requests, snapshot.counts.total_failures
    );

    if let Some(handle) = prometheus {
        println!("\n{}", handle.render());
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format)?;

    let config = cli.pipeline_config()?;
    let prometheus = if cli.prometheus {
        Some(PrometheusBuilder::new().install_recorder()?)
    } else {
        None
    };
    RecorderSink::describe();

    let shutdown = CancellationToken::new();
    let breaker = CircuitBreaker::builder(&config.breaker)
        .on_state_change(|name, from, to| {
            println!("breaker '{name}': {from} -> {to}");
        })
        .build()?;
    let limiter = Arc::new(RateLimiter::start(&config.rate_limit, &shutdown)?);
    let memory = Arc::new(InMemoryMetrics::new());

    let backend_up = Arc::new(AtomicBool::new(true));
    let pipeline = build_unary_pipeline(
        ledger_router(&backend_up),
        PipelineComponents {
            tracer: Arc::new(TracingTracer),
            breaker: breaker.clone(),
            limiter: Arc::clone(&limiter),
            metrics: Arc::new(Fanout {
                memory: Arc::clone(&memory),
                recorder: RecorderSink,
            }),
            logger: Arc::new(TracingLogger),
        },
    );

    tracing::info!(calls = cli.calls, "starting burst");
    let tally = tokio::select! {
        tally = run_burst(&cli, &pipeline, &backend_up) => tally,
        _ = tokio::signal::ctrl_c() => {
            tracing::warn!("interrupted");
            BTreeMap::new()
        }
    };

    shutdown.cancel();
    limiter.stop().await;

    print_summary(&tally, &memory, &breaker, prometheus.as_ref());
    Ok(())
}
