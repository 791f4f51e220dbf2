//! # Observability
//!
//! 日志与指标的统一入口。
//!
//! - `init_with_config`: 安装 tracing 订阅者，可选同时启动 Prometheus 导出
//! - `init_metrics_only`: tracing 已就绪时单独启动导出
//! - [`metrics`]: 同步结果与内存占用的指标记录、运行期聚合
//!
//! ```ignore
//! observability::init_with_config(ObservabilityConfig::from_verbosity(1, false, LogFormat::Compact))?;
//!
//! let outcome = synchronizer.synchronize()?;
//! observability::record_sync_outcome(&outcome);
//! ```

pub mod metrics;

use anyhow::{Context, Result};
use metrics_exporter_prometheus::PrometheusBuilder;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

pub use crate::metrics::{
    record_memory_usage, record_sync_latency_ms, record_sync_outcome, MetricsSummary,
    RunningStats, StatsSummary, SyncMetricsAggregator,
};

/// Where the log level comes from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogLevel {
    /// `RUST_LOG` if set, else this directive
    EnvOr(String),
    /// This directive, `RUST_LOG` ignored
    Fixed(String),
}

impl LogLevel {
    fn filter(&self) -> Result<EnvFilter> {
        match self {
            LogLevel::EnvOr(fallback) => EnvFilter::try_from_default_env()
                .or_else(|_| EnvFilter::try_new(fallback))
                .with_context(|| format!("Invalid log directive '{fallback}'")),
            LogLevel::Fixed(directive) => EnvFilter::try_new(directive)
                .with_context(|| format!("Invalid log directive '{directive}'")),
        }
    }
}

/// 可观测性配置
#[derive(Debug, Clone)]
pub struct ObservabilityConfig {
    pub log_format: LogFormat,
    pub level: LogLevel,
    /// Prometheus 端口 (None = 禁用)
    pub metrics_port: Option<u16>,
}

impl ObservabilityConfig {
    /// `-v` / `-q` style: quiet pins `warn`, otherwise info → debug → trace
    /// unless `RUST_LOG` says otherwise
    pub fn from_verbosity(verbose: u8, quiet: bool, log_format: LogFormat) -> Self {
        let level = if quiet {
            LogLevel::Fixed("warn".to_string())
        } else {
            let fallback = match verbose {
                0 => "info",
                1 => "debug",
                _ => "trace",
            };
            LogLevel::EnvOr(fallback.to_string())
        };
        Self {
            log_format,
            level,
            metrics_port: None,
        }
    }

    pub fn with_metrics_port(mut self, port: u16) -> Self {
        self.metrics_port = (port > 0).then_some(port);
        self
    }
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self::from_verbosity(0, false, LogFormat::default())
    }
}

/// 日志格式
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    /// JSON 结构化日志，带线程与源码位置
    Json,
    #[default]
    Pretty,
    Compact,
}

impl LogFormat {
    fn layer<S>(self) -> Box<dyn Layer<S> + Send + Sync>
    where
        S: tracing::Subscriber + for<'a> tracing_subscriber::registry::LookupSpan<'a>,
    {
        match self {
            LogFormat::Json => fmt::layer()
                .json()
                .with_target(true)
                .with_thread_ids(true)
                .with_thread_names(true)
                .with_file(true)
                .with_line_number(true)
                .boxed(),
            LogFormat::Pretty => fmt::layer().pretty().boxed(),
            LogFormat::Compact => fmt::layer().compact().boxed(),
        }
    }
}

/// Install the global subscriber, then the exporter if a port is set.
///
/// Fails if a subscriber is already installed.
pub fn init_with_config(config: ObservabilityConfig) -> Result<()> {
    tracing_subscriber::registry()
        .with(config.level.filter()?)
        .with(config.log_format.layer())
        .try_init()
        .context("Failed to initialize tracing subscriber")?;

    if let Some(port) = config.metrics_port {
        init_metrics_only(port)?;
    }

    tracing::debug!(
        log_format = ?config.log_format,
        level = ?config.level,
        metrics_port = ?config.metrics_port,
        "Observability initialized"
    );
    Ok(())
}

/// Start the Prometheus exporter on `0.0.0.0:port`
pub fn init_metrics_only(port: u16) -> Result<()> {
    PrometheusBuilder::new()
        .with_http_listener(([0, 0, 0, 0], port))
        .install()
        .with_context(|| format!("Failed to install Prometheus recorder on port {port}"))?;

    tracing::info!(port, "Prometheus metrics endpoint initialized");
    Ok(())
}
