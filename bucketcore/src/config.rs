//! Settings for a competing subscriber.
//!
//! A [`CompetingConfig`] can be assembled three ways:
//! - [`CompetingConfig::builder`] for programmatic setup (and sub-second timings in tests)
//! - deserializing a settings document with the PascalCase option names
//! - [`CompetingConfig::from_env`], reading `BUCKETCORE_<OPTION>` variables
//!
//! All three paths end in the same validation.

use std::str::FromStr;
use std::time::Duration;

use bucketcore_types::{BatchSize, BucketCount, EndpointName};
use nutype::nutype;
use serde::{Deserialize, Serialize};

use crate::assignment::BucketAssigner;
use crate::errors::ConfigError;

/// Maximum number of buckets one instance claims (default 4).
#[nutype(
    validate(greater_or_equal = 1),
    default = 4,
    derive(
        Debug,
        Default,
        Clone,
        Copy,
        PartialEq,
        Eq,
        PartialOrd,
        Ord,
        Display,
        Into,
        Serialize,
        Deserialize
    )
)]
pub struct BucketsHandled(u32);

impl BucketsHandled {
    /// The limit as a collection size.
    pub fn as_usize(self) -> usize {
        self.into_inner() as usize
    }
}

/// Seconds between heartbeat cycles (default 5).
#[nutype(
    validate(greater_or_equal = 1, less_or_equal = 3600),
    default = 5,
    derive(
        Debug,
        Default,
        Clone,
        Copy,
        PartialEq,
        Eq,
        PartialOrd,
        Ord,
        Display,
        Into,
        Serialize,
        Deserialize
    )
)]
pub struct HeartbeatSeconds(u64);

/// Seconds after which an unrenewed lease is considered orphaned (default 20).
#[nutype(
    validate(greater_or_equal = 1, less_or_equal = 86_400),
    default = 20,
    derive(
        Debug,
        Default,
        Clone,
        Copy,
        PartialEq,
        Eq,
        PartialOrd,
        Ord,
        Display,
        Into,
        Serialize,
        Deserialize
    )
)]
pub struct ExpirationSeconds(u64);

/// Milliseconds a claim attempt on the live path may take (default 2000).
#[nutype(
    validate(greater_or_equal = 1, less_or_equal = 60_000),
    default = 2000,
    derive(
        Debug,
        Default,
        Clone,
        Copy,
        PartialEq,
        Eq,
        PartialOrd,
        Ord,
        Display,
        Into,
        Serialize,
        Deserialize
    )
)]
pub struct ClaimTimeoutMs(u64);

/// What an adoption does with the events it replays while catching up.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum AdoptionReplay {
    /// Advance the adoption cursor only; nothing is dispatched until hand-off.
    #[default]
    CursorOnly,
    /// Dispatch replayed events as well. Requires an idempotent dispatcher.
    Dispatch,
}

impl FromStr for AdoptionReplay {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        if value.eq_ignore_ascii_case("CursorOnly") {
            Ok(Self::CursorOnly)
        } else if value.eq_ignore_ascii_case("Dispatch") {
            Ok(Self::Dispatch)
        } else {
            Err(format!("expected CursorOnly or Dispatch, got {value:?}"))
        }
    }
}

/// Validated configuration of a competing subscriber.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(try_from = "CompetingSettings")]
pub struct CompetingConfig {
    endpoint: EndpointName,
    bucket_count: BucketCount,
    buckets_handled: BucketsHandled,
    heartbeat_interval: Duration,
    expiration: Duration,
    pause_on_free_buckets: bool,
    read_size: BatchSize,
    claim_timeout: Duration,
    adoption_replay: AdoptionReplay,
}

impl CompetingConfig {
    /// Start a builder for `endpoint` with every other option at its default.
    pub fn builder(endpoint: EndpointName) -> CompetingConfigBuilder {
        CompetingConfigBuilder {
            config: Self {
                endpoint,
                bucket_count: BucketCount::default(),
                buckets_handled: BucketsHandled::default(),
                heartbeat_interval: Duration::from_secs(HeartbeatSeconds::default().into_inner()),
                expiration: Duration::from_secs(ExpirationSeconds::default().into_inner()),
                pause_on_free_buckets: false,
                read_size: BatchSize::default(),
                claim_timeout: Duration::from_millis(ClaimTimeoutMs::default().into_inner()),
                adoption_replay: AdoptionReplay::default(),
            },
        }
    }

    /// Read the configuration from `BUCKETCORE_<OPTION>` environment variables.
    ///
    /// `BUCKETCORE_ENDPOINT` is required; every other option falls back to
    /// its default.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Read the configuration through `lookup`, keyed by environment variable name.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let endpoint = lookup(env_name("ENDPOINT").as_str())
            .ok_or(ConfigError::Missing { option: "Endpoint" })?;
        let endpoint = EndpointName::try_new(endpoint)
            .map_err(|error| ConfigError::invalid("Endpoint", error))?;

        let mut settings = CompetingSettings::new(endpoint);

        if let Some(count) = parse_option::<u32>(&lookup, "BucketCount", "BUCKET_COUNT")? {
            settings.bucket_count = BucketCount::try_new(count)
                .map_err(|error| ConfigError::invalid("BucketCount", error))?;
        }
        if let Some(handled) = parse_option::<u32>(&lookup, "BucketsHandled", "BUCKETS_HANDLED")? {
            settings.buckets_handled = BucketsHandled::try_new(handled)
                .map_err(|error| ConfigError::invalid("BucketsHandled", error))?;
        }
        if let Some(seconds) =
            parse_option::<u64>(&lookup, "BucketHeartbeats", "BUCKET_HEARTBEATS")?
        {
            settings.bucket_heartbeats = HeartbeatSeconds::try_new(seconds)
                .map_err(|error| ConfigError::invalid("BucketHeartbeats", error))?;
        }
        if let Some(seconds) =
            parse_option::<u64>(&lookup, "BucketExpiration", "BUCKET_EXPIRATION")?
        {
            settings.bucket_expiration = ExpirationSeconds::try_new(seconds)
                .map_err(|error| ConfigError::invalid("BucketExpiration", error))?;
        }
        if let Some(pause) =
            parse_option::<bool>(&lookup, "PauseOnFreeBuckets", "PAUSE_ON_FREE_BUCKETS")?
        {
            settings.pause_on_free_buckets = pause;
        }
        if let Some(size) = parse_option::<usize>(&lookup, "ReadSize", "READ_SIZE")? {
            settings.read_size = BatchSize::try_new(size)
                .map_err(|error| ConfigError::invalid("ReadSize", error))?;
        }
        if let Some(millis) = parse_option::<u64>(&lookup, "ClaimTimeoutMs", "CLAIM_TIMEOUT_MS")? {
            settings.claim_timeout_ms = ClaimTimeoutMs::try_new(millis)
                .map_err(|error| ConfigError::invalid("ClaimTimeoutMs", error))?;
        }
        if let Some(replay) =
            parse_option::<AdoptionReplay>(&lookup, "AdoptionReplay", "ADOPTION_REPLAY")?
        {
            settings.adoption_replay = replay;
        }

        Self::try_from(settings)
    }

    /// Logical endpoint every competing instance shares.
    pub const fn endpoint(&self) -> &EndpointName {
        &self.endpoint
    }

    /// Total number of buckets.
    pub const fn bucket_count(&self) -> BucketCount {
        self.bucket_count
    }

    /// Per-instance claim limit.
    pub const fn buckets_handled(&self) -> BucketsHandled {
        self.buckets_handled
    }

    /// Period of the heartbeat loop.
    pub const fn heartbeat_interval(&self) -> Duration {
        self.heartbeat_interval
    }

    /// Age after which a lease is considered orphaned.
    pub const fn expiration(&self) -> Duration {
        self.expiration
    }

    /// Whether the pause monitor runs.
    pub const fn pause_on_free_buckets(&self) -> bool {
        self.pause_on_free_buckets
    }

    /// Batch size for catch-up reads.
    pub const fn read_size(&self) -> BatchSize {
        self.read_size
    }

    /// Upper bound on a claim attempt made from the live path.
    pub const fn claim_timeout(&self) -> Duration {
        self.claim_timeout
    }

    /// Replay behaviour of adoptions.
    pub const fn adoption_replay(&self) -> AdoptionReplay {
        self.adoption_replay
    }

    /// Stream-to-bucket mapping for this deployment.
    pub const fn assigner(&self) -> BucketAssigner {
        BucketAssigner::new(self.bucket_count)
    }

    fn validate(self) -> Result<Self, ConfigError> {
        if self.buckets_handled.into_inner() > self.bucket_count.into_inner() {
            return Err(ConfigError::invalid(
                "BucketsHandled",
                format!(
                    "{} exceeds the bucket count of {}",
                    self.buckets_handled, self.bucket_count
                ),
            ));
        }
        if self.heartbeat_interval.is_zero() {
            return Err(ConfigError::invalid("BucketHeartbeats", "must be positive"));
        }
        if self.expiration <= self.heartbeat_interval {
            return Err(ConfigError::invalid(
                "BucketExpiration",
                format!(
                    "{:?} must exceed the heartbeat interval of {:?}",
                    self.expiration, self.heartbeat_interval
                ),
            ));
        }
        if self.claim_timeout.is_zero() {
            return Err(ConfigError::invalid("ClaimTimeoutMs", "must be positive"));
        }
        Ok(self)
    }
}

/// Builder returned by [`CompetingConfig::builder`].
#[derive(Debug, Clone)]
#[must_use]
pub struct CompetingConfigBuilder {
    config: CompetingConfig,
}

impl CompetingConfigBuilder {
    /// Total number of buckets.
    pub fn with_bucket_count(mut self, count: BucketCount) -> Self {
        self.config.bucket_count = count;
        self
    }

    /// Per-instance claim limit.
    pub fn with_buckets_handled(mut self, handled: BucketsHandled) -> Self {
        self.config.buckets_handled = handled;
        self
    }

    /// Period of the heartbeat loop.
    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.config.heartbeat_interval = interval;
        self
    }

    /// Age after which a lease is considered orphaned.
    pub fn with_expiration(mut self, expiration: Duration) -> Self {
        self.config.expiration = expiration;
        self
    }

    /// Enable or disable the pause monitor.
    pub fn with_pause_on_free_buckets(mut self, enabled: bool) -> Self {
        self.config.pause_on_free_buckets = enabled;
        self
    }

    /// Batch size for catch-up reads.
    pub fn with_read_size(mut self, read_size: BatchSize) -> Self {
        self.config.read_size = read_size;
        self
    }

    /// Upper bound on a claim attempt made from the live path.
    pub fn with_claim_timeout(mut self, timeout: Duration) -> Self {
        self.config.claim_timeout = timeout;
        self
    }

    /// Replay behaviour of adoptions.
    pub fn with_adoption_replay(mut self, replay: AdoptionReplay) -> Self {
        self.config.adoption_replay = replay;
        self
    }

    /// Validate and produce the configuration.
    pub fn build(self) -> Result<CompetingConfig, ConfigError> {
        self.config.validate()
    }
}

/// Settings document form of [`CompetingConfig`], using the option names.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", deny_unknown_fields)]
pub struct CompetingSettings {
    /// Logical endpoint name.
    pub endpoint: EndpointName,
    /// Total number of buckets.
    #[serde(default)]
    pub bucket_count: BucketCount,
    /// Per-instance claim limit.
    #[serde(default)]
    pub buckets_handled: BucketsHandled,
    /// Seconds between heartbeat cycles.
    #[serde(default)]
    pub bucket_heartbeats: HeartbeatSeconds,
    /// Seconds before a lease is considered stale.
    #[serde(default)]
    pub bucket_expiration: ExpirationSeconds,
    /// Whether the pause monitor runs.
    #[serde(default)]
    pub pause_on_free_buckets: bool,
    /// Batch size for catch-up reads.
    #[serde(default)]
    pub read_size: BatchSize,
    /// Claim attempt timeout in milliseconds.
    #[serde(default)]
    pub claim_timeout_ms: ClaimTimeoutMs,
    /// Replay behaviour of adoptions.
    #[serde(default)]
    pub adoption_replay: AdoptionReplay,
}

impl CompetingSettings {
    /// Settings for `endpoint` with every other option at its default.
    pub fn new(endpoint: EndpointName) -> Self {
        Self {
            endpoint,
            bucket_count: BucketCount::default(),
            buckets_handled: BucketsHandled::default(),
            bucket_heartbeats: HeartbeatSeconds::default(),
            bucket_expiration: ExpirationSeconds::default(),
            pause_on_free_buckets: false,
            read_size: BatchSize::default(),
            claim_timeout_ms: ClaimTimeoutMs::default(),
            adoption_replay: AdoptionReplay::default(),
        }
    }
}

impl TryFrom<CompetingSettings> for CompetingConfig {
    type Error = ConfigError;

    fn try_from(settings: CompetingSettings) -> Result<Self, Self::Error> {
        CompetingConfig::builder(settings.endpoint)
            .with_bucket_count(settings.bucket_count)
            .with_buckets_handled(settings.buckets_handled)
            .with_heartbeat_interval(Duration::from_secs(
                settings.bucket_heartbeats.into_inner(),
            ))
            .with_expiration(Duration::from_secs(settings.bucket_expiration.into_inner()))
            .with_pause_on_free_buckets(settings.pause_on_free_buckets)
            .with_read_size(settings.read_size)
            .with_claim_timeout(Duration::from_millis(settings.claim_timeout_ms.into_inner()))
            .with_adoption_replay(settings.adoption_replay)
            .build()
    }
}

fn env_name(suffix: &str) -> String {
    format!("BUCKETCORE_{suffix}")
}

fn parse_option<T>(
    lookup: &impl Fn(&str) -> Option<String>,
    option: &'static str,
    suffix: &str,
) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: ToString,
{
    lookup(env_name(suffix).as_str())
        .map(|raw| {
            raw.trim()
                .parse::<T>()
                .map_err(|error| ConfigError::invalid(option, error))
        })
        .transpose()
}
