//! The decision engine.
//!
//! [`RateLimiter::evaluate`] identifies the caller, resolves their tier from
//! the active snapshot, touches every window the request counts against and
//! compares the results to the tier's limits. It is synchronous and safe to
//! call from any number of threads.

use std::sync::Arc;
use std::time::Duration;

use http::header::CONTENT_LENGTH;
use http::{HeaderMap, Method, Request};
use serde::{Serialize, Serializer};
use tracing::{debug, trace};

use super::clock::{Clock, SystemClock};
use super::counter::{CapacityExceeded, CounterKey, CounterStore, WindowKind, WindowReading};
use super::identity::{AuthMethod, Identifier, IdentityExtractor};
use super::rules::{Limit, TierName};
use super::snapshot::{ConfigStore, Version};

/// The parts of a request the limiter looks at.
#[derive(Debug, Clone, Copy)]
pub struct RequestMeta<'a> {
    pub method: &'a Method,
    pub headers: &'a HeaderMap,
    /// Raw query string
    pub query: Option<&'a str>,
    /// Declared body size
    pub content_length: Option<u64>,
}

impl<'a> RequestMeta<'a> {
    pub fn new(method: &'a Method, headers: &'a HeaderMap) -> Self {
        Self {
            method,
            headers,
            query: None,
            content_length: None,
        }
    }

    pub fn with_query(mut self, query: &'a str) -> Self {
        self.query = Some(query);
        self
    }

    pub fn with_content_length(mut self, content_length: u64) -> Self {
        self.content_length = Some(content_length);
        self
    }

    /// Take method, headers, query and `Content-Length` from a request.
    pub fn from_request<B>(request: &'a Request<B>) -> Self {
        let content_length = request
            .headers()
            .get(CONTENT_LENGTH)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.trim().parse().ok());

        Self {
            method: request.method(),
            headers: request.headers(),
            query: request.uri().query(),
            content_length,
        }
    }

    /// Direction of body transfer this request is gated on, if any.
    pub fn direction(&self) -> Option<Direction> {
        if self.method == Method::PUT || self.method == Method::POST {
            Some(Direction::Upload)
        } else if self.method == Method::GET {
            Some(Direction::Download)
        } else {
            None
        }
    }

    /// Amount this request adds to `window`, or `None` if it does not count
    /// against it.
    fn amount_for(&self, window: WindowKind) -> Option<u64> {
        match window {
            WindowKind::Second | WindowKind::Minute => Some(1),
            WindowKind::BytesIn => match self.direction() {
                Some(Direction::Upload) => Some(self.content_length.unwrap_or(0)),
                _ => None,
            },
            // downloads are gated on what has already been transferred
            WindowKind::BytesOut => match self.direction() {
                Some(Direction::Download) => Some(0),
                _ => None,
            },
        }
    }
}

/// Direction of a body transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Upload,
    Download,
}

impl Direction {
    /// The byte window this direction is accounted in.
    pub fn window(&self) -> WindowKind {
        match self {
            Direction::Upload => WindowKind::BytesIn,
            Direction::Download => WindowKind::BytesOut,
        }
    }
}

/// Why a request was denied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DenyReason {
    /// A window went over its limit.
    LimitExceeded,
    /// No counter could be created for the caller.
    CapacityExceeded,
}

/// Details of a denial.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Denial {
    pub reason: DenyReason,
    /// The first window that failed, smallest window first.
    pub window: WindowKind,
    pub limit: Limit,
    /// How long until the window has room again.
    #[serde(rename = "retry_after_ms", serialize_with = "as_millis")]
    pub retry_after: Duration,
}

/// Allow or deny.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Verdict {
    Allow,
    Deny(Denial),
}

/// State of one window after evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct WindowStatus {
    pub window: WindowKind,
    pub limit: Limit,
    pub current: u64,
    /// `None` when the limit is unlimited.
    pub remaining: Option<u64>,
    #[serde(rename = "reset_in_ms", serialize_with = "as_millis")]
    pub reset_in: Duration,
    /// Whether this request counted against the window.
    pub enforced: bool,
}

impl WindowStatus {
    fn new(window: WindowKind, limit: Limit, reading: WindowReading, enforced: bool) -> Self {
        Self {
            window,
            limit,
            current: reading.value,
            remaining: limit.remaining(reading.value),
            reset_in: reading.reset_in,
            enforced,
        }
    }
}

/// Outcome of evaluating one request.
#[derive(Debug, Clone, Serialize)]
pub struct Decision {
    pub verdict: Verdict,
    pub identifier: Identifier,
    pub auth_method: AuthMethod,
    pub tier: TierName,
    pub config_version: Version,
    /// Status of every window, smallest first.
    pub windows: Vec<WindowStatus>,
}

impl Decision {
    pub fn is_allowed(&self) -> bool {
        matches!(self.verdict, Verdict::Allow)
    }

    pub fn denial(&self) -> Option<&Denial> {
        match &self.verdict {
            Verdict::Allow => None,
            Verdict::Deny(denial) => Some(denial),
        }
    }

    /// Get the status of one window.
    pub fn window(&self, window: WindowKind) -> Option<&WindowStatus> {
        self.windows.iter().find(|status| status.window == window)
    }
}

fn as_millis<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_u64(duration.as_millis() as u64)
}

/// Per-identity request and bandwidth limiter.
///
/// Cheap to share: all state lives behind `Arc`s.
#[derive(Debug, Clone)]
pub struct RateLimiter {
    extractor: IdentityExtractor,
    config: Arc<ConfigStore>,
    counters: Arc<CounterStore>,
    clock: Arc<dyn Clock>,
}

impl RateLimiter {
    /// Create a limiter reading tiers from `config` and counting in `counters`.
    pub fn new(config: Arc<ConfigStore>, counters: Arc<CounterStore>) -> Self {
        Self {
            extractor: IdentityExtractor::default(),
            config,
            counters,
            clock: Arc::new(SystemClock::new()),
        }
    }

    pub fn with_extractor(mut self, extractor: IdentityExtractor) -> Self {
        self.extractor = extractor;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn config(&self) -> &Arc<ConfigStore> {
        &self.config
    }

    pub fn counters(&self) -> &Arc<CounterStore> {
        &self.counters
    }

    /// Decide whether a request may proceed.
    ///
    /// Every window the request counts against is incremented whether or not
    /// the request is allowed.
    pub fn evaluate(&self, request: &RequestMeta<'_>) -> Decision {
        let identity = self.extractor.extract(request.headers, request.query);
        let snapshot = self.config.current();
        let (tier, limits) = snapshot.resolve(&identity.identifier);
        let now = self.clock.now();

        let mut denial: Option<Denial> = None;
        let mut windows = Vec::with_capacity(WindowKind::ALL.len());

        for window in WindowKind::ALL {
            let limit = limits.get(window);
            let key = CounterKey::new(identity.identifier.clone(), window);

            let status = match request.amount_for(window) {
                Some(amount) => match self.counters.touch_reading(&key, amount, now) {
                    Ok(reading) => {
                        if denial.is_none() && limit.is_exceeded_by(reading.value) {
                            denial = Some(Denial {
                                reason: DenyReason::LimitExceeded,
                                window,
                                limit,
                                retry_after: reading.reset_in,
                            });
                        }
                        WindowStatus::new(window, limit, reading, true)
                    }
                    Err(CapacityExceeded { .. }) => {
                        if denial.is_none() {
                            denial = Some(Denial {
                                reason: DenyReason::CapacityExceeded,
                                window,
                                limit,
                                retry_after: window.slot_length(),
                            });
                        }
                        WindowStatus::new(window, limit, WindowReading::EMPTY, true)
                    }
                },
                None => WindowStatus::new(window, limit, self.counters.reading(&key, now), false),
            };
            windows.push(status);
        }

        let verdict = match denial {
            Some(denial) => {
                debug!(
                    identifier = %identity.identifier,
                    tier = %tier,
                    window = %denial.window,
                    limit = %denial.limit,
                    reason = ?denial.reason,
                    "Request denied"
                );
                Verdict::Deny(denial)
            }
            None => {
                trace!(
                    identifier = %identity.identifier,
                    tier = %tier,
                    "Request allowed"
                );
                Verdict::Allow
            }
        };

        Decision {
            verdict,
            identifier: identity.identifier,
            auth_method: identity.method,
            tier: Arc::clone(tier),
            config_version: snapshot.version(),
            windows,
        }
    }

    /// Account bytes actually transferred once a body completes.
    ///
    /// Returns the new in-window byte total for the direction.
    pub fn record_transfer(
        &self,
        identifier: &Identifier,
        direction: Direction,
        bytes: u64,
    ) -> Result<u64, CapacityExceeded> {
        let key = CounterKey::new(identifier.clone(), direction.window());
        let total = self.counters.touch(&key, bytes, self.clock.now())?;
        trace!(
            identifier = %identifier,
            direction = ?direction,
            bytes = bytes,
            total = total,
            "Recorded transfer"
        );
        Ok(total)
    }

    /// Correct upload accounting once the real body size is known.
    ///
    /// Only the amount by which `actual` exceeds `declared` is added; counters
    /// are never decremented.
    pub fn settle_upload(
        &self,
        identifier: &Identifier,
        declared: u64,
        actual: u64,
    ) -> Result<u64, CapacityExceeded> {
        let shortfall = actual.saturating_sub(declared);
        if shortfall == 0 {
            let key = CounterKey::new(identifier.clone(), WindowKind::BytesIn);
            return Ok(self.counters.peek(&key, self.clock.now()));
        }
        self.record_transfer(identifier, Direction::Upload, shortfall)
    }
}
