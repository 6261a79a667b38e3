//! Rate limiting logic and state management.

pub mod clock;
pub mod counter;
pub mod headers;
pub mod identity;
pub mod limiter;
pub mod reload;
pub mod rules;
pub mod snapshot;

pub use clock::{Clock, ManualClock, SystemClock};
pub use counter::{CapacityExceeded, CounterKey, CounterStore, WindowKind, WindowReading};
pub use headers::rate_limit_headers;
pub use identity::{AuthMethod, Identifier, Identity, IdentityExtractor};
pub use limiter::{
    Decision, Denial, DenyReason, Direction, RateLimiter, RequestMeta, Verdict, WindowStatus,
};
pub use reload::{ConfigSource, FileSource, ReloadController, ReloadOutcome, ReloadTrigger};
pub use rules::{Limit, LimitSet, ServiceAccounts, TierConfig, TierName, DEFAULT_TIER};
pub use snapshot::{ConfigSnapshot, ConfigStore, Version};
