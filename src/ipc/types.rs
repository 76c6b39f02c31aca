use std::path::PathBuf;
use std::sync::Arc;

use serde::Deserialize;

use crate::calc::{PerformancePolicy, RiskPolicy};
use crate::clock::{Clock, FixedClock};
use crate::codec::ContactCodec;
use crate::config::AttendanceConfig;
use crate::notify::Notifier;
use crate::store::Store;

#[derive(Debug, Deserialize, Clone)]
pub struct Request {
    pub id: String,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

pub struct AppState {
    pub workspace: Option<PathBuf>,
    pub store: Option<Store>,
    pub clock: Arc<dyn Clock>,
    /// Set when the daemon runs on a replay clock; enables `clock.*`.
    pub fixed_clock: Option<Arc<FixedClock>>,
    pub codec: Box<dyn ContactCodec>,
    pub notifier: Box<dyn Notifier>,
    pub risk: RiskPolicy,
    pub performance: PerformancePolicy,
    pub config: AttendanceConfig,
}

impl AppState {
    pub fn new(
        config: AttendanceConfig,
        clock: Arc<dyn Clock>,
        codec: Box<dyn ContactCodec>,
        notifier: Box<dyn Notifier>,
    ) -> Self {
        Self {
            workspace: None,
            store: None,
            clock,
            fixed_clock: None,
            codec,
            notifier,
            risk: config.policy.risk(),
            performance: config.policy.performance.clone(),
            config,
        }
    }

    pub fn with_fixed_clock(mut self, clock: Arc<FixedClock>) -> Self {
        self.clock = clock.clone() as Arc<dyn Clock>;
        self.fixed_clock = Some(clock);
        self
    }
}
