//! End-of-run report.

use serde::Serialize;
use std::fmt;
use std::time::Duration;
use swarm_correlation::StatsSnapshot;

use crate::broker::BrokerSnapshot;
use crate::scenario::UserTally;

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub strategy: &'static str,
    pub users: usize,
    pub requests_per_user: usize,
    pub wall_time_ms: u64,
    pub outcomes: UserTally,
    pub broker: BrokerSnapshot,
    pub registry: StatsSnapshot,
}

impl RunReport {
    /// Completed outcomes per second of wall time.
    pub fn throughput(&self) -> f64 {
        if self.wall_time_ms == 0 {
            return 0.0;
        }
        self.outcomes.completed() as f64 * 1000.0 / self.wall_time_ms as f64
    }

    pub fn wall_time(&self) -> Duration {
        Duration::from_millis(self.wall_time_ms)
    }
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "=== swarm-sim ===")?;
        writeln!(
            f,
            "strategy {}  users {}  requests/user {}  wall {:?}  ({:.0} req/s)",
            self.strategy,
            self.users,
            self.requests_per_user,
            self.wall_time(),
            self.throughput()
        )?;
        writeln!(
            f,
            "outcomes  matched {}  timeout {}  cancelled {}  send errors {}",
            self.outcomes.matched,
            self.outcomes.timeouts,
            self.outcomes.cancelled,
            self.outcomes.send_errors
        )?;
        writeln!(
            f,
            "broker    received {}  replied {}  dropped {}",
            self.broker.received, self.broker.replied, self.broker.dropped
        )?;
        writeln!(
            f,
            "registry  registered {}  duplicates {}  orphans {} ({} malformed)",
            self.registry.registered,
            self.registry.duplicates,
            self.registry.orphaned,
            self.registry.malformed
        )?;
        write!(
            f,
            "latency   avg reply {:?}  max timeout lateness {:?}",
            self.outcomes.avg_latency(),
            Duration::from_micros(self.registry.max_lateness_us)
        )
    }
}
