use tally_statsd::CounterMetric;

/// Counter metrics of the supervisor.
pub enum SupervisorCounters {
    /// Number of workers started after a crash.
    WorkerRespawns,
}

impl CounterMetric for SupervisorCounters {
    fn name(&self) -> &'static str {
        match *self {
            SupervisorCounters::WorkerRespawns => "supervisor.respawns",
        }
    }
}
