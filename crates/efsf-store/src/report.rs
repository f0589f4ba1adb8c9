use serde::Serialize;

/// Outcome of one reaper pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    /// Records moved to DESTROYED with method `EXPIRED`.
    pub destroyed: usize,
    /// Backend entries past expiry that no live store slot owns.
    pub orphans_purged: usize,
    pub failures: usize,
}

impl SweepReport {
    pub fn is_empty(&self) -> bool {
        self.destroyed == 0 && self.orphans_purged == 0 && self.failures == 0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CloseFailure {
    /// `None` for failures not tied to a record (reaper join, backend close).
    pub resource_id: Option<String>,
    pub error: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CloseReport {
    pub already_closed: bool,
    pub destroyed: usize,
    pub failures: Vec<CloseFailure>,
}

impl CloseReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoreStats {
    pub active_records: u64,
    pub certificates_issued: u64,
    pub attestation_enabled: bool,
    pub backend: &'static str,
    pub puts: u64,
    pub gets: u64,
    pub destroys: u64,
    pub expired: u64,
}
