use crate::types::HostResult;
use serde::Serialize;
use std::fmt;

/// Stage a host task is in, reported through [`ScanEvent::Progress`].
#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    DetectingHost,
    ResolvingHostname,
    ScanningPorts,
    Classifying,
}

impl Phase {
    pub const COUNT: u8 = 4;

    /// 1-based position within a host's task.
    pub fn step(self) -> u8 {
        match self {
            Phase::DetectingHost => 1,
            Phase::ResolvingHostname => 2,
            Phase::ScanningPorts => 3,
            Phase::Classifying => 4,
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Phase::DetectingHost => "Detecting host",
            Phase::ResolvingHostname => "Resolving hostname",
            Phase::ScanningPorts => "Scanning ports",
            Phase::Classifying => "Classifying",
        };
        f.write_str(label)
    }
}

/// Notifications delivered to a session's consumer, in the order they were emitted.
#[derive(Serialize, Debug, Clone)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ScanEvent {
    Progress {
        ip: String,
        phase: Phase,
        step: u8,
        total_steps: u8,
    },
    /// Port-level progress for one host; throttled, monotonic, final update always sent.
    PortProgress {
        ip: String,
        scanned: usize,
        total: usize,
    },
    HostResult(Box<HostResult>),
    /// A host task failed; its result is still reported as a down host.
    ScanError {
        ip: String,
        message: String,
    },
    /// Last event of every session.
    Finished {
        completed: usize,
        total: usize,
        cancelled: bool,
    },
}

impl ScanEvent {
    pub fn progress(ip: impl Into<String>, phase: Phase) -> Self {
        ScanEvent::Progress {
            ip: ip.into(),
            phase,
            step: phase.step(),
            total_steps: Phase::COUNT,
        }
    }
}
