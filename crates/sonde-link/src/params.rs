//! Parameter bulk-download and verified-write bookkeeping.
//!
//! [`ParamTable`] is a pure state machine: the IO loop feeds it decoded
//! PARAM_VALUE updates and silence-timeout ticks, consumers stage edits
//! through it, and it answers with [`ParamEvent`] outcomes. A session is
//! discarded and rebuilt on every refresh.

use std::collections::HashMap;
use std::time::Duration;

use mavlink::common::MavParamType;
use tokio::time::Instant;
use serde::{Deserialize, Serialize};

/// Float comparison tolerance for write verification.
pub const WRITE_TOLERANCE: f32 = 1e-6;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParamKind {
    Uint8,
    Int8,
    Uint16,
    Int16,
    Uint32,
    Int32,
    Uint64,
    Int64,
    Real32,
    Real64,
}

impl ParamKind {
    pub fn from_mav(param_type: MavParamType) -> Self {
        match param_type {
            MavParamType::MAV_PARAM_TYPE_UINT8 => ParamKind::Uint8,
            MavParamType::MAV_PARAM_TYPE_INT8 => ParamKind::Int8,
            MavParamType::MAV_PARAM_TYPE_UINT16 => ParamKind::Uint16,
            MavParamType::MAV_PARAM_TYPE_INT16 => ParamKind::Int16,
            MavParamType::MAV_PARAM_TYPE_UINT32 => ParamKind::Uint32,
            MavParamType::MAV_PARAM_TYPE_INT32 => ParamKind::Int32,
            MavParamType::MAV_PARAM_TYPE_UINT64 => ParamKind::Uint64,
            MavParamType::MAV_PARAM_TYPE_INT64 => ParamKind::Int64,
            MavParamType::MAV_PARAM_TYPE_REAL32 => ParamKind::Real32,
            MavParamType::MAV_PARAM_TYPE_REAL64 => ParamKind::Real64,
        }
    }

    pub fn to_mav(self) -> MavParamType {
        match self {
            ParamKind::Uint8 => MavParamType::MAV_PARAM_TYPE_UINT8,
            ParamKind::Int8 => MavParamType::MAV_PARAM_TYPE_INT8,
            ParamKind::Uint16 => MavParamType::MAV_PARAM_TYPE_UINT16,
            ParamKind::Int16 => MavParamType::MAV_PARAM_TYPE_INT16,
            ParamKind::Uint32 => MavParamType::MAV_PARAM_TYPE_UINT32,
            ParamKind::Int32 => MavParamType::MAV_PARAM_TYPE_INT32,
            ParamKind::Uint64 => MavParamType::MAV_PARAM_TYPE_UINT64,
            ParamKind::Int64 => MavParamType::MAV_PARAM_TYPE_INT64,
            ParamKind::Real32 => MavParamType::MAV_PARAM_TYPE_REAL32,
            ParamKind::Real64 => MavParamType::MAV_PARAM_TYPE_REAL64,
        }
    }

    pub fn is_integer(self) -> bool {
        !matches!(self, ParamKind::Real32 | ParamKind::Real64)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Param {
    pub name: String,
    pub value: f32,
    pub kind: ParamKind,
    pub index: u16,
}

/// Decoded PARAM_VALUE message (name already null-stripped).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamUpdate {
    pub name: String,
    pub value: f32,
    pub kind: ParamKind,
    pub index: u16,
    pub count: u16,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ParamEvent {
    Received(ParamUpdate),
    /// Download finished; `complete` is false when the silence watchdog
    /// closed it with gaps. Partial results are usable, not an error.
    DownloadComplete {
        received: u16,
        declared: u16,
        complete: bool,
    },
    WriteConfirmed {
        name: String,
        value: f32,
    },
    WriteFailed {
        name: String,
        requested: f32,
        reported: f32,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DownloadPhase {
    #[default]
    Idle,
    Loading,
    Complete,
    TimedOut,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParamProgress {
    pub phase: DownloadPhase,
    pub received: u16,
    pub declared: u16,
}

#[derive(Debug, Default)]
pub struct ParamTable {
    params: HashMap<String, Param>,
    originals: HashMap<String, f32>,
    pending: HashMap<String, f32>,
    declared_total: u16,
    phase: DownloadPhase,
    last_rx: Option<Instant>,
}

impl ParamTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a fresh download session, discarding all previous state.
    pub fn begin_download(&mut self) {
        *self = ParamTable {
            phase: DownloadPhase::Loading,
            last_rx: Some(Instant::now()),
            ..ParamTable::default()
        };
    }

    /// Fold in one PARAM_VALUE. Returns completion and write-verification
    /// outcomes triggered by this value.
    pub fn on_param_value(&mut self, update: &ParamUpdate) -> Vec<ParamEvent> {
        let mut outcomes = Vec::new();

        self.declared_total = update.count;
        self.params.insert(
            update.name.clone(),
            Param {
                name: update.name.clone(),
                value: update.value,
                kind: update.kind,
                index: update.index,
            },
        );
        self.originals
            .entry(update.name.clone())
            .or_insert(update.value);

        if self.phase == DownloadPhase::Loading {
            self.last_rx = Some(Instant::now());
            if self.declared_total > 0 && self.received() >= self.declared_total {
                self.phase = DownloadPhase::Complete;
                outcomes.push(ParamEvent::DownloadComplete {
                    received: self.received(),
                    declared: self.declared_total,
                    complete: true,
                });
            }
        } else if let Some(&requested) = self.pending.get(&update.name) {
            // Write verification: the vehicle echoes the new value back.
            if values_match(requested, update.value, update.kind) {
                self.pending.remove(&update.name);
                self.originals.insert(update.name.clone(), update.value);
                outcomes.push(ParamEvent::WriteConfirmed {
                    name: update.name.clone(),
                    value: update.value,
                });
            } else {
                outcomes.push(ParamEvent::WriteFailed {
                    name: update.name.clone(),
                    requested,
                    reported: update.value,
                });
            }
        }

        outcomes
    }

    /// Silence watchdog: during a download, `timeout` without a value
    /// closes the session with whatever arrived.
    pub fn check_silence(&mut self, timeout: Duration) -> Option<ParamEvent> {
        if self.phase != DownloadPhase::Loading {
            return None;
        }
        let stalled = self
            .last_rx
            .map(|at| at.elapsed() >= timeout)
            .unwrap_or(false);
        if !stalled {
            return None;
        }
        self.phase = DownloadPhase::TimedOut;
        Some(ParamEvent::DownloadComplete {
            received: self.received(),
            declared: self.declared_total,
            complete: false,
        })
    }

    /// Stage a write intention. Staging back to the original value
    /// unstages. Nothing is transmitted until the caller commits.
    pub fn stage(&mut self, name: &str, value: f32) {
        let original = self
            .originals
            .get(name)
            .or_else(|| self.params.get(name).map(|p| &p.value))
            .copied();
        match original {
            Some(orig) if (value - orig).abs() <= WRITE_TOLERANCE => {
                self.pending.remove(name);
            }
            _ => {
                self.pending.insert(name.to_string(), value);
            }
        }
    }

    /// Staged edits ready to transmit: (name, value, wire kind).
    pub fn staged(&self) -> Vec<(String, f32, ParamKind)> {
        let mut staged: Vec<_> = self
            .pending
            .iter()
            .map(|(name, &value)| {
                let kind = self
                    .params
                    .get(name)
                    .map(|p| p.kind)
                    .unwrap_or(ParamKind::Real32);
                (name.clone(), value, kind)
            })
            .collect();
        staged.sort_by(|a, b| a.0.cmp(&b.0));
        staged
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn get(&self, name: &str) -> Option<&Param> {
        self.params.get(name)
    }

    pub fn original(&self, name: &str) -> Option<f32> {
        self.originals.get(name).copied()
    }

    pub fn received(&self) -> u16 {
        self.params.len().min(u16::MAX as usize) as u16
    }

    pub fn progress(&self) -> ParamProgress {
        ParamProgress {
            phase: self.phase,
            received: self.received(),
            declared: self.declared_total,
        }
    }
}

fn values_match(requested: f32, reported: f32, kind: ParamKind) -> bool {
    if kind.is_integer() {
        requested == reported
    } else {
        (requested - reported).abs() < WRITE_TOLERANCE
    }
}
