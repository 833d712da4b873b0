//! Agent registry (§4.K): authoritative per-agent state machine with
//! optimistic-concurrency generation counters and a non-blocking
//! heartbeat buffer.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::error::{NexusError, NexusResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AgentState {
    Unknown,
    Connected,
    Idle,
    Suspended,
}

impl AgentState {
    fn name(&self) -> &'static str {
        match self {
            AgentState::Unknown => "UNKNOWN",
            AgentState::Connected => "CONNECTED",
            AgentState::Idle => "IDLE",
            AgentState::Suspended => "SUSPENDED",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentRecord {
    pub agent_id: String,
    pub owner_id: String,
    pub zone_id: Option<String>,
    pub name: Option<String>,
    pub state: AgentState,
    pub generation: u64,
    pub last_heartbeat: Option<u64>,
    pub created_at: u64,
    pub updated_at: u64,
}

fn now() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0)
}

/// Whether `from -> to` is an allowed transition, and whether it bumps
/// the generation counter (§4.K state diagram).
fn transition_rule(from: AgentState, to: AgentState) -> Option<bool> {
    use AgentState::*;
    match (from, to) {
        (Unknown, Connected) => Some(true),
        (Connected, Idle) => Some(false),
        (Idle, Connected) => Some(true),
        (Connected, Suspended) => Some(false),
        (Suspended, Connected) => Some(true),
        _ => None,
    }
}

struct Row {
    record: Mutex<AgentRecord>,
}

/// Per-agent record store plus an in-memory heartbeat buffer flushed
/// in batch on a configurable interval (§4.K).
pub struct AgentRegistry {
    rows: DashMap<String, Row>,
    heartbeat_buffer: Mutex<HashMap<String, u64>>,
}

impl Default for AgentRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self { rows: DashMap::new(), heartbeat_buffer: Mutex::new(HashMap::new()) }
    }

    /// §4.K `register`.
    pub fn register(
        &self,
        agent_id: impl Into<String>,
        owner_id: impl Into<String>,
        zone_id: Option<String>,
        name: Option<String>,
    ) -> AgentRecord {
        let agent_id = agent_id.into();
        let t = now();
        let record = AgentRecord {
            agent_id: agent_id.clone(),
            owner_id: owner_id.into(),
            zone_id,
            name,
            state: AgentState::Unknown,
            generation: 0,
            last_heartbeat: None,
            created_at: t,
            updated_at: t,
        };
        self.rows.insert(agent_id, Row { record: Mutex::new(record.clone()) });
        record
    }

    /// §4.K `get`.
    pub fn get(&self, agent_id: &str) -> Option<AgentRecord> {
        self.rows.get(agent_id).map(|r| r.record.lock().unwrap().clone())
    }

    /// §4.K `transition`: row-level lock, optimistic-concurrency
    /// generation check.
    pub fn transition(&self, agent_id: &str, target: AgentState, expected_generation: u64) -> NexusResult<AgentRecord> {
        let row = self
            .rows
            .get(agent_id)
            .ok_or_else(|| NexusError::NotFound(format!("agent {agent_id} not registered")))?;
        let mut record = row.record.lock().unwrap();

        if record.generation != expected_generation {
            return Err(NexusError::StaleSession {
                agent_id: agent_id.to_string(),
                reason: format!(
                    "expected_generation {expected_generation} does not match current generation {}",
                    record.generation
                ),
            });
        }

        let bumps_generation = transition_rule(record.state, target).ok_or_else(|| NexusError::InvalidTransition {
            from: record.state.name().to_string(),
            to: target.name().to_string(),
        })?;

        record.state = target;
        if bumps_generation {
            record.generation += 1;
        }
        record.updated_at = now();
        Ok(record.clone())
    }

    /// §4.K `heartbeat`: O(1) append into the in-memory buffer.
    pub fn heartbeat(&self, agent_id: &str) {
        self.heartbeat_buffer.lock().unwrap().insert(agent_id.to_string(), now());
    }

    /// §4.K `flush_heartbeats`: atomic batch update; returns the
    /// number of agents flushed.
    pub fn flush_heartbeats(&self) -> usize {
        let buffered: HashMap<String, u64> = std::mem::take(&mut *self.heartbeat_buffer.lock().unwrap());
        let mut flushed = 0;
        for (agent_id, ts) in buffered {
            if let Some(row) = self.rows.get(&agent_id) {
                let mut record = row.record.lock().unwrap();
                record.last_heartbeat = Some(ts);
                flushed += 1;
            }
        }
        flushed
    }

    /// §4.K `list_by_zone`.
    pub fn list_by_zone(&self, zone: &str, state: Option<AgentState>) -> Vec<AgentRecord> {
        self.rows
            .iter()
            .filter_map(|r| {
                let record = r.record.lock().unwrap();
                let zone_matches = record.zone_id.as_deref() == Some(zone);
                let state_matches = state.map_or(true, |s| record.state == s);
                (zone_matches && state_matches).then(|| record.clone())
            })
            .collect()
    }

    /// §4.K `detect_stale`.
    pub fn detect_stale(&self, threshold_seconds: u64) -> Vec<AgentRecord> {
        let now = now();
        self.rows
            .iter()
            .filter_map(|r| {
                let record = r.record.lock().unwrap();
                let last = record.last_heartbeat.unwrap_or(record.created_at);
                (now.saturating_sub(last) >= threshold_seconds).then(|| record.clone())
            })
            .collect()
    }

    /// §4.K `unregister`.
    pub fn unregister(&self, agent_id: &str) -> bool {
        self.heartbeat_buffer.lock().unwrap().remove(agent_id);
        self.rows.remove(agent_id).is_some()
    }
}

/// §4.K / §4.L "Stale-session detection": validates that a session's
/// generation still matches the authoritative record. Skipped when the
/// subject is not an agent or no registry is configured.
pub fn check_stale_session(
    registry: Option<&AgentRegistry>,
    subject_type: &str,
    agent_id: Option<&str>,
    session_generation: Option<u64>,
) -> NexusResult<()> {
    let Some(registry) = registry else { return Ok(()) };
    if subject_type != "agent" {
        return Ok(());
    }
    let Some(session_generation) = session_generation else { return Ok(()) };
    let Some(agent_id) = agent_id else { return Ok(()) };

    match registry.get(agent_id) {
        None => Err(NexusError::StaleSession {
            agent_id: agent_id.to_string(),
            reason: "agent no longer exists".to_string(),
        }),
        Some(record) if record.generation != session_generation => Err(NexusError::StaleSession {
            agent_id: agent_id.to_string(),
            reason: format!("session generation {session_generation} is stale (current: {})", record.generation),
        }),
        Some(_) => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_starts_unknown_generation_zero() {
        let registry = AgentRegistry::new();
        let record = registry.register("alice,bot1", "alice", None, None);
        assert_eq!(record.state, AgentState::Unknown);
        assert_eq!(record.generation, 0);
    }

    #[test]
    fn connect_bumps_generation_idle_does_not() {
        let registry = AgentRegistry::new();
        registry.register("a1", "alice", None, None);
        let connected = registry.transition("a1", AgentState::Connected, 0).unwrap();
        assert_eq!(connected.generation, 1);
        let idle = registry.transition("a1", AgentState::Idle, 1).unwrap();
        assert_eq!(idle.generation, 1);
        let reconnected = registry.transition("a1", AgentState::Connected, 1).unwrap();
        assert_eq!(reconnected.generation, 2);
    }

    #[test]
    fn generation_sequence_is_nondecreasing_and_strict_on_named_transitions() {
        let registry = AgentRegistry::new();
        registry.register("a1", "alice", None, None);
        let mut gens = Vec::new();
        gens.push(registry.transition("a1", AgentState::Connected, 0).unwrap().generation);
        gens.push(registry.transition("a1", AgentState::Idle, gens[0]).unwrap().generation);
        gens.push(registry.transition("a1", AgentState::Connected, gens[1]).unwrap().generation);
        gens.push(registry.transition("a1", AgentState::Suspended, gens[2]).unwrap().generation);
        gens.push(registry.transition("a1", AgentState::Connected, gens[3]).unwrap().generation);
        for w in gens.windows(2) {
            assert!(w[1] >= w[0]);
        }
    }

    #[test]
    fn invalid_transition_is_rejected() {
        let registry = AgentRegistry::new();
        registry.register("a1", "alice", None, None);
        let err = registry.transition("a1", AgentState::Suspended, 0).unwrap_err();
        assert!(matches!(err, NexusError::InvalidTransition { .. }));
    }

    #[test]
    fn mismatched_generation_is_stale() {
        let registry = AgentRegistry::new();
        registry.register("a1", "alice", None, None);
        registry.transition("a1", AgentState::Connected, 0).unwrap();
        let err = registry.transition("a1", AgentState::Idle, 0).unwrap_err();
        assert!(matches!(err, NexusError::StaleSession { .. }));
    }

    #[test]
    fn heartbeat_buffer_flushes_in_batch() {
        let registry = AgentRegistry::new();
        registry.register("a1", "alice", None, None);
        registry.register("a2", "alice", None, None);
        registry.heartbeat("a1");
        registry.heartbeat("a2");
        let flushed = registry.flush_heartbeats();
        assert_eq!(flushed, 2);
        assert!(registry.get("a1").unwrap().last_heartbeat.is_some());
    }

    #[test]
    fn stale_session_rejects_write_with_old_generation() {
        let registry = AgentRegistry::new();
        registry.register("alice,bot1", "alice", None, None);
        registry.transition("alice,bot1", AgentState::Connected, 0).unwrap(); // generation=1
        registry.transition("alice,bot1", AgentState::Idle, 1).unwrap();
        registry.transition("alice,bot1", AgentState::Connected, 1).unwrap(); // generation=2

        let err = check_stale_session(Some(&registry), "agent", Some("alice,bot1"), Some(1)).unwrap_err();
        assert!(matches!(err, NexusError::StaleSession { .. }));
    }

    #[test]
    fn stale_session_check_skipped_for_non_agent_subjects() {
        let registry = AgentRegistry::new();
        assert!(check_stale_session(Some(&registry), "user", Some("whatever"), Some(99)).is_ok());
    }

    #[test]
    fn unregister_removes_record() {
        let registry = AgentRegistry::new();
        registry.register("a1", "alice", None, None);
        assert!(registry.unregister("a1"));
        assert!(registry.get("a1").is_none());
        assert!(!registry.unregister("a1"));
    }
}
