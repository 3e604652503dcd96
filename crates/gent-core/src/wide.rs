// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use gent_types::{AgentEvent, EventEnvelope, Usage};

/// One structured telemetry record per turn, folded from the event stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WideEvent {
    pub session_id: String,
    pub branch_id: String,
    pub turn_index: u64,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    /// Provider streams chained into this turn (1 + one per tool round).
    pub streams: u32,
    pub text_chunks: u32,
    pub tool_calls: u32,
    pub tool_errors: u32,
    pub compactions: u32,
    pub usage: Usage,
    pub interrupted: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Machine states traversed, in order.
    pub states: Vec<String>,
}

/// Folds envelopes into per-turn [`WideEvent`]s.  A turn opens at its first
/// `StreamStarted` and closes on `TurnCompleted`, an interrupted
/// `StreamEnded`, or `ErrorOccurred`.
#[derive(Default)]
pub struct WideEventAggregator {
    current: Option<WideEvent>,
    finished: Vec<WideEvent>,
    turns_seen: u64,
}

impl WideEventAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn observe(&mut self, envelope: &EventEnvelope) {
        match &envelope.event {
            AgentEvent::StreamStarted {
                session_id,
                branch_id,
                ..
            } => {
                if self.current.is_none() {
                    self.turns_seen += 1;
                    self.current = Some(WideEvent {
                        session_id: session_id.clone(),
                        branch_id: branch_id.clone(),
                        turn_index: self.turns_seen,
                        started_at: envelope.created_at,
                        duration_ms: None,
                        streams: 0,
                        text_chunks: 0,
                        tool_calls: 0,
                        tool_errors: 0,
                        compactions: 0,
                        usage: Usage::default(),
                        interrupted: false,
                        error: None,
                        states: Vec::new(),
                    });
                }
                if let Some(turn) = &mut self.current {
                    turn.streams += 1;
                }
            }
            AgentEvent::StreamChunk { .. } => {
                if let Some(turn) = &mut self.current {
                    turn.text_chunks += 1;
                }
            }
            AgentEvent::ToolCallStarted { .. } => {
                if let Some(turn) = &mut self.current {
                    turn.tool_calls += 1;
                }
            }
            AgentEvent::ToolCallCompleted { is_error, .. } => {
                if let Some(turn) = &mut self.current {
                    if *is_error {
                        turn.tool_errors += 1;
                    }
                }
            }
            AgentEvent::CompactionCompleted { .. } => {
                if let Some(turn) = &mut self.current {
                    turn.compactions += 1;
                }
            }
            AgentEvent::MachineInspected { state, .. } => {
                if let Some(turn) = &mut self.current {
                    turn.states.push(state.clone());
                }
            }
            AgentEvent::StreamEnded {
                usage, interrupted, ..
            } => {
                if let Some(turn) = &mut self.current {
                    if let Some(usage) = usage {
                        turn.usage.input_tokens += usage.input_tokens;
                        turn.usage.output_tokens += usage.output_tokens;
                    }
                    if *interrupted {
                        turn.interrupted = true;
                        self.close(envelope.created_at);
                    }
                }
            }
            AgentEvent::TurnCompleted { duration_ms, .. } => {
                if let Some(turn) = &mut self.current {
                    turn.duration_ms = Some(*duration_ms);
                    self.close(envelope.created_at);
                }
            }
            AgentEvent::ErrorOccurred { message, .. } => {
                if let Some(turn) = &mut self.current {
                    turn.error = Some(message.clone());
                    self.close(envelope.created_at);
                }
            }
            _ => {}
        }
    }

    fn close(&mut self, at: DateTime<Utc>) {
        if let Some(mut turn) = self.current.take() {
            if turn.duration_ms.is_none() {
                let elapsed = at.signed_duration_since(turn.started_at);
                turn.duration_ms = Some(elapsed.num_milliseconds().max(0) as u64);
            }
            self.finished.push(turn);
        }
    }

    /// Completed turns so far.
    pub fn finished(&self) -> &[WideEvent] {
        &self.finished
    }

    /// Fold a whole event history at once.
    pub fn fold<'a>(envelopes: impl IntoIterator<Item = &'a EventEnvelope>) -> Vec<WideEvent> {
        let mut agg = Self::new();
        for envelope in envelopes {
            agg.observe(envelope);
        }
        agg.finished
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use serde_json::json;

    use gent_types::ToolResultOutput;

    use super::*;

    fn env(id: u64, event: AgentEvent) -> EventEnvelope {
        EventEnvelope {
            id,
            event,
            created_at: Utc::now(),
        }
    }

    fn stream_started(id: u64) -> EventEnvelope {
        env(
            id,
            AgentEvent::StreamStarted {
                session_id: "s".into(),
                branch_id: "b".into(),
                model: "m".into(),
            },
        )
    }

    #[test]
    fn simple_turn_folds_into_one_record() {
        let events = vec![
            stream_started(1),
            env(
                2,
                AgentEvent::StreamChunk {
                    session_id: "s".into(),
                    branch_id: "b".into(),
                    delta: "hi".into(),
                },
            ),
            env(
                3,
                AgentEvent::StreamEnded {
                    session_id: "s".into(),
                    branch_id: "b".into(),
                    usage: Some(Usage {
                        input_tokens: 10,
                        output_tokens: 5,
                    }),
                    interrupted: false,
                },
            ),
            env(
                4,
                AgentEvent::TurnCompleted {
                    session_id: "s".into(),
                    branch_id: "b".into(),
                    duration_ms: 120,
                },
            ),
        ];
        let turns = WideEventAggregator::fold(events.iter());
        assert_eq!(turns.len(), 1);
        assert_eq!(turns[0].streams, 1);
        assert_eq!(turns[0].text_chunks, 1);
        assert_eq!(turns[0].duration_ms, Some(120));
        assert_eq!(turns[0].usage.input_tokens, 10);
        assert!(!turns[0].interrupted);
    }

    #[test]
    fn tool_rounds_stay_in_one_turn() {
        let mut agg = WideEventAggregator::new();
        agg.observe(&stream_started(1));
        agg.observe(&env(
            2,
            AgentEvent::ToolCallStarted {
                session_id: "s".into(),
                branch_id: "b".into(),
                tool_call_id: "t1".into(),
                tool_name: "read_file".into(),
                input: json!({}),
            },
        ));
        agg.observe(&env(
            3,
            AgentEvent::ToolCallCompleted {
                session_id: "s".into(),
                branch_id: "b".into(),
                tool_call_id: "t1".into(),
                tool_name: "read_file".into(),
                is_error: true,
                summary: "boom".into(),
                output: ToolResultOutput::error("boom"),
            },
        ));
        agg.observe(&stream_started(4));
        agg.observe(&env(
            5,
            AgentEvent::TurnCompleted {
                session_id: "s".into(),
                branch_id: "b".into(),
                duration_ms: 300,
            },
        ));
        assert_eq!(agg.finished().len(), 1);
        let turn = &agg.finished()[0];
        assert_eq!(turn.streams, 2);
        assert_eq!(turn.tool_calls, 1);
        assert_eq!(turn.tool_errors, 1);
    }

    #[test]
    fn interrupted_stream_closes_the_turn() {
        let mut agg = WideEventAggregator::new();
        agg.observe(&stream_started(1));
        agg.observe(&env(
            2,
            AgentEvent::StreamEnded {
                session_id: "s".into(),
                branch_id: "b".into(),
                usage: None,
                interrupted: true,
            },
        ));
        assert_eq!(agg.finished().len(), 1);
        assert!(agg.finished()[0].interrupted);
    }

    #[test]
    fn consecutive_turns_get_increasing_indices() {
        let mut agg = WideEventAggregator::new();
        for i in 0..3u64 {
            agg.observe(&stream_started(i * 2 + 1));
            agg.observe(&env(
                i * 2 + 2,
                AgentEvent::TurnCompleted {
                    session_id: "s".into(),
                    branch_id: "b".into(),
                    duration_ms: 10,
                },
            ));
        }
        let indices: Vec<u64> = agg.finished().iter().map(|t| t.turn_index).collect();
        assert_eq!(indices, vec![1, 2, 3]);
    }

    #[test]
    fn machine_states_are_recorded_in_order() {
        let mut agg = WideEventAggregator::new();
        agg.observe(&stream_started(1));
        for state in ["streaming", "dispatching", "idle"] {
            agg.observe(&env(
                2,
                AgentEvent::MachineInspected {
                    session_id: "s".into(),
                    branch_id: "b".into(),
                    state: state.into(),
                },
            ));
        }
        agg.observe(&env(
            3,
            AgentEvent::TurnCompleted {
                session_id: "s".into(),
                branch_id: "b".into(),
                duration_ms: 1,
            },
        ));
        assert_eq!(
            agg.finished()[0].states,
            vec!["streaming", "dispatching", "idle"]
        );
    }
}
