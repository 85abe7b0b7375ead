//! In-memory audio graph — a headless [`AudioBackend`].
//!
//! Keeps the bookkeeping a synthesis library would (nodes, connections,
//! which notes each voice bank is sounding) without producing audio. Native
//! hosts use it to drive the instrument offline; it also records every call
//! so the instrument's behaviour can be inspected.
//!
//! In this graph a node feeds at most one downstream node: connecting a node
//! again replaces its previous output. Tone.js nodes fan out instead (a
//! second `connect` adds an edge); `ToneBackend::connect_serial` disconnects
//! each hop before connecting it so both backends end up with the same
//! serial path.

use log::warn;

use crate::backend::AudioBackend;
use crate::config::{SynthOptions, VoiceKind};
use crate::error::{RoutingError, VoiceError};
use crate::note::note_to_midi;

/// Node identifier, an index into the graph's arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(u32);

/// A voice bank is a node that can also sound notes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BankId(NodeId);

impl BankId {
    pub fn node(self) -> NodeId {
        self.0
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum NodeKind {
    Master,
    VoiceBank {
        polyphony: usize,
        voice: VoiceKind,
        options: SynthOptions,
    },
    PanVol {
        pan: f64,
        volume: f64,
    },
    Effect {
        name: String,
    },
}

/// A backend call, in the order it was made.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    CreateBank { bank: BankId, polyphony: usize },
    Attack { bank: BankId, note: String },
    Release { bank: BankId, note: String },
    /// Oldest voice reclaimed because the bank was full.
    Steal { bank: BankId, note: String },
    DisconnectAll { bank: BankId },
    CreatePre { stage: NodeId },
    Connect { bank: BankId, path: Vec<NodeId>, sink: NodeId },
    DisposeStage { stage: NodeId },
    DisposeBank { bank: BankId },
}

#[derive(Debug)]
struct Node {
    kind: NodeKind,
    live: bool,
    output: Option<NodeId>,
    /// Sounding notes, oldest first. Only used by voice banks.
    voices: Vec<String>,
}

pub struct GraphBackend {
    nodes: Vec<Node>,
    master: NodeId,
    log: Vec<Command>,
    fail_next_connect: bool,
}

impl GraphBackend {
    /// Create a graph with just a master output node.
    pub fn new() -> Self {
        let mut graph = GraphBackend {
            nodes: Vec::new(),
            master: NodeId(0),
            log: Vec::new(),
            fail_next_connect: false,
        };
        graph.master = graph.add_node(NodeKind::Master);
        graph
    }

    fn add_node(&mut self, kind: NodeKind) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(Node {
            kind,
            live: true,
            output: None,
            voices: Vec::new(),
        });
        id
    }

    /// Add an effect stage the host can put in a chain.
    pub fn add_effect(&mut self, name: &str) -> NodeId {
        self.add_node(NodeKind::Effect {
            name: name.to_string(),
        })
    }

    fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id.0 as usize).filter(|n| n.live)
    }

    fn node_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        self.nodes.get_mut(id.0 as usize).filter(|n| n.live)
    }

    /// Kind of a live node.
    pub fn kind(&self, id: NodeId) -> Option<&NodeKind> {
        self.node(id).map(|n| &n.kind)
    }

    pub fn is_live(&self, id: NodeId) -> bool {
        self.node(id).is_some()
    }

    /// Number of live nodes matching `pred`.
    pub fn count_live(&self, pred: impl Fn(&NodeKind) -> bool) -> usize {
        self.nodes.iter().filter(|n| n.live && pred(&n.kind)).count()
    }

    /// Nodes downstream of `bank`, in signal order.
    pub fn path_from(&self, bank: BankId) -> Vec<NodeId> {
        let mut path = Vec::new();
        let mut cursor = self.node(bank.0).and_then(|n| n.output);
        while let Some(id) = cursor {
            if path.contains(&id) {
                break;
            }
            path.push(id);
            cursor = self.node(id).and_then(|n| n.output);
        }
        path
    }

    /// Notes the bank is sounding, oldest first.
    pub fn sounding(&self, bank: BankId) -> Vec<String> {
        self.node(bank.0).map(|n| n.voices.clone()).unwrap_or_default()
    }

    pub fn log(&self) -> &[Command] {
        &self.log
    }

    pub fn clear_log(&mut self) {
        self.log.clear();
    }

    /// Number of logged commands matching `pred`.
    pub fn count(&self, pred: impl Fn(&Command) -> bool) -> usize {
        self.log.iter().filter(|c| pred(c)).count()
    }

    /// Make the next `connect_serial` fail, as a broken audio context would.
    pub fn fail_next_connect(&mut self) {
        self.fail_next_connect = true;
    }

    fn bank_node_mut(&mut self, bank: BankId, note: &str) -> Result<&mut Node, VoiceError> {
        self.node_mut(bank.0).ok_or_else(|| VoiceError::Backend {
            note: note.to_string(),
            reason: "voice bank has been disposed".to_string(),
        })
    }

    fn unlink(&mut self, id: NodeId) {
        for node in self.nodes.iter_mut() {
            if node.output == Some(id) {
                node.output = None;
            }
        }
        if let Some(node) = self.nodes.get_mut(id.0 as usize) {
            node.output = None;
            node.live = false;
            node.voices.clear();
        }
    }
}

impl Default for GraphBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioBackend for GraphBackend {
    type Bank = BankId;
    type Stage = NodeId;

    fn create_voice_bank(
        &mut self,
        polyphony: usize,
        voice: VoiceKind,
        options: &SynthOptions,
    ) -> Result<BankId, RoutingError> {
        if polyphony == 0 {
            return Err(RoutingError::VoiceBank {
                reason: "polyphony must be at least 1".to_string(),
            });
        }
        let bank = BankId(self.add_node(NodeKind::VoiceBank {
            polyphony,
            voice,
            options: options.clone(),
        }));
        self.log.push(Command::CreateBank { bank, polyphony });
        Ok(bank)
    }

    fn attack(&mut self, bank: &BankId, note: &str) -> Result<(), VoiceError> {
        if note_to_midi(note).is_none() {
            return Err(VoiceError::InvalidNote {
                note: note.to_string(),
            });
        }
        let bank = *bank;
        let node = self.bank_node_mut(bank, note)?;
        let polyphony = match node.kind {
            NodeKind::VoiceBank { polyphony, .. } => polyphony,
            _ => 1,
        };

        let mut stolen = None;
        if let Some(pos) = node.voices.iter().position(|v| v == note) {
            node.voices.remove(pos);
        } else if node.voices.len() >= polyphony {
            stolen = Some(node.voices.remove(0));
        }
        node.voices.push(note.to_string());

        if let Some(old) = stolen {
            warn!("voice bank full, stealing '{old}' for '{note}'");
            self.log.push(Command::Steal { bank, note: old });
        }
        self.log.push(Command::Attack {
            bank,
            note: note.to_string(),
        });
        Ok(())
    }

    fn release(&mut self, bank: &BankId, note: &str) -> Result<(), VoiceError> {
        let bank = *bank;
        let node = self.bank_node_mut(bank, note)?;
        let pos = node
            .voices
            .iter()
            .position(|v| v == note)
            .ok_or_else(|| VoiceError::UnknownNote {
                note: note.to_string(),
            })?;
        node.voices.remove(pos);
        self.log.push(Command::Release {
            bank,
            note: note.to_string(),
        });
        Ok(())
    }

    fn disconnect_all(&mut self, bank: &BankId) {
        if let Some(node) = self.node_mut(bank.0) {
            node.output = None;
        }
        self.log.push(Command::DisconnectAll { bank: *bank });
    }

    fn create_pre_stage(&mut self, pan: f64, volume: f64) -> Result<NodeId, RoutingError> {
        let stage = self.add_node(NodeKind::PanVol { pan, volume });
        self.log.push(Command::CreatePre { stage });
        Ok(stage)
    }

    fn master(&self) -> NodeId {
        self.master
    }

    fn validate_stage(&self, stage: &NodeId) -> bool {
        self.is_live(*stage)
    }

    fn connect_serial(
        &mut self,
        bank: &BankId,
        stages: &[NodeId],
        sink: &NodeId,
    ) -> Result<(), RoutingError> {
        if std::mem::take(&mut self.fail_next_connect) {
            return Err(RoutingError::ConnectFailed {
                reason: "audio context refused the connection".to_string(),
            });
        }

        let mut hops = Vec::with_capacity(stages.len() + 2);
        hops.push(bank.0);
        hops.extend_from_slice(stages);
        hops.push(*sink);
        if let Some(dead) = hops.iter().find(|id| !self.is_live(**id)) {
            return Err(RoutingError::ConnectFailed {
                reason: format!("node {} is not live", dead.0),
            });
        }

        for pair in hops.windows(2) {
            if let Some(node) = self.node_mut(pair[0]) {
                node.output = Some(pair[1]);
            }
        }
        self.log.push(Command::Connect {
            bank: *bank,
            path: stages.to_vec(),
            sink: *sink,
        });
        Ok(())
    }

    fn dispose_stage(&mut self, stage: NodeId) {
        if stage == self.master {
            return;
        }
        self.unlink(stage);
        self.log.push(Command::DisposeStage { stage });
    }

    fn dispose_bank(&mut self, bank: BankId) {
        self.unlink(bank.0);
        self.log.push(Command::DisposeBank { bank });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bank(graph: &mut GraphBackend, polyphony: usize) -> BankId {
        graph
            .create_voice_bank(polyphony, VoiceKind::Synth, &SynthOptions::default())
            .unwrap()
    }

    #[test]
    fn starts_with_master_only() {
        let graph = GraphBackend::new();
        assert_eq!(graph.kind(graph.master()), Some(&NodeKind::Master));
        assert_eq!(graph.count_live(|_| true), 1);
    }

    #[test]
    fn full_bank_steals_oldest_voice() {
        let mut graph = GraphBackend::new();
        let b = bank(&mut graph, 2);
        graph.attack(&b, "C4").unwrap();
        graph.attack(&b, "E4").unwrap();
        graph.attack(&b, "G4").unwrap();
        assert_eq!(graph.sounding(b), vec!["E4".to_string(), "G4".to_string()]);
        assert_eq!(graph.count(|c| matches!(c, Command::Steal { .. })), 1);
    }

    #[test]
    fn retrigger_does_not_take_a_second_voice() {
        let mut graph = GraphBackend::new();
        let b = bank(&mut graph, 2);
        graph.attack(&b, "C4").unwrap();
        graph.attack(&b, "E4").unwrap();
        graph.attack(&b, "C4").unwrap();
        assert_eq!(graph.sounding(b), vec!["E4".to_string(), "C4".to_string()]);
        assert_eq!(graph.count(|c| matches!(c, Command::Steal { .. })), 0);
    }

    #[test]
    fn reconnecting_a_stage_replaces_its_output() {
        let mut graph = GraphBackend::new();
        let b = bank(&mut graph, 1);
        let x = graph.add_effect("delay");
        let y = graph.add_effect("reverb");
        let master = graph.master();

        graph.connect_serial(&b, &[x, y], &master).unwrap();
        graph.disconnect_all(&b);
        graph.connect_serial(&b, &[y, x], &master).unwrap();
        assert_eq!(graph.path_from(b), vec![y, x, master]);
    }

    #[test]
    fn connect_to_dead_node_fails() {
        let mut graph = GraphBackend::new();
        let b = bank(&mut graph, 1);
        let x = graph.add_effect("delay");
        graph.dispose_stage(x);
        let master = graph.master();
        assert!(graph.connect_serial(&b, &[x], &master).is_err());
        assert!(graph.path_from(b).is_empty());
    }

    #[test]
    fn disposed_bank_rejects_notes() {
        let mut graph = GraphBackend::new();
        let b = bank(&mut graph, 1);
        graph.dispose_bank(b);
        assert!(matches!(
            graph.attack(&b, "C4"),
            Err(VoiceError::Backend { .. })
        ));
    }

    #[test]
    fn master_cannot_be_disposed() {
        let mut graph = GraphBackend::new();
        let master = graph.master();
        graph.dispose_stage(master);
        assert!(graph.is_live(master));
    }
}
