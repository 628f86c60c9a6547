//! Delegation stack
//!
//! Frames are owned by the stack, not by the agents: a child only knows its
//! parent through [`ParentLink`](super::ParentLink), parents never point at
//! children. Only the top frame is ever driven.

use sdk::errors::EngineError;
use sdk::event::EventId;

/// One active agent in the delegation chain
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub agent: String,
    /// `Delegate` action that created the frame; `None` for the root
    pub delegate_id: Option<EventId>,
    pub depth: usize,
}

/// LIFO chain of active agents, rooted at the session's root agent
#[derive(Debug, Clone)]
pub struct DelegationStack {
    frames: Vec<Frame>,
}

impl DelegationStack {
    pub fn new(root_agent: impl Into<String>) -> Self {
        Self {
            frames: vec![Frame {
                agent: root_agent.into(),
                delegate_id: None,
                depth: 0,
            }],
        }
    }

    /// Pushes a child frame and returns its depth
    pub fn push(&mut self, agent: impl Into<String>, delegate_id: EventId) -> usize {
        let depth = self.frames.len();
        self.frames.push(Frame {
            agent: agent.into(),
            delegate_id: Some(delegate_id),
            depth,
        });
        depth
    }

    /// Pops the frame created by `delegate_id`.
    ///
    /// # Errors
    ///
    /// Fails if that frame is not on top: a parent may only resume once its
    /// immediate child has finished.
    pub fn pop(&mut self, delegate_id: EventId) -> Result<Frame, EngineError> {
        match self.frames.last() {
            Some(top) if top.delegate_id == Some(delegate_id) => self
                .frames
                .pop()
                .ok_or_else(|| EngineError::InvalidEvent("delegation stack is empty".to_string())),
            Some(top) => Err(EngineError::InvalidEvent(format!(
                "delegation {} is not on top of the stack (top is {:?} of '{}')",
                delegate_id, top.delegate_id, top.agent
            ))),
            None => Err(EngineError::InvalidEvent(
                "delegation stack is empty".to_string(),
            )),
        }
    }

    pub fn top(&self) -> Option<&Frame> {
        self.frames.last()
    }

    /// Whether the frame created by `delegate_id` (`None` for the root) is
    /// the one being driven
    pub fn is_top(&self, delegate_id: Option<EventId>) -> bool {
        self.top().map_or(false, |top| top.delegate_id == delegate_id)
    }

    pub fn depth(&self) -> usize {
        self.frames.len().saturating_sub(1)
    }

    pub fn frames(&self) -> &[Frame] {
        &self.frames
    }
}
