//! Lifecycle of a data source

use crate::{error::RequestError, protocol::DndAction};

/// What a data source was used for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceUse {
    /// Set as the selection
    Selection,
    /// Used to start a drag-and-drop operation
    Drag,
}

/// State of a data source
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceState {
    /// Created, being filled with mime types and actions
    Preparing,
    /// Handed to the compositor
    Active(SourceUse),
    /// The user dropped, the transfer may still be running
    DropPerformed,
    /// The drop target finished the transfer
    Finished,
    /// The source was replaced or the operation was cancelled
    Cancelled,
}

impl SourceState {
    /// Whether the source reached the end of its life
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Finished | Self::Cancelled)
    }
}

/// Local model of a data source
#[derive(Debug, Clone)]
pub struct SourceMachine {
    state: SourceState,
    mime_types: Vec<String>,
    actions: Option<DndAction>,
    target: Option<String>,
    action: DndAction,
}

impl Default for SourceMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl SourceMachine {
    /// A new source, preparing
    pub fn new() -> Self {
        Self {
            state: SourceState::Preparing,
            mime_types: Vec::new(),
            actions: None,
            target: None,
            action: DndAction::empty(),
        }
    }

    /// Current state
    pub fn state(&self) -> SourceState {
        self.state
    }

    /// Offered mime types, in order
    pub fn mime_types(&self) -> &[String] {
        &self.mime_types
    }

    /// Actions set for drag-and-drop
    pub fn actions(&self) -> Option<DndAction> {
        self.actions
    }

    /// Mime type accepted by the current drop target
    pub fn target(&self) -> Option<&str> {
        self.target.as_deref()
    }

    /// Action selected by the compositor
    pub fn action(&self) -> DndAction {
        self.action
    }

    /// Offer a mime type
    ///
    /// Duplicates are ignored, and return `false`.
    pub fn offer(&mut self, mime_type: &str) -> Result<bool, RequestError> {
        if self.state.is_terminal() {
            return Err(RequestError::InvalidSource);
        }
        if self.mime_types.iter().any(|m| m == mime_type) {
            return Ok(false);
        }
        self.mime_types.push(mime_type.to_owned());
        Ok(true)
    }

    /// Set the drag-and-drop actions
    ///
    /// Only allowed once, before the source is used.
    pub fn set_actions(&mut self, mask: u32) -> Result<DndAction, RequestError> {
        if self.state != SourceState::Preparing || self.actions.is_some() {
            return Err(RequestError::InvalidSource);
        }
        let actions = DndAction::from_bits(mask).ok_or(RequestError::InvalidActionMask)?;
        self.actions = Some(actions);
        Ok(actions)
    }

    /// Check that the source can be handed to the compositor
    ///
    /// A source can only be used once, and a source with actions only for drag-and-drop.
    pub fn check_start(&self, usage: SourceUse) -> Result<(), RequestError> {
        if self.state != SourceState::Preparing {
            return Err(RequestError::InvalidSource);
        }
        if usage == SourceUse::Selection && self.actions.is_some() {
            return Err(RequestError::InvalidSource);
        }
        Ok(())
    }

    /// Hand the source to the compositor
    pub fn start(&mut self, usage: SourceUse) -> Result<(), RequestError> {
        self.check_start(usage)?;
        self.state = SourceState::Active(usage);
        Ok(())
    }

    /// A target accepted a mime type, or none
    pub fn on_target(&mut self, mime_type: Option<String>) {
        self.target = mime_type;
    }

    /// The compositor selected an action
    pub fn on_action(&mut self, action: DndAction) {
        self.action = action;
    }

    /// The user dropped on a target
    pub fn on_drop_performed(&mut self) {
        if self.state == SourceState::Active(SourceUse::Drag) {
            self.state = SourceState::DropPerformed;
        }
    }

    /// The target finished the transfer
    pub fn on_finished(&mut self) {
        if !self.state.is_terminal() {
            self.state = SourceState::Finished;
        }
    }

    /// The source was replaced or the operation cancelled
    pub fn on_cancelled(&mut self) {
        if !self.state.is_terminal() {
            self.state = SourceState::Cancelled;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drag_lifecycle() {
        let mut source = SourceMachine::new();
        assert!(source.offer("text/plain").unwrap());
        assert!(!source.offer("text/plain").unwrap());
        assert_eq!(source.set_actions(3).unwrap(), DndAction::Copy | DndAction::Move);
        source.start(SourceUse::Drag).unwrap();
        source.on_target(Some("text/plain".into()));
        source.on_action(DndAction::Move);
        source.on_drop_performed();
        assert_eq!(source.state(), SourceState::DropPerformed);
        source.on_finished();
        assert_eq!(source.state(), SourceState::Finished);
        assert_eq!(source.target(), Some("text/plain"));
        assert_eq!(source.action(), DndAction::Move);
        assert_eq!(source.offer("text/html"), Err(RequestError::InvalidSource));
    }

    #[test]
    fn actions_only_once_before_use() {
        let mut source = SourceMachine::new();
        source.set_actions(1).unwrap();
        assert_eq!(source.set_actions(1), Err(RequestError::InvalidSource));

        let mut source = SourceMachine::new();
        source.start(SourceUse::Drag).unwrap();
        assert_eq!(source.set_actions(1), Err(RequestError::InvalidSource));
    }

    #[test]
    fn invalid_mask() {
        let mut source = SourceMachine::new();
        assert_eq!(source.set_actions(8), Err(RequestError::InvalidActionMask));
        // a refused mask does not count
        source.set_actions(4).unwrap();
    }

    #[test]
    fn selection_with_actions_is_refused() {
        let mut source = SourceMachine::new();
        source.set_actions(1).unwrap();
        assert_eq!(source.start(SourceUse::Selection), Err(RequestError::InvalidSource));
        source.start(SourceUse::Drag).unwrap();
        assert_eq!(source.start(SourceUse::Drag), Err(RequestError::InvalidSource));
    }

    #[test]
    fn cancellation_is_final() {
        let mut source = SourceMachine::new();
        source.start(SourceUse::Selection).unwrap();
        // drop only concerns drag sources
        source.on_drop_performed();
        assert_eq!(source.state(), SourceState::Active(SourceUse::Selection));
        source.on_cancelled();
        source.on_finished();
        assert_eq!(source.state(), SourceState::Cancelled);
    }
}
