//! Lifecycle of a data offer and drag-and-drop action negotiation

use crate::{error::RequestError, protocol::DndAction};

/// State of a data offer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OfferState {
    /// Introduced by the data device, not yet used
    Advertised,
    /// The offer is the clipboard content
    Selection,
    /// A drag-and-drop operation with this offer is over one of our surfaces
    DragActive,
    /// The user dropped on one of our surfaces
    Dropped,
    /// The transfer was completed with `finish`
    Finished,
    /// The drag left, or was dropped without an accepted mime type
    Cancelled,
    /// The offer was destroyed
    Destroyed,
}

/// Local model of a data offer
#[derive(Debug, Clone)]
pub struct OfferMachine {
    state: OfferState,
    dnd: bool,
    mime_types: Vec<String>,
    source_actions: Option<DndAction>,
    action: DndAction,
    accepted: Option<String>,
    actions: Option<(DndAction, DndAction)>,
}

impl Default for OfferMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl OfferMachine {
    /// A freshly advertised offer
    pub fn new() -> Self {
        Self {
            state: OfferState::Advertised,
            dnd: false,
            mime_types: Vec::new(),
            source_actions: None,
            action: DndAction::empty(),
            accepted: None,
            actions: None,
        }
    }

    /// Current state
    pub fn state(&self) -> OfferState {
        self.state
    }

    /// Mime types offered by the source, in order
    pub fn mime_types(&self) -> &[String] {
        &self.mime_types
    }

    /// Actions advertised by the source, if known
    pub fn source_actions(&self) -> Option<DndAction> {
        self.source_actions
    }

    /// Action selected by the compositor
    pub fn action(&self) -> DndAction {
        self.action
    }

    /// Mime type accepted last
    pub fn accepted(&self) -> Option<&str> {
        self.accepted.as_deref()
    }

    /// Actions and preferred action set last
    pub fn actions(&self) -> Option<(DndAction, DndAction)> {
        self.actions
    }

    fn check_usable(&self) -> Result<(), RequestError> {
        match self.state {
            OfferState::Finished | OfferState::Destroyed => Err(RequestError::InvalidOffer),
            _ => Ok(()),
        }
    }

    /// The source offers a mime type
    pub fn on_offer(&mut self, mime_type: String) {
        if !self.mime_types.contains(&mime_type) {
            self.mime_types.push(mime_type);
        }
    }

    /// The source advertised its actions
    pub fn on_source_actions(&mut self, actions: DndAction) {
        self.source_actions = Some(actions);
    }

    /// The compositor selected an action
    pub fn on_action(&mut self, action: DndAction) {
        self.action = action;
    }

    /// The offer is used for a drag entering one of our surfaces
    pub fn on_enter(&mut self) {
        self.dnd = true;
        if self.state == OfferState::Advertised {
            self.state = OfferState::DragActive;
        }
    }

    /// The drag left our surfaces
    pub fn on_leave(&mut self) {
        if self.state == OfferState::DragActive {
            self.state = OfferState::Cancelled;
        }
    }

    /// The user dropped
    ///
    /// Without an accepted mime type the compositor cancels the operation.
    pub fn on_drop(&mut self) {
        if self.state == OfferState::DragActive {
            self.state = if self.accepted.is_some() { OfferState::Dropped } else { OfferState::Cancelled };
        }
    }

    /// The offer became the selection
    pub fn on_selection(&mut self) {
        if self.state == OfferState::Advertised {
            self.state = OfferState::Selection;
        }
    }

    /// Accept a mime type, or none
    pub fn accept(&mut self, mime_type: Option<&str>) -> Result<(), RequestError> {
        self.check_usable()?;
        self.accepted = mime_type.map(str::to_owned);
        Ok(())
    }

    /// Check that data can be requested
    pub fn check_receive(&self) -> Result<(), RequestError> {
        self.check_usable()
    }

    /// Set the accepted actions and the preferred one
    pub fn set_actions(&mut self, mask: u32, preferred: u32) -> Result<(), RequestError> {
        self.check_usable()?;
        if !self.dnd {
            return Err(RequestError::InvalidOffer);
        }
        let mask = DndAction::from_bits(mask).ok_or(RequestError::InvalidActionMask)?;
        let preferred = DndAction::from_bits(preferred).ok_or(RequestError::InvalidAction)?;
        if preferred.bits().count_ones() != 1 || !mask.contains(preferred) {
            return Err(RequestError::InvalidAction);
        }
        if let Some(source_actions) = self.source_actions {
            if !source_actions.contains(mask) {
                return Err(RequestError::InvalidAction);
            }
        }
        self.actions = Some((mask, preferred));
        Ok(())
    }

    /// Complete a drag-and-drop transfer
    pub fn finish(&mut self) -> Result<(), RequestError> {
        self.check_usable()?;
        if !self.dnd || self.accepted.is_none() || self.action.is_empty() {
            return Err(RequestError::InvalidFinish);
        }
        self.state = OfferState::Finished;
        Ok(())
    }

    /// The offer is destroyed
    pub fn destroy(&mut self) {
        self.state = OfferState::Destroyed;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dragged() -> OfferMachine {
        let mut offer = OfferMachine::new();
        offer.on_offer("text/plain".into());
        offer.on_source_actions(DndAction::Copy | DndAction::Move);
        offer.on_enter();
        offer
    }

    #[test]
    fn finish_without_negotiation() {
        let mut offer = dragged();
        assert_eq!(offer.finish(), Err(RequestError::InvalidFinish));
        assert_eq!(offer.state(), OfferState::DragActive);
    }

    #[test]
    fn full_drag_and_drop() {
        let mut offer = dragged();
        offer.accept(Some("text/plain")).unwrap();
        offer.set_actions(3, 2).unwrap();
        offer.on_action(DndAction::Move);
        offer.on_drop();
        assert_eq!(offer.state(), OfferState::Dropped);
        offer.check_receive().unwrap();
        offer.finish().unwrap();
        assert_eq!(offer.state(), OfferState::Finished);
        // only destroy is allowed now
        assert_eq!(offer.accept(None), Err(RequestError::InvalidOffer));
        assert_eq!(offer.check_receive(), Err(RequestError::InvalidOffer));
        assert_eq!(offer.finish(), Err(RequestError::InvalidOffer));
        offer.destroy();
        assert_eq!(offer.state(), OfferState::Destroyed);
    }

    #[test]
    fn drop_without_accepted_type_cancels() {
        let mut offer = dragged();
        offer.accept(Some("text/plain")).unwrap();
        offer.accept(None).unwrap();
        offer.on_drop();
        assert_eq!(offer.state(), OfferState::Cancelled);
    }

    #[test]
    fn action_negotiation_checks() {
        let mut offer = dragged();
        assert_eq!(offer.set_actions(8, 1), Err(RequestError::InvalidActionMask));
        assert_eq!(offer.set_actions(3, 3), Err(RequestError::InvalidAction));
        assert_eq!(offer.set_actions(1, 2), Err(RequestError::InvalidAction));
        assert_eq!(offer.set_actions(3, 0), Err(RequestError::InvalidAction));
        // ask was not advertised by the source
        assert_eq!(offer.set_actions(5, 1), Err(RequestError::InvalidAction));
        offer.set_actions(1, 1).unwrap();
        assert_eq!(offer.actions(), Some((DndAction::Copy, DndAction::Copy)));
    }

    #[test]
    fn mask_is_limited_to_source_actions() {
        let mut offer = OfferMachine::new();
        offer.on_source_actions(DndAction::Copy);
        offer.on_enter();
        assert_eq!(offer.set_actions(3, 1), Err(RequestError::InvalidAction));
        assert_eq!(offer.set_actions(9, 1), Err(RequestError::InvalidActionMask));
        assert_eq!(offer.actions(), None);
        offer.set_actions(1, 1).unwrap();
    }

    #[test]
    fn selection_offers() {
        let mut offer = OfferMachine::new();
        offer.on_selection();
        assert_eq!(offer.state(), OfferState::Selection);
        offer.accept(Some("text/plain")).unwrap();
        assert_eq!(offer.set_actions(1, 1), Err(RequestError::InvalidOffer));
        offer.on_action(DndAction::Copy);
        assert_eq!(offer.finish(), Err(RequestError::InvalidFinish));
    }

    #[test]
    fn leaving_cancels() {
        let mut offer = dragged();
        offer.on_leave();
        assert_eq!(offer.state(), OfferState::Cancelled);
        offer.on_drop();
        assert_eq!(offer.state(), OfferState::Cancelled);
    }

    #[test]
    fn duplicate_mime_types_are_merged() {
        let mut offer = OfferMachine::new();
        offer.on_offer("a".into());
        offer.on_offer("b".into());
        offer.on_offer("a".into());
        assert_eq!(offer.mime_types(), ["a", "b"]);
    }
}
