//! Per-peer perfect-negotiation state machine.
//!
//! The coordinator owns no I/O. The peer manager feeds it every negotiation
//! event in arrival order, performs the returned action against the
//! connection, then reports the outcome back so the mirrored offer/answer
//! state only moves along known edges.

use crate::error::{EngineError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NegotiationState {
    Stable,
    HaveLocalOffer,
    HaveRemoteOffer,
}

/// Outcome of a debounced negotiation trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OfferDecision {
    Create { ice_restart: bool },
    Skip(SkipReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    OfferInFlight,
    NotStable(NegotiationState),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteOfferDecision {
    /// Apply the incoming offer, rolling back our own local offer first
    /// when `rollback` is set.
    Accept { rollback: bool },
    /// Collision lost by the remote side; keep our offer in flight.
    Ignore,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteAnswerDecision {
    Apply,
    Stale,
}

#[derive(Debug, Clone)]
pub struct NegotiationCoordinator {
    polite: bool,
    state: NegotiationState,
    offer_in_flight: bool,
    pending: bool,
    ice_restart: bool,
}

impl NegotiationCoordinator {
    pub fn new(polite: bool) -> Self {
        Self {
            polite,
            state: NegotiationState::Stable,
            offer_in_flight: false,
            pending: false,
            ice_restart: false,
        }
    }

    pub fn polite(&self) -> bool {
        self.polite
    }

    pub fn state(&self) -> NegotiationState {
        self.state
    }

    pub fn offer_in_flight(&self) -> bool {
        self.offer_in_flight
    }

    /// A negotiation was requested and has not been turned into an offer yet.
    pub fn is_pending(&self) -> bool {
        self.pending
    }

    /// Record a negotiation trigger. The caller (re)arms the debounce timer.
    pub fn request(&mut self) {
        self.pending = true;
    }

    /// Ask for the next offer to carry an ICE restart.
    pub fn request_ice_restart(&mut self) {
        self.ice_restart = true;
        self.pending = true;
    }

    /// Debounce timer fired.
    pub fn on_debounce(&mut self) -> OfferDecision {
        if self.offer_in_flight {
            return OfferDecision::Skip(SkipReason::OfferInFlight);
        }
        if self.state != NegotiationState::Stable {
            return OfferDecision::Skip(SkipReason::NotStable(self.state));
        }

        self.offer_in_flight = true;
        self.pending = false;
        OfferDecision::Create {
            ice_restart: std::mem::take(&mut self.ice_restart),
        }
    }

    /// Our offer was set as the local description and handed to signaling.
    pub fn local_offer_applied(&mut self) -> Result<()> {
        if !self.offer_in_flight || self.state != NegotiationState::Stable {
            return Err(self.reject("local-offer-applied"));
        }
        self.state = NegotiationState::HaveLocalOffer;
        Ok(())
    }

    /// Creating or applying our offer failed before it reached the wire.
    pub fn offer_failed(&mut self, ice_restart: bool) {
        self.offer_in_flight = false;
        if ice_restart {
            self.ice_restart = true;
        }
    }

    pub fn on_remote_offer(&self) -> RemoteOfferDecision {
        let collision = self.offer_in_flight || self.state != NegotiationState::Stable;
        if !collision {
            return RemoteOfferDecision::Accept { rollback: false };
        }
        if !self.polite {
            return RemoteOfferDecision::Ignore;
        }
        RemoteOfferDecision::Accept {
            rollback: self.state == NegotiationState::HaveLocalOffer,
        }
    }

    /// Our local offer was rolled back.
    pub fn rolled_back(&mut self) -> Result<()> {
        if self.state != NegotiationState::HaveLocalOffer {
            return Err(self.reject("rolled-back"));
        }
        self.state = NegotiationState::Stable;
        self.offer_in_flight = false;
        Ok(())
    }

    pub fn remote_offer_applied(&mut self) -> Result<()> {
        match self.state {
            NegotiationState::Stable | NegotiationState::HaveRemoteOffer => {
                self.state = NegotiationState::HaveRemoteOffer;
                self.offer_in_flight = false;
                Ok(())
            }
            NegotiationState::HaveLocalOffer => Err(self.reject("remote-offer-applied")),
        }
    }

    /// Our answer was applied locally and sent. Returns whether a deferred
    /// negotiation must be rescheduled.
    pub fn answer_sent(&mut self) -> Result<bool> {
        if self.state != NegotiationState::HaveRemoteOffer {
            return Err(self.reject("answer-sent"));
        }
        self.state = NegotiationState::Stable;
        Ok(self.pending)
    }

    pub fn on_remote_answer(&self) -> RemoteAnswerDecision {
        if self.state == NegotiationState::HaveLocalOffer {
            RemoteAnswerDecision::Apply
        } else {
            RemoteAnswerDecision::Stale
        }
    }

    /// Returns whether a deferred negotiation must be rescheduled.
    pub fn remote_answer_applied(&mut self) -> Result<bool> {
        if self.state != NegotiationState::HaveLocalOffer {
            return Err(self.reject("remote-answer-applied"));
        }
        self.state = NegotiationState::Stable;
        self.offer_in_flight = false;
        Ok(self.pending)
    }

    /// The remote answer could not be applied and our offer was rolled back;
    /// the changes it carried still need to be negotiated.
    pub fn offer_abandoned(&mut self) -> Result<()> {
        self.rolled_back()?;
        self.pending = true;
        Ok(())
    }

    fn reject(&self, event: &'static str) -> EngineError {
        EngineError::InvalidTransition {
            state: self.state,
            event,
        }
    }
}
