// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! The 1FC9 binding state machine, as a pure transition function.
//!
//! No timers, no futures, no I/O here: the context feeds events (local
//! sends, classified observations, timer expiries) and interprets the
//! returned actions. State is totally ordered within one context.
//!
//! ```text
//! Supplicant:  Idle -> SentOffer -> GotAccept -> SentConfirm -> Bound
//! Respondent:  Idle -> Listening -> GotOffer -> SentAccept -> GotConfirm
//!                   -> BoundAccepted -(3 s)-> Bound
//! Either:      any waiting state -> Failed (timeout / retries exceeded)
//! ```

use crate::config::BOUND_ACCEPTED_LINGER;

use super::BindPhase;

/// The state of one binding context. Exactly one at any instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindState {
    Idle,
    // respondent path
    Listening,
    GotOffer,
    SentAccept,
    GotConfirm,
    BoundAccepted,
    // supplicant path
    SentOffer,
    GotAccept,
    SentConfirm,
    // terminal
    Bound,
    Failed,
}

impl BindState {
    /// True while a handshake is in flight (`is_binding` iff the state
    /// is not Idle/Bound/BoundAccepted/Failed).
    pub fn is_binding(self) -> bool {
        !matches!(self, Self::Idle | Self::Bound | Self::BoundAccepted | Self::Failed)
    }

    /// True for the states a new binding may be (re-)initiated from.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Idle | Self::Bound | Self::BoundAccepted | Self::Failed)
    }
}

/// The role implied by the current state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindRole {
    Supplicant,
    Respondent,
    Dormant,
}

impl BindState {
    pub fn role(self) -> BindRole {
        match self {
            Self::Listening | Self::GotOffer | Self::SentAccept | Self::GotConfirm
            | Self::BoundAccepted => BindRole::Respondent,
            Self::SentOffer | Self::GotAccept | Self::SentConfirm => BindRole::Supplicant,
            Self::Idle | Self::Bound | Self::Failed => BindRole::Dormant,
        }
    }
}

/// Events the context feeds into the machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindEvent {
    /// Start listening as a respondent
    Listen,
    /// A local phase frame was sent (its echo is pending)
    Sent(BindPhase),
    /// A phase frame was observed; `mine` = the echo of our own send
    Observed { phase: BindPhase, mine: bool },
    /// The current wait timer expired
    TimerExpired,
    /// The retry budget for the current phase is exhausted
    RetriesExceeded,
    /// The BoundAccepted linger elapsed
    LingerExpired,
}

/// What the context must do after a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindAction {
    /// Arm the BoundAccepted -> Bound timer
    StartLinger(std::time::Duration),
    /// The handshake concluded successfully
    Complete,
    /// The handshake failed; surface BindingFlowFailed to the caller
    Fail,
}

/// Apply one event. Unexpected events leave the state unchanged (frames on
/// the air that are not for us are common, not errors).
pub fn on_event(state: BindState, event: BindEvent) -> (BindState, Option<BindAction>) {
    use BindEvent as E;
    use BindPhase as P;
    use BindState as S;

    match (state, event) {
        // --- entry points ---------------------------------------------------
        (S::Idle, E::Listen) => (S::Listening, None),
        (S::Idle, E::Sent(P::Tender)) => (S::SentOffer, None),

        // --- respondent path ------------------------------------------------
        (S::Listening, E::Observed { phase: P::Tender, mine: false }) => (S::GotOffer, None),
        (S::GotOffer, E::Sent(P::Accept)) => (S::SentAccept, None),
        (S::SentAccept, E::Observed { phase: P::Affirm, mine: false }) => (S::GotConfirm, None),
        (S::GotConfirm, E::Observed { phase: P::Ratify, mine: false }) => {
            (S::BoundAccepted, Some(BindAction::StartLinger(BOUND_ACCEPTED_LINGER)))
        }
        // the addenda is optional: its timeout still concludes the handshake
        (S::GotConfirm, E::TimerExpired) => {
            (S::BoundAccepted, Some(BindAction::StartLinger(BOUND_ACCEPTED_LINGER)))
        }
        (S::BoundAccepted, E::LingerExpired) => (S::Bound, Some(BindAction::Complete)),

        // --- supplicant path ------------------------------------------------
        (S::SentOffer, E::Observed { phase: P::Accept, mine: false }) => (S::GotAccept, None),
        (S::GotAccept, E::Sent(P::Affirm)) => (S::SentConfirm, None),
        (S::SentConfirm, E::Observed { phase: P::Affirm, mine: true }) => {
            (S::Bound, Some(BindAction::Complete))
        }

        // --- failure --------------------------------------------------------
        (S::Listening | S::SentOffer | S::SentAccept, E::TimerExpired) => {
            (S::Failed, Some(BindAction::Fail))
        }
        (s, E::RetriesExceeded) if s.is_binding() => (S::Failed, Some(BindAction::Fail)),

        // anything else: no transition
        (s, _) => (s, None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use BindEvent as E;
    use BindPhase as P;
    use BindState as S;

    fn drive(start: S, events: &[E]) -> S {
        events.iter().fold(start, |s, &e| on_event(s, e).0)
    }

    #[test]
    fn supplicant_happy_path() {
        let s = drive(
            S::Idle,
            &[
                E::Sent(P::Tender),
                E::Observed { phase: P::Accept, mine: false },
                E::Sent(P::Affirm),
                E::Observed { phase: P::Affirm, mine: true },
            ],
        );
        assert_eq!(s, S::Bound);
    }

    #[test]
    fn respondent_happy_path_with_addenda() {
        let s = drive(
            S::Idle,
            &[
                E::Listen,
                E::Observed { phase: P::Tender, mine: false },
                E::Sent(P::Accept),
                E::Observed { phase: P::Affirm, mine: false },
                E::Observed { phase: P::Ratify, mine: false },
            ],
        );
        assert_eq!(s, S::BoundAccepted);
        let (s, action) = on_event(s, E::LingerExpired);
        assert_eq!(s, S::Bound);
        assert_eq!(action, Some(BindAction::Complete));
    }

    #[test]
    fn respondent_without_addenda_still_binds() {
        let s = drive(
            S::Idle,
            &[
                E::Listen,
                E::Observed { phase: P::Tender, mine: false },
                E::Sent(P::Accept),
                E::Observed { phase: P::Affirm, mine: false },
                E::TimerExpired, // no 10E0 arrived
            ],
        );
        assert_eq!(s, S::BoundAccepted);
    }

    #[test]
    fn timeouts_fail_the_waiting_states() {
        for start in [S::Listening, S::SentOffer, S::SentAccept] {
            let (s, action) = on_event(start, E::TimerExpired);
            assert_eq!(s, S::Failed, "{start:?}");
            assert_eq!(action, Some(BindAction::Fail));
        }
    }

    #[test]
    fn own_echo_does_not_advance_a_wait() {
        // a supplicant's own offer echo must not look like an accept
        let (s, _) = on_event(S::SentOffer, E::Observed { phase: P::Tender, mine: true });
        assert_eq!(s, S::SentOffer);
    }

    #[test]
    fn is_binding_tracks_the_spec_invariant() {
        for s in [S::Idle, S::Bound, S::BoundAccepted, S::Failed] {
            assert!(!s.is_binding(), "{s:?}");
            assert!(s.is_terminal(), "{s:?}");
        }
        for s in [S::Listening, S::GotOffer, S::SentAccept, S::GotConfirm, S::SentOffer,
            S::GotAccept, S::SentConfirm]
        {
            assert!(s.is_binding(), "{s:?}");
        }
    }

    #[test]
    fn unexpected_frames_are_ignored() {
        let (s, action) = on_event(S::Listening, E::Observed { phase: P::Affirm, mine: false });
        assert_eq!(s, S::Listening);
        assert_eq!(action, None);
    }
}
