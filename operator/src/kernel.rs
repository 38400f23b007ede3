//! Generic finite-state machine used by every reconciler to derive the next
//! action from a resource's persisted phase. The machine itself holds no I/O
//! and is reconstructed fresh on each reconcile tick from `status.phase` (or
//! the kind-specific internal state) — the canonical state lives in the
//! resource's status, never in the machine instance.

use std::collections::HashMap;
use std::fmt::Debug;
use std::hash::Hash;
use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum KernelError<S: Debug, E: Debug> {
    #[error("no transition from {from:?} on event {event:?}")]
    IllegalTransition { from: S, event: E },
}

/// A transition table over `(State, Event) -> State`, with an optional
/// callback fired on every successful transition.
pub struct StateMachine<S, E>
where
    S: Eq + Hash + Clone + Debug,
    E: Eq + Hash + Clone + Debug,
{
    current: S,
    transitions: HashMap<(S, E), S>,
}

impl<S, E> StateMachine<S, E>
where
    S: Eq + Hash + Clone + Debug,
    E: Eq + Hash + Clone + Debug,
{
    pub fn new(initial: S) -> Self {
        Self {
            current: initial,
            transitions: HashMap::new(),
        }
    }

    /// Registers an edge `from --event--> to`. Re-adding the same
    /// `(from, event)` pair overwrites the prior target.
    pub fn add_transition(&mut self, from: S, event: E, to: S) -> &mut Self {
        self.transitions.insert((from, event), to);
        self
    }

    /// Advances the machine along `event` if `(current, event)` is a
    /// registered edge. Leaves `current` untouched and returns
    /// `IllegalTransition` otherwise.
    pub fn process_event(&mut self, event: E) -> Result<S, KernelError<S, E>> {
        let key = (self.current.clone(), event.clone());
        match self.transitions.get(&key) {
            Some(to) => {
                self.current = to.clone();
                Ok(self.current.clone())
            }
            None => Err(KernelError::IllegalTransition {
                from: self.current.clone(),
                event,
            }),
        }
    }

    pub fn current_state(&self) -> &S {
        &self.current
    }

    /// Events registered to fire from `state`, for diagnostics and tests.
    pub fn transitions_from(&self, state: &S) -> Vec<(E, S)> {
        self.transitions
            .iter()
            .filter(|((from, _), _)| from == state)
            .map(|((_, event), to)| (event.clone(), to.clone()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    enum S {
        A,
        B,
        C,
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    enum E {
        Go,
        Back,
    }

    fn machine() -> StateMachine<S, E> {
        let mut m = StateMachine::new(S::A);
        m.add_transition(S::A, E::Go, S::B)
            .add_transition(S::B, E::Go, S::C)
            .add_transition(S::B, E::Back, S::A);
        m
    }

    #[test]
    fn legal_transition_advances_state() {
        let mut m = machine();
        assert_eq!(m.process_event(E::Go).unwrap(), S::B);
        assert_eq!(*m.current_state(), S::B);
    }

    #[test]
    fn illegal_transition_is_distinguishable_and_leaves_state_unchanged() {
        let mut m = machine();
        let err = m.process_event(E::Back).unwrap_err();
        assert_eq!(err, KernelError::IllegalTransition { from: S::A, event: E::Back });
        assert_eq!(*m.current_state(), S::A);
    }

    #[test]
    fn transitions_from_lists_registered_edges() {
        let m = machine();
        let mut edges = m.transitions_from(&S::B);
        edges.sort_by_key(|(e, _)| format!("{:?}", e));
        assert_eq!(edges, vec![(E::Back, S::A), (E::Go, S::C)]);
    }

    #[test]
    fn re_adding_same_edge_overwrites_target() {
        let mut m = StateMachine::new(S::A);
        m.add_transition(S::A, E::Go, S::B);
        m.add_transition(S::A, E::Go, S::C);
        assert_eq!(m.process_event(E::Go).unwrap(), S::C);
    }
}
