// src/fsm.rs - Explicit finite state machine table
use std::collections::HashMap;
use std::fmt::Debug;
use std::hash::Hash;

/// Outcome of a successful event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition<S, E> {
    pub from: S,
    pub event: E,
    pub to: S,
}

/// Table driven state machine.
///
/// Transitions are declared up front as `(from, event) -> to` and checked
/// before every send. Events that are not declared for the current state
/// are rejected and leave the state untouched.
#[derive(Debug, Clone)]
pub struct Fsm<S, E> {
    state: S,
    transitions: HashMap<(S, E), S>,
    /// Declaration order of events per state
    order: Vec<(S, E)>,
}

impl<S, E> Fsm<S, E>
where
    S: Copy + Eq + Hash + Debug,
    E: Copy + Eq + Hash + Debug,
{
    pub fn new(initial: S) -> Self {
        Self {
            state: initial,
            transitions: HashMap::new(),
            order: Vec::new(),
        }
    }

    pub fn with_transitions(initial: S, table: &[(S, E, S)]) -> Self {
        let mut fsm = Self::new(initial);
        for &(from, event, to) in table {
            fsm.add_transition(from, event, to);
        }
        fsm
    }

    /// Declare or replace a transition
    pub fn add_transition(&mut self, from: S, event: E, to: S) {
        if self.transitions.insert((from, event), to).is_none() {
            self.order.push((from, event));
        }
    }

    pub fn state(&self) -> S {
        self.state
    }

    pub fn can(&self, event: E) -> bool {
        self.transitions.contains_key(&(self.state, event))
    }

    /// State `event` would lead to from the current state
    pub fn target(&self, event: E) -> Option<S> {
        self.transitions.get(&(self.state, event)).copied()
    }

    /// Events accepted in the current state, in declaration order
    pub fn allowed_events(&self) -> Vec<E> {
        self.order
            .iter()
            .filter(|(from, _)| *from == self.state)
            .map(|(_, event)| *event)
            .collect()
    }

    /// Fire `event`; `None` when it is not allowed.
    pub fn send(&mut self, event: E) -> Option<Transition<S, E>> {
        let to = self.target(event)?;
        let from = self.state;
        self.state = to;
        Some(Transition { from, event, to })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    enum Light {
        Off,
        On,
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    enum Switch {
        Flip,
        Hold,
    }

    #[test]
    fn test_undeclared_event_is_rejected() {
        let mut fsm = Fsm::with_transitions(
            Light::Off,
            &[(Light::Off, Switch::Flip, Light::On), (Light::On, Switch::Flip, Light::Off)],
        );
        assert!(!fsm.can(Switch::Hold));
        assert_eq!(fsm.send(Switch::Hold), None);
        assert_eq!(fsm.state(), Light::Off);

        let t = fsm.send(Switch::Flip).unwrap();
        assert_eq!((t.from, t.to), (Light::Off, Light::On));
        assert_eq!(fsm.allowed_events(), vec![Switch::Flip]);
    }
}
