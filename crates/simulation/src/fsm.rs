//! Generic finite-state-machine driver.
//!
//! Every dynamic entity in the world — tile, car, traffic light — runs
//! through one of these. A state type describes its own outgoing
//! transitions (`Timed`, `Direct`, or `Condition`) plus entry/exit action
//! lists; the driver owns the current state and the time spent in it, and
//! every update returns the actions emitted by transitions taken this step.
//!
//! States are plain tagged enums. There is no inheritance and no trait
//! objects; condition checks are plain `fn(&Ctx) -> bool` pointers so state
//! tables stay `'static` data.

/// How a transition fires.
pub enum TransitionKind<C> {
    /// Fires once the state has been active for this many seconds.
    Timed(f32),
    /// Fires only through an explicit [`Fsm::transition_to`] call.
    Direct,
    /// Fires as soon as the predicate holds for the update context.
    Condition(fn(&C) -> bool),
}

/// One outgoing transition of a state.
pub struct Transition<S, C, A> {
    pub to: S,
    pub kind: TransitionKind<C>,
    /// Actions emitted when this transition is taken, between the source
    /// state's exit actions and the target state's entry actions.
    pub actions: Vec<A>,
}

impl<S, C, A> Transition<S, C, A> {
    pub fn timed(to: S, seconds: f32) -> Self {
        Self {
            to,
            kind: TransitionKind::Timed(seconds),
            actions: Vec::new(),
        }
    }

    pub fn direct(to: S) -> Self {
        Self {
            to,
            kind: TransitionKind::Direct,
            actions: Vec::new(),
        }
    }

    pub fn condition(to: S, check: fn(&C) -> bool) -> Self {
        Self {
            to,
            kind: TransitionKind::Condition(check),
            actions: Vec::new(),
        }
    }

    pub fn with_actions(mut self, actions: Vec<A>) -> Self {
        self.actions = actions;
        self
    }
}

/// Implemented by every state enum driven through [`Fsm`].
pub trait FsmState: Sized + Clone + PartialEq + core::fmt::Debug {
    /// Context handed to condition checks on update.
    type Context;
    /// Action type emitted by transitions and entry/exit hooks.
    type Action: Clone;

    /// Outgoing transitions of this state, checked in order.
    fn transitions(&self) -> Vec<Transition<Self, Self::Context, Self::Action>>;

    fn entry_actions(&self) -> Vec<Self::Action> {
        Vec::new()
    }

    fn exit_actions(&self) -> Vec<Self::Action> {
        Vec::new()
    }
}

/// Attempted a direct transition the current state does not declare.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidTransition {
    pub from: String,
    pub to: String,
}

impl core::fmt::Display for InvalidTransition {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "no transition from {} to {}", self.from, self.to)
    }
}

impl std::error::Error for InvalidTransition {}

/// Driver holding the current state and its age.
#[derive(Clone, Debug)]
pub struct Fsm<S: FsmState> {
    state: S,
    time_in_state: f32,
}

impl<S: FsmState> Fsm<S> {
    /// Start in `initial`, returning its entry actions.
    pub fn new(initial: S) -> (Self, Vec<S::Action>) {
        let actions = initial.entry_actions();
        (
            Self {
                state: initial,
                time_in_state: 0.0,
            },
            actions,
        )
    }

    /// Resume in `state` with `time_in_state` seconds already elapsed,
    /// emitting no entry actions. Used when an entity survives a rebuild.
    pub fn resume(state: S, time_in_state: f32) -> Self {
        Self {
            state,
            time_in_state,
        }
    }

    pub fn current(&self) -> &S {
        &self.state
    }

    /// Seconds spent in the current state.
    pub fn time_in_state(&self) -> f32 {
        self.time_in_state
    }

    /// Advance timers and fire the first `Timed` or `Condition` transition
    /// that is ready. At most one transition fires per update.
    pub fn update(&mut self, delta: f32, ctx: &S::Context) -> Vec<S::Action> {
        self.time_in_state += delta;
        let ready = self.state.transitions().into_iter().find(|t| match t.kind {
            TransitionKind::Timed(after) => self.time_in_state >= after,
            TransitionKind::Condition(check) => check(ctx),
            TransitionKind::Direct => false,
        });
        match ready {
            Some(transition) => self.apply(transition),
            None => Vec::new(),
        }
    }

    /// Take a declared transition to `to`, of any kind. Returns the emitted
    /// actions, or an error when the current state does not declare a
    /// transition to `to`.
    pub fn transition_to(&mut self, to: S) -> Result<Vec<S::Action>, InvalidTransition> {
        let declared = self
            .state
            .transitions()
            .into_iter()
            .find(|t| t.to == to)
            .ok_or_else(|| InvalidTransition {
                from: format!("{:?}", self.state),
                to: format!("{to:?}"),
            })?;
        Ok(self.apply(declared))
    }

    fn apply(&mut self, transition: Transition<S, S::Context, S::Action>) -> Vec<S::Action> {
        let mut actions = self.state.exit_actions();
        actions.extend(transition.actions);
        actions.extend(transition.to.entry_actions());
        self.state = transition.to;
        self.time_in_state = 0.0;
        actions
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone, Debug, PartialEq)]
    enum Kettle {
        Cold,
        Heating,
        Boiling,
    }

    #[derive(Clone, Debug, PartialEq)]
    enum KettleAction {
        Click,
        Whistle,
    }

    impl FsmState for Kettle {
        type Context = f32; // water temperature
        type Action = KettleAction;

        fn transitions(&self) -> Vec<Transition<Self, f32, KettleAction>> {
            match self {
                Kettle::Cold => vec![Transition::direct(Kettle::Heating)
                    .with_actions(vec![KettleAction::Click])],
                Kettle::Heating => vec![Transition::condition(Kettle::Boiling, |t| *t >= 100.0)],
                Kettle::Boiling => vec![Transition::timed(Kettle::Cold, 5.0)],
            }
        }

        fn entry_actions(&self) -> Vec<KettleAction> {
            match self {
                Kettle::Boiling => vec![KettleAction::Whistle],
                _ => Vec::new(),
            }
        }
    }

    #[test]
    fn test_direct_transition_emits_actions() {
        let (mut fsm, entry) = Fsm::new(Kettle::Cold);
        assert!(entry.is_empty());
        let actions = fsm.transition_to(Kettle::Heating).unwrap();
        assert_eq!(actions, vec![KettleAction::Click]);
        assert_eq!(*fsm.current(), Kettle::Heating);
    }

    #[test]
    fn test_undeclared_direct_transition_rejected() {
        let (mut fsm, _) = Fsm::new(Kettle::Cold);
        assert!(fsm.transition_to(Kettle::Boiling).is_err());
        assert_eq!(*fsm.current(), Kettle::Cold);
    }

    #[test]
    fn test_condition_transition_fires_on_context() {
        let (mut fsm, _) = Fsm::new(Kettle::Heating);
        assert!(fsm.update(0.1, &60.0).is_empty());
        let actions = fsm.update(0.1, &101.0);
        assert_eq!(actions, vec![KettleAction::Whistle]);
        assert_eq!(*fsm.current(), Kettle::Boiling);
    }

    #[test]
    fn test_timed_transition_waits_full_duration() {
        let (mut fsm, _) = Fsm::new(Kettle::Boiling);
        assert!(fsm.update(4.9, &0.0).is_empty());
        assert_eq!(*fsm.current(), Kettle::Boiling);
        fsm.update(0.2, &0.0);
        assert_eq!(*fsm.current(), Kettle::Cold);
    }

    #[test]
    fn test_time_in_state_resets_on_transition() {
        let (mut fsm, _) = Fsm::new(Kettle::Boiling);
        fsm.update(6.0, &0.0);
        assert_eq!(*fsm.current(), Kettle::Cold);
        assert_eq!(fsm.time_in_state(), 0.0);
    }
}
