//! Ordered leak-test phase plan.
//!
//! Each step names the outputs that stay energized while the phase holds and
//! how the phase completes. Hold durations come from the per-test
//! [`TimingConfig`](crate::config::TimingConfig), so the plan itself stays a
//! compile-time constant.

use core::fmt;

use super::{ActuatorState, OutputId};

/// Phases of one leak test, in execution order.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum TestPhase {
    Extending,
    Filling,
    Stabilizing,
    Testing,
    Isolating,
    Exhausting,
    Retracting,
    Evaluating,
}

impl TestPhase {
    /// Phase the sequencer enters after a start request.
    pub const FIRST: Self = TestPhase::Extending;

    /// Deterministic index for lookups into [`LEAK_TEST_PLAN`].
    #[must_use]
    pub const fn as_index(self) -> usize {
        match self {
            TestPhase::Extending => 0,
            TestPhase::Filling => 1,
            TestPhase::Stabilizing => 2,
            TestPhase::Testing => 3,
            TestPhase::Isolating => 4,
            TestPhase::Exhausting => 5,
            TestPhase::Retracting => 6,
            TestPhase::Evaluating => 7,
        }
    }

    /// Phase that follows `self` on the nominal path.
    #[must_use]
    pub const fn next(self) -> Option<Self> {
        match self {
            TestPhase::Extending => Some(TestPhase::Filling),
            TestPhase::Filling => Some(TestPhase::Stabilizing),
            TestPhase::Stabilizing => Some(TestPhase::Testing),
            TestPhase::Testing => Some(TestPhase::Isolating),
            TestPhase::Isolating => Some(TestPhase::Exhausting),
            TestPhase::Exhausting => Some(TestPhase::Retracting),
            TestPhase::Retracting => Some(TestPhase::Evaluating),
            TestPhase::Evaluating => None,
        }
    }

    /// Returns `true` for phases that hold for a configured duration.
    #[must_use]
    pub const fn is_timed(self) -> bool {
        matches!(step_for(self).completion, PhaseCompletion::AfterHold)
    }

    /// Returns `true` while the DUT may still hold test pressure.
    #[must_use]
    pub const fn is_pressurized(self) -> bool {
        matches!(
            self,
            TestPhase::Filling | TestPhase::Stabilizing | TestPhase::Testing | TestPhase::Isolating
        )
    }

    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            TestPhase::Extending => "extending",
            TestPhase::Filling => "filling",
            TestPhase::Stabilizing => "stabilizing",
            TestPhase::Testing => "testing",
            TestPhase::Isolating => "isolating",
            TestPhase::Exhausting => "exhausting",
            TestPhase::Retracting => "retracting",
            TestPhase::Evaluating => "evaluating",
        }
    }
}

impl fmt::Display for TestPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// How a phase decides it is finished.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum PhaseCompletion {
    /// Hold for the configured duration (Filling also checks the pressure reached).
    AfterHold,
    /// Complete after the window is sealed by stopping acquisition.
    AfterWindow,
    /// Complete as soon as the outputs are applied.
    Immediate,
    /// Complete once the evaluator returns a verdict.
    OnVerdict,
}

/// One entry of the leak-test plan.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct PhaseStep {
    pub phase: TestPhase,
    pub outputs: ActuatorState,
    pub completion: PhaseCompletion,
}

impl PhaseStep {
    pub const fn new(phase: TestPhase, outputs: ActuatorState, completion: PhaseCompletion) -> Self {
        Self {
            phase,
            outputs,
            completion,
        }
    }
}

/// Ordered phase plan for a single leak test.
pub const LEAK_TEST_PLAN: [PhaseStep; 8] = [
    // Clamp the DUT by driving the fixture cylinder forward.
    PhaseStep::new(
        TestPhase::Extending,
        ActuatorState::only(OutputId::Extend),
        PhaseCompletion::AfterHold,
    ),
    // Open the supply valve; the cylinder coil is released and holds mechanically.
    PhaseStep::new(
        TestPhase::Filling,
        ActuatorState::only(OutputId::Fill),
        PhaseCompletion::AfterHold,
    ),
    // Everything closed while the trapped air settles thermally.
    PhaseStep::new(
        TestPhase::Stabilizing,
        ActuatorState::ALL_OFF,
        PhaseCompletion::AfterHold,
    ),
    PhaseStep::new(
        TestPhase::Testing,
        ActuatorState::ALL_OFF,
        PhaseCompletion::AfterWindow,
    ),
    PhaseStep::new(
        TestPhase::Isolating,
        ActuatorState::ALL_OFF,
        PhaseCompletion::Immediate,
    ),
    // Vent the DUT before unclamping.
    PhaseStep::new(
        TestPhase::Exhausting,
        ActuatorState::only(OutputId::Exhaust),
        PhaseCompletion::AfterHold,
    ),
    PhaseStep::new(
        TestPhase::Retracting,
        ActuatorState::only(OutputId::Retract),
        PhaseCompletion::AfterHold,
    ),
    PhaseStep::new(
        TestPhase::Evaluating,
        ActuatorState::ALL_OFF,
        PhaseCompletion::OnVerdict,
    ),
];

/// Retrieve the plan entry for `phase`.
#[must_use]
pub const fn step_for(phase: TestPhase) -> &'static PhaseStep {
    &LEAK_TEST_PLAN[phase.as_index()]
}
