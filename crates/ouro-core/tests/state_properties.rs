use ouro_core::{allowed_transitions, validate_transition, OrchestratorState, ProgressView};
use proptest::prelude::*;

fn state() -> impl Strategy<Value = OrchestratorState> {
    prop_oneof![
        Just(OrchestratorState::Idle),
        Just(OrchestratorState::AwaitingVisualization),
        Just(OrchestratorState::VisualizationStreaming),
        Just(OrchestratorState::AwaitingSlice),
        Just(OrchestratorState::SliceStreaming),
    ]
}

#[test]
fn every_state_can_reach_idle_again() {
    for from in OrchestratorState::ALL {
        let mut seen = vec![from];
        let mut frontier = vec![from];
        while let Some(state) = frontier.pop() {
            for next in allowed_transitions(state) {
                if !seen.contains(next) {
                    seen.push(*next);
                    frontier.push(*next);
                }
            }
        }
        assert!(
            from == OrchestratorState::Idle || seen.contains(&OrchestratorState::Idle),
            "{from} cannot return to idle"
        );
    }
}

#[test]
fn streaming_states_reject_visualization_requests() {
    for state in OrchestratorState::ALL.into_iter().filter(|s| s.is_streaming()) {
        assert!(validate_transition(state, OrchestratorState::AwaitingVisualization).is_err());
    }
}

proptest! {
    #[test]
    fn prop_validation_agrees_with_allowed(from in state(), to in state()) {
        let allowed = allowed_transitions(from);

        if validate_transition(from, to).is_ok() {
            prop_assert!(allowed.contains(&to));
        } else {
            prop_assert!(!allowed.contains(&to));
        }
    }

    #[test]
    fn prop_progress_is_last_write_clamped(
        reports in prop::collection::vec((0usize..4, -0.5f64..1.5), 1..40)
    ) {
        let mut view = ProgressView::new();
        for (step, fraction) in &reports {
            view.record(format!("step{step}"), *fraction);
        }

        for step in 0..4 {
            let name = format!("step{step}");
            let last = reports.iter().rev().find(|(s, _)| *s == step).map(|(_, f)| f.clamp(0.0, 1.0));
            prop_assert_eq!(view.fraction(&name), last);
        }
    }
}
