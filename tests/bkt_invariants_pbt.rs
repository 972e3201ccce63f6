//! Property-based tests for the tracing model
//!
//! - every probability stays in [0, 1] after any observation sequence
//! - confidence never decreases and never exceeds 0.95
//! - suggestions never include a skill with an unmet prerequisite
//! - priors for fresh parameters stay within [0.05, 0.8]

use std::collections::BTreeMap;

use chrono::Utc;
use proptest::prelude::*;

use nix_skill_tracer::bkt::model;
use nix_skill_tracer::bkt::{BktParameters, ErrorType, ObservationContext, SkillGraph};

// ============================================================================
// Arbitrary Generators
// ============================================================================

fn arb_f64_0_1() -> impl Strategy<Value = f64> {
    (0u64..=1000u64).prop_map(|v| v as f64 / 1000.0)
}

fn arb_parameters() -> impl Strategy<Value = BktParameters> {
    (
        arb_f64_0_1(), // mastery
        arb_f64_0_1(), // learning rate
        arb_f64_0_1(), // slip
        arb_f64_0_1(), // guess
    )
        .prop_map(|(mastery, learning_rate, slip, guess)| BktParameters {
            user_id: "u".to_string(),
            skill_id: "nix_env".to_string(),
            prior_knowledge: mastery,
            learning_rate,
            slip_probability: slip,
            guess_probability: guess,
            current_mastery: mastery,
            confidence: 0.5,
            observation_count: 0,
            last_updated: Utc::now(),
        })
}

fn arb_context() -> impl Strategy<Value = ObservationContext> {
    (
        prop_oneof![
            Just(None),
            Just(Some(ErrorType::Typo)),
            Just(Some(ErrorType::Conceptual)),
            Just(Some(ErrorType::Other)),
        ],
        any::<bool>(),
        proptest::option::of(0i64..=60_000),
    )
        .prop_map(|(error_type, help_received, response_time_ms)| ObservationContext {
            error_type,
            help_received,
            response_time_ms,
            command: None,
            intent: None,
        })
}

fn in_unit(v: f64) -> bool {
    (0.0..=1.0).contains(&v)
}

// ============================================================================
// Properties
// ============================================================================

proptest! {
    #[test]
    fn prop_probabilities_stay_in_unit_interval(
        start in arb_parameters(),
        steps in proptest::collection::vec((any::<bool>(), arb_context()), 1..40),
    ) {
        let mut params = start;
        let mut last_confidence = params.confidence;
        for (success, ctx) in &steps {
            params = model::apply_observation(params, *success, ctx, Utc::now());

            prop_assert!(in_unit(params.current_mastery));
            prop_assert!(in_unit(params.slip_probability));
            prop_assert!(in_unit(params.guess_probability));
            prop_assert!(in_unit(params.learning_rate));
            prop_assert!(params.confidence >= last_confidence);
            prop_assert!(params.confidence <= 0.95 + 1e-12);
            last_confidence = params.confidence;
        }
        prop_assert_eq!(params.observation_count, steps.len() as i64);
    }

    #[test]
    fn prop_predicted_success_in_unit_interval(params in arb_parameters()) {
        prop_assert!(in_unit(model::predict_success(&params)));
    }

    #[test]
    fn prop_suggestions_have_met_prerequisites(
        masteries in proptest::collection::vec(arb_f64_0_1(), 10),
        threshold in arb_f64_0_1(),
    ) {
        let graph = SkillGraph::nixos();
        let map: BTreeMap<String, f64> = graph
            .skills()
            .zip(masteries)
            .map(|(s, m)| (s.skill_id.clone(), m))
            .collect();

        for id in graph.suggest_next_skills(&map, threshold) {
            let skill = graph.skill(&id).unwrap();
            prop_assert!(map[&id] < threshold);
            prop_assert!(skill.prerequisites.iter().all(|p| map[p] >= threshold));
        }
    }

    #[test]
    fn prop_fresh_prior_is_bounded(
        difficulty in arb_f64_0_1(),
        prereqs in proptest::collection::vec(proptest::option::of(arb_f64_0_1()), 0..4),
    ) {
        let graph = SkillGraph::nixos();
        let mut skill = graph.skill("flakes").unwrap().clone();
        skill.difficulty = difficulty;

        let params = model::initial_parameters("u", &skill, &prereqs, Utc::now());
        prop_assert!(params.prior_knowledge >= 0.05 - 1e-12);
        prop_assert!(params.prior_knowledge <= 0.8 + 1e-12);
        prop_assert_eq!(params.prior_knowledge, params.current_mastery);
        prop_assert!(params.guess_probability >= 0.05 - 1e-12);
    }
}
