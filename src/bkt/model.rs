//! Bayesian Knowledge Tracing math
//!
//! Pure functions over `BktParameters`:
//! - difficulty-derived priors for a fresh (user, skill) pair
//! - posterior mastery after a correct/incorrect observation
//! - learning-opportunity boost (applied on failures only)
//! - contextual adjustment of slip/guess/learning rate for future updates

use chrono::{DateTime, Utc};

use crate::bkt::types::{clamp_probability, BktParameters, ErrorType, ObservationContext, Skill};

pub const DEFAULT_LEARNING_RATE: f64 = 0.3;
pub const INITIAL_CONFIDENCE: f64 = 0.5;
pub const MAX_CONFIDENCE: f64 = 0.95;
pub const CONFIDENCE_STEP: f64 = 0.05;
/// Assumed mastery of a prerequisite that has no record yet.
pub const UNSEEN_PREREQUISITE_MASTERY: f64 = 0.1;

const QUICK_RESPONSE_MS: i64 = 5_000;
const SLOW_RESPONSE_MS: i64 = 30_000;

/// Mastery assumed for a skill nobody has observed: `max(0.05, 0.3 - d*0.2)`.
pub fn default_prior(difficulty: f64) -> f64 {
    (0.3 - difficulty * 0.2).max(0.05)
}

pub fn default_slip(difficulty: f64) -> f64 {
    clamp_probability(0.1 + difficulty * 0.1)
}

pub fn default_guess(difficulty: f64) -> f64 {
    (0.2 - difficulty * 0.15).max(0.05)
}

/// Fresh parameters for `skill`.
///
/// `prerequisite_masteries` holds one entry per prerequisite, `None` for a
/// prerequisite the user has no record for (counted as
/// [`UNSEEN_PREREQUISITE_MASTERY`]).
pub fn initial_parameters(
    user_id: &str,
    skill: &Skill,
    prerequisite_masteries: &[Option<f64>],
    now: DateTime<Utc>,
) -> BktParameters {
    let prior = default_prior(skill.difficulty);

    let prereq_avg = if prerequisite_masteries.is_empty() {
        0.0
    } else {
        let sum: f64 = prerequisite_masteries
            .iter()
            .map(|m| m.unwrap_or(UNSEEN_PREREQUISITE_MASTERY))
            .sum();
        sum / prerequisite_masteries.len() as f64
    };

    let adjusted_prior = clamp_probability((prior + prereq_avg * 0.2).min(0.8));

    BktParameters {
        user_id: user_id.to_string(),
        skill_id: skill.skill_id.clone(),
        prior_knowledge: adjusted_prior,
        learning_rate: DEFAULT_LEARNING_RATE,
        slip_probability: default_slip(skill.difficulty),
        guess_probability: default_guess(skill.difficulty),
        current_mastery: adjusted_prior,
        confidence: INITIAL_CONFIDENCE,
        observation_count: 0,
        last_updated: now,
    }
}

/// P(L | observation) by Bayes' rule. A zero denominator leaves `p` as is.
pub fn posterior_mastery(p: f64, slip: f64, guess: f64, success: bool) -> f64 {
    let (numerator, denominator) = if success {
        let numerator = (1.0 - slip) * p;
        (numerator, numerator + guess * (1.0 - p))
    } else {
        let numerator = slip * p;
        (numerator, numerator + (1.0 - guess) * (1.0 - p))
    };

    if denominator > 0.0 {
        numerator / denominator
    } else {
        p
    }
}

pub fn learning_boost(p: f64, learning_rate: f64) -> f64 {
    p + learning_rate * (1.0 - p)
}

pub fn confidence_for(observation_count: i64) -> f64 {
    (INITIAL_CONFIDENCE + observation_count.max(0) as f64 * CONFIDENCE_STEP).min(MAX_CONFIDENCE)
}

/// P(correct) = (1 - slip) * m + guess * (1 - m)
pub fn predict_success(params: &BktParameters) -> f64 {
    let m = params.current_mastery;
    clamp_probability((1.0 - params.slip_probability) * m + params.guess_probability * (1.0 - m))
}

/// Folds one observation into `params`.
///
/// The posterior uses the slip/guess values in effect *before* this
/// observation; the contextual adjustment only shapes later updates.
pub fn apply_observation(
    params: BktParameters,
    success: bool,
    context: &ObservationContext,
    now: DateTime<Utc>,
) -> BktParameters {
    let mut next = params;

    let posterior = posterior_mastery(
        next.current_mastery,
        next.slip_probability,
        next.guess_probability,
        success,
    );
    let boosted = if success {
        posterior
    } else {
        learning_boost(posterior, next.learning_rate)
    };
    next.current_mastery = clamp_probability(boosted);

    next.observation_count = next.observation_count.max(0) + 1;
    next.confidence = confidence_for(next.observation_count);

    let mut next = apply_context(next, context, success);
    next.last_updated = now;
    next.sanitized()
}

/// Contextual adjuster.
///
/// - typo: slips are likelier than the estimate assumed, `slip *= 1.2`
/// - conceptual error: a real gap, `slip *= 0.8` (floor 0.05)
/// - help received: `learning_rate *= 1.3`
/// - quick (< 5s) success: `slip *= 0.9` (floor 0.01)
/// - slow (> 30s) response: `guess *= 1.1` (floor 0.05)
pub fn apply_context(
    mut params: BktParameters,
    context: &ObservationContext,
    success: bool,
) -> BktParameters {
    match context.error_type {
        Some(ErrorType::Typo) => {
            params.slip_probability = (params.slip_probability * 1.2).min(1.0);
        }
        Some(ErrorType::Conceptual) => {
            params.slip_probability = (params.slip_probability * 0.8).max(0.05);
        }
        Some(ErrorType::Other) | None => {}
    }

    if context.help_received {
        params.learning_rate = (params.learning_rate * 1.3).min(1.0);
    }

    if let Some(millis) = context.response_time_ms {
        if millis < QUICK_RESPONSE_MS && success {
            params.slip_probability = (params.slip_probability * 0.9).max(0.01);
        } else if millis > SLOW_RESPONSE_MS {
            params.guess_probability = (params.guess_probability * 1.1).max(0.05);
        }
    }

    params.sanitized()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bkt::types::SkillType;

    fn params(p: f64, slip: f64, guess: f64, lr: f64) -> BktParameters {
        BktParameters {
            user_id: "u".to_string(),
            skill_id: "s".to_string(),
            prior_knowledge: p,
            learning_rate: lr,
            slip_probability: slip,
            guess_probability: guess,
            current_mastery: p,
            confidence: INITIAL_CONFIDENCE,
            observation_count: 0,
            last_updated: Utc::now(),
        }
    }

    fn skill(difficulty: f64, prerequisites: &[&str]) -> Skill {
        Skill {
            skill_id: "s".to_string(),
            name: "S".to_string(),
            skill_type: SkillType::Command,
            prerequisites: prerequisites.iter().map(|s| s.to_string()).collect(),
            difficulty,
            learning_objectives: Vec::new(),
            examples: Vec::new(),
        }
    }

    #[test]
    fn test_success_update_matches_hand_computation() {
        let updated = apply_observation(
            params(0.1, 0.1, 0.1, 0.3),
            true,
            &ObservationContext::default(),
            Utc::now(),
        );
        assert!((updated.current_mastery - 0.5).abs() < 1e-12);
        assert_eq!(updated.observation_count, 1);
        assert!((updated.confidence - 0.55).abs() < 1e-12);
    }

    #[test]
    fn test_failure_update_applies_learning_boost() {
        let updated = apply_observation(
            params(0.1, 0.1, 0.1, 0.3),
            false,
            &ObservationContext::default(),
            Utc::now(),
        );
        let posterior = 0.01 / 0.82;
        let expected = posterior + 0.3 * (1.0 - posterior);
        assert!((updated.current_mastery - expected).abs() < 1e-12);
        assert!((updated.current_mastery - 0.308537).abs() < 1e-6);
    }

    #[test]
    fn test_zero_denominator_keeps_mastery() {
        // p = 1, slip = 1: success denominator is 0
        assert_eq!(posterior_mastery(1.0, 1.0, 0.0, true), 1.0);
        // p = 0, guess = 1: failure denominator is 0
        assert_eq!(posterior_mastery(0.0, 0.0, 1.0, false), 0.0);
    }

    #[test]
    fn test_confidence_caps() {
        assert_eq!(confidence_for(0), 0.5);
        assert!((confidence_for(5) - 0.75).abs() < 1e-12);
        assert!((confidence_for(9) - 0.95).abs() < 1e-12);
        assert_eq!(confidence_for(500), 0.95);
    }

    #[test]
    fn test_initial_parameters_from_difficulty() {
        let p = initial_parameters("u", &skill(0.5, &[]), &[], Utc::now());
        assert!((p.prior_knowledge - 0.2).abs() < 1e-12);
        assert_eq!(p.current_mastery, p.prior_knowledge);
        assert!((p.slip_probability - 0.15).abs() < 1e-12);
        assert!((p.guess_probability - 0.125).abs() < 1e-12);
        assert_eq!(p.learning_rate, 0.3);
        assert_eq!(p.confidence, 0.5);
        assert_eq!(p.observation_count, 0);
    }

    #[test]
    fn test_initial_parameters_floor_for_hard_skills() {
        let p = initial_parameters("u", &skill(1.0, &[]), &[], Utc::now());
        assert!((p.prior_knowledge - 0.1).abs() < 1e-12);
        assert!((p.guess_probability - 0.05).abs() < 1e-12);
        assert!((p.slip_probability - 0.2).abs() < 1e-12);
    }

    #[test]
    fn test_prerequisite_average_uses_unseen_default() {
        // difficulty 0.5 -> prior 0.2; prereqs (0.9, unseen 0.1) avg 0.5 -> +0.1
        let p = initial_parameters("u", &skill(0.5, &["a", "b"]), &[Some(0.9), None], Utc::now());
        assert!((p.prior_knowledge - 0.3).abs() < 1e-12);
    }

    #[test]
    fn test_adjusted_prior_capped_at_point_eight() {
        let s = skill(0.0, &["a"]);
        // prior 0.3 + 1.0 * 0.2 = 0.5, under the cap
        let p = initial_parameters("u", &s, &[Some(1.0)], Utc::now());
        assert!((p.prior_knowledge - 0.5).abs() < 1e-12);
        assert!(p.prior_knowledge <= 0.8);
    }

    #[test]
    fn test_context_typo_and_conceptual() {
        let base = params(0.5, 0.5, 0.1, 0.3);
        let typo = ObservationContext::default().with_error_type(ErrorType::Typo);
        assert!((apply_context(base.clone(), &typo, false).slip_probability - 0.6).abs() < 1e-12);

        let saturated = params(0.5, 0.95, 0.1, 0.3);
        assert_eq!(apply_context(saturated, &typo, false).slip_probability, 1.0);

        let conceptual = ObservationContext::default().with_error_type(ErrorType::Conceptual);
        assert!((apply_context(base, &conceptual, false).slip_probability - 0.4).abs() < 1e-12);

        let floor = params(0.5, 0.05, 0.1, 0.3);
        assert_eq!(apply_context(floor, &conceptual, false).slip_probability, 0.05);
    }

    #[test]
    fn test_context_help_raises_learning_rate() {
        let ctx = ObservationContext::default().with_help();
        let adjusted = apply_context(params(0.5, 0.1, 0.1, 0.3), &ctx, false);
        assert!((adjusted.learning_rate - 0.39).abs() < 1e-12);

        let capped = apply_context(params(0.5, 0.1, 0.1, 0.9), &ctx, false);
        assert_eq!(capped.learning_rate, 1.0);
    }

    #[test]
    fn test_context_response_time() {
        let quick = ObservationContext::default().with_response_time_ms(1_500);
        let adjusted = apply_context(params(0.5, 0.2, 0.1, 0.3), &quick, true);
        assert!((adjusted.slip_probability - 0.18).abs() < 1e-12);

        // quick failure leaves slip alone
        let unchanged = apply_context(params(0.5, 0.2, 0.1, 0.3), &quick, false);
        assert_eq!(unchanged.slip_probability, 0.2);

        let slow = ObservationContext::default().with_response_time_ms(45_000);
        let adjusted = apply_context(params(0.5, 0.2, 0.1, 0.3), &slow, true);
        assert!((adjusted.guess_probability - 0.11).abs() < 1e-12);

        let middle = ObservationContext::default().with_response_time_ms(12_000);
        let adjusted = apply_context(params(0.5, 0.2, 0.1, 0.3), &middle, true);
        assert_eq!(adjusted.slip_probability, 0.2);
        assert_eq!(adjusted.guess_probability, 0.1);
    }

    #[test]
    fn test_adjustment_does_not_affect_current_posterior() {
        let ctx = ObservationContext::default().with_error_type(ErrorType::Typo);
        let with_ctx = apply_observation(params(0.1, 0.1, 0.1, 0.3), true, &ctx, Utc::now());
        assert!((with_ctx.current_mastery - 0.5).abs() < 1e-12);
        assert!((with_ctx.slip_probability - 0.12).abs() < 1e-12);
    }

    #[test]
    fn test_predict_success() {
        let p = params(0.5, 0.1, 0.2, 0.3);
        assert!((predict_success(&p) - (0.9 * 0.5 + 0.2 * 0.5)).abs() < 1e-12);
    }
}
