//! Intensity-dependent phrasing.
//!
//! Intensity never changes timing. It only colours the text: an occasional
//! modifier word woven into the instruction, and an occasional encouragement
//! from the template. With both chances at zero the output is the raw text.

use std::sync::LazyLock;

use rand::seq::SliceRandom;
use rand::Rng;
use regex::Regex;

use crate::session::Intensity;

static LEAD_VERBS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    ["continue", "keep", "maintain", "start"]
        .iter()
        .map(|verb| Regex::new(&format!(r"(?i)\b{verb}\b")).unwrap())
        .collect()
});

static PACE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)\bpace\b").unwrap());

const LOW: &[&str] = &["gently", "slowly", "softly", "lightly"];
const LOW_LATE: &[&str] = &["steadily", "calmly", "evenly"];
const MEDIUM: &[&str] = &["steadily", "evenly", "rhythmically", "smoothly"];
const MEDIUM_LATE: &[&str] = &["fully", "deliberately", "attentively"];
const HIGH: &[&str] = &["deeply", "firmly", "strongly", "powerfully"];
const HIGH_LATE: &[&str] = &["completely", "intently", "wholeheartedly"];

/// Modifier vocabulary for an intensity at a point in the session.
///
/// `position` is how far through the phase list the session is, in `[0, 1]`.
pub fn modifiers(intensity: Intensity, position: f64) -> &'static [&'static str] {
    match intensity {
        Intensity::Low if position > 0.8 => LOW_LATE,
        Intensity::Low => LOW,
        Intensity::Medium if position > 0.7 => MEDIUM_LATE,
        Intensity::Medium => MEDIUM,
        Intensity::High if position > 0.7 => HIGH_LATE,
        Intensity::High => HIGH,
    }
}

/// Weave `modifier` into `instruction`.
///
/// Placed before "pace", after a leading verb like "keep", or at the end.
/// Text that already contains the modifier is returned unchanged.
pub fn apply_modifier(instruction: &str, modifier: &str) -> String {
    if instruction.to_lowercase().contains(&modifier.to_lowercase()) {
        return instruction.to_string();
    }

    if PACE.is_match(instruction) {
        return PACE
            .replacen(instruction, 1, format!("{modifier} $0"))
            .into_owned();
    }

    for verb in LEAD_VERBS.iter() {
        if verb.is_match(instruction) {
            return verb
                .replacen(instruction, 1, format!("$0 {modifier}"))
                .into_owned();
        }
    }

    let body = instruction.trim_end_matches(['.', '!']);
    let tail = &instruction[body.len()..];
    format!("{body} {modifier}{tail}")
}

/// Append an encouragement as its own sentence.
pub fn append_encouragement(instruction: &str, encouragement: &str) -> String {
    let encouragement = encouragement.trim_end_matches(['.', '!']);
    if instruction.ends_with(['.', '!', '?']) {
        format!("{instruction} {encouragement}.")
    } else {
        format!("{instruction}. {encouragement}.")
    }
}

/// Decorate a raw instruction for delivery.
pub fn decorate<R: Rng + ?Sized>(
    instruction: &str,
    intensity: Intensity,
    position: f64,
    encouragements: &[String],
    encouragement_chance: f64,
    modifier_chance: f64,
    rng: &mut R,
) -> String {
    let mut text = instruction.to_string();

    if roll(rng, encouragement_chance) {
        if let Some(encouragement) = encouragements.choose(rng) {
            text = append_encouragement(&text, encouragement);
        }
    }

    if roll(rng, modifier_chance) {
        if let Some(modifier) = modifiers(intensity, position).choose(rng) {
            text = apply_modifier(&text, modifier);
        }
    }

    text
}

fn roll<R: Rng + ?Sized>(rng: &mut R, chance: f64) -> bool {
    if chance.is_nan() || chance <= 0.0 {
        return false;
    }
    rng.gen_bool(chance.min(1.0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    mod apply_modifier {
        use super::*;

        #[test]
        fn goes_before_pace() {
            assert_eq!(
                apply_modifier("Breathe at your own pace.", "slowly"),
                "Breathe at your own slowly pace."
            );
        }

        #[test]
        fn goes_after_leading_verb() {
            assert_eq!(
                apply_modifier("Keep breathing through the nose.", "gently"),
                "Keep gently breathing through the nose."
            );
        }

        #[test]
        fn appends_before_final_punctuation() {
            assert_eq!(
                apply_modifier("Breathe out for a count of four.", "evenly"),
                "Breathe out for a count of four evenly."
            );
        }

        #[test]
        fn appends_without_punctuation() {
            assert_eq!(apply_modifier("Relax", "fully"), "Relax fully");
        }

        #[test]
        fn leaves_text_already_containing_modifier() {
            let text = "Breathe slowly and deeply.";
            assert_eq!(apply_modifier(text, "Slowly"), text);
        }

        #[test]
        fn verb_must_be_whole_word() {
            assert_eq!(
                apply_modifier("Sit upright, keeper of calm.", "softly"),
                "Sit upright, keeper of calm softly."
            );
        }
    }

    mod encouragement {
        use super::*;

        #[test]
        fn joins_as_new_sentence() {
            assert_eq!(append_encouragement("Breathe in.", "Good"), "Breathe in. Good.");
            assert_eq!(append_encouragement("Breathe in", "Good."), "Breathe in. Good.");
        }
    }

    mod vocabulary {
        use super::*;

        #[test]
        fn late_session_shifts_words() {
            assert_ne!(modifiers(Intensity::Low, 0.1), modifiers(Intensity::Low, 0.9));
            assert_ne!(modifiers(Intensity::High, 0.1), modifiers(Intensity::High, 0.75));
        }

        #[test]
        fn low_threshold_is_later_than_medium() {
            assert_eq!(modifiers(Intensity::Low, 0.75), LOW);
            assert_eq!(modifiers(Intensity::Medium, 0.75), MEDIUM_LATE);
        }
    }

    mod decorate {
        use super::*;

        #[test]
        fn zero_chances_return_raw_text() {
            let mut rng = StdRng::seed_from_u64(7);
            let encouragements = vec!["Nice".to_string()];
            for _ in 0..50 {
                let text = decorate("Breathe in.", Intensity::High, 0.5, &encouragements, 0.0, 0.0, &mut rng);
                assert_eq!(text, "Breathe in.");
            }
        }

        #[test]
        fn certain_encouragement_is_appended() {
            let mut rng = StdRng::seed_from_u64(7);
            let encouragements = vec!["Nice".to_string()];
            let text = decorate("Breathe in.", Intensity::Low, 0.0, &encouragements, 1.0, 0.0, &mut rng);
            assert_eq!(text, "Breathe in. Nice.");
        }

        #[test]
        fn certain_modifier_comes_from_vocabulary() {
            let mut rng = StdRng::seed_from_u64(11);
            let text = decorate("Keep still.", Intensity::Medium, 0.0, &[], 1.0, 1.0, &mut rng);
            assert!(MEDIUM.iter().any(|m| text == format!("Keep {m} still.")), "{text}");
        }

        #[test]
        fn nan_chance_never_fires() {
            let mut rng = StdRng::seed_from_u64(3);
            let text = decorate("Rest.", Intensity::Low, 0.0, &[], f64::NAN, f64::NAN, &mut rng);
            assert_eq!(text, "Rest.");
        }
    }
}
