//! Built-in templates, used when no template file is supplied.

use super::{PhaseDefinition, SessionTemplate};
use crate::session::Intensity;

/// The stock template set: a gentle breathing session, a longer progressive
/// relaxation, and a short, brisk focus reset.
pub fn default_templates() -> Vec<SessionTemplate> {
    vec![guided_breathing(), progressive_relaxation(), focus_reset()]
}

fn guided_breathing() -> SessionTemplate {
    SessionTemplate::new(
        "guided_breathing",
        "Guided Breathing",
        vec![
            PhaseDefinition::new(
                "settle",
                120,
                [
                    "Find a comfortable position and let your shoulders drop.",
                    "Start breathing through your nose at a natural pace.",
                    "Notice where the breath moves in your body.",
                ],
            ),
            PhaseDefinition::new(
                "box_breathing",
                240,
                [
                    "Breathe in for a count of four.",
                    "Hold for a count of four.",
                    "Breathe out for a count of four.",
                    "Hold empty for a count of four, then repeat.",
                ],
            ),
            PhaseDefinition::new(
                "long_exhale",
                120,
                [
                    "Keep the inhale at four counts and stretch the exhale to six.",
                    "Let each exhale soften your jaw and hands.",
                ],
            ),
            PhaseDefinition::new(
                "body_scan",
                90,
                [
                    "Bring your attention to your feet and legs.",
                    "Move your attention up through your chest and arms.",
                    "Rest your attention on your face and forehead.",
                ],
            ),
            PhaseDefinition::new(
                "return",
                30,
                ["Let your breathing return to its own rhythm and open your eyes."],
            ),
        ],
    )
    .with_description("A gentle, guided breathing session for beginners")
    .with_intensity(Intensity::Low)
    .with_encouragements(["Nicely done", "Stay with it", "You're doing well"])
}

fn progressive_relaxation() -> SessionTemplate {
    SessionTemplate::new(
        "progressive_relaxation",
        "Progressive Relaxation",
        vec![
            PhaseDefinition::new(
                "arrive",
                120,
                [
                    "Lie down or sit back and close your eyes.",
                    "Take three slow, full breaths.",
                ],
            ),
            PhaseDefinition::new(
                "hands_and_arms",
                180,
                [
                    "Make fists and tense your forearms for five seconds.",
                    "Release and notice the warmth in your hands.",
                    "Press your elbows down, hold, and let go.",
                ],
            ),
            PhaseDefinition::new(
                "shoulders_and_neck",
                180,
                [
                    "Lift your shoulders toward your ears and hold.",
                    "Drop them and let the neck lengthen.",
                    "Maintain the release as you breathe out.",
                ],
            ),
            PhaseDefinition::new(
                "face",
                120,
                [
                    "Scrunch your face tight, then let every muscle go.",
                    "Relax the space between your eyebrows.",
                ],
            ),
            PhaseDefinition::new(
                "legs_and_feet",
                180,
                [
                    "Point your toes and tense your calves.",
                    "Release and feel the legs grow heavy.",
                    "Press your heels down, hold, and let go.",
                ],
            ),
            PhaseDefinition::new(
                "whole_body",
                120,
                [
                    "Scan from head to toe and release any leftover tension.",
                    "Keep breathing slowly and rest in the stillness.",
                ],
            ),
            PhaseDefinition::new(
                "wake",
                60,
                [
                    "Wiggle your fingers and toes.",
                    "Open your eyes when you are ready.",
                ],
            ),
        ],
    )
    .with_description("Tense and release each muscle group in turn")
    .with_intensity(Intensity::Medium)
    .with_encouragements(["Good", "Let it go", "That's it"])
}

fn focus_reset() -> SessionTemplate {
    SessionTemplate::new(
        "focus_reset",
        "Focus Reset",
        vec![
            PhaseDefinition::new(
                "ground",
                60,
                ["Sit upright and plant both feet on the floor."],
            ),
            PhaseDefinition::new(
                "energise",
                120,
                [
                    "Breathe in sharply through the nose, out through the mouth.",
                    "Continue the quick breaths and keep your spine tall.",
                ],
            ),
            PhaseDefinition::new(
                "hold",
                60,
                ["Take a deep breath in and hold it for as long as is comfortable."],
            ),
            PhaseDefinition::new(
                "recover",
                30,
                ["Exhale fully and let your breathing settle."],
            ),
            PhaseDefinition::new(
                "intention",
                90,
                [
                    "Picture the next task you want to work on.",
                    "Name the first small step out loud.",
                ],
            ),
            PhaseDefinition::new(
                "launch",
                120,
                [
                    "Maintain that picture while you breathe evenly.",
                    "Open your eyes and start on that first step.",
                ],
            ),
        ],
    )
    .with_description("A short, brisk session to reset attention")
    .with_intensity(Intensity::High)
    .with_encouragements(["Sharp", "Stay alert", "Keep going"])
}
