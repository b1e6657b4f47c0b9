use serde::Serialize;

use crate::db::CharacterProfile;

/// Hard bounds on the affection level.
pub const MIN_AFFECTION: f64 = 0.0;
pub const MAX_AFFECTION: f64 = 100.0;

/// The largest swing a single message can cause, before clamping to the
/// level bounds.
pub const MAX_DELTA_PER_MESSAGE: f64 = 6.0;

/// Messages the character writes itself count for less than what the user
/// writes, so the character cannot talk its own affection up.
const USER_WEIGHT: f64 = 1.0;
const CHARACTER_WEIGHT: f64 = 0.4;

/// Contribution of one matched cue before weighting.
const CUE_STEP: f64 = 4.0;

const AFFECTIONATE_CUES: &[&str] = &[
    "love",
    "adore",
    "miss you",
    "thank",
    "appreciate",
    "wonderful",
    "amazing",
    "sweet",
    "happy",
    "like you",
    "cute",
    "beautiful",
    "great",
];

const HOSTILE_CUES: &[&str] = &[
    "hate",
    "stupid",
    "shut up",
    "awful",
    "terrible",
    "annoying",
    "boring",
    "leave me alone",
    "ugly",
    "worst",
    "angry",
];

/// Result of running one message through the engine. Relationship context
/// and history are deliberately absent: they only change through explicit
/// user edits, never through conversation.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AffectionUpdate {
    pub affection_level: f64,
    pub mood: String,
}

/// Map a message and the current relationship state to the next state.
///
/// Pure and infallible: no input can make it panic, and a message with no
/// recognizable cues returns the state unchanged (mood is still normalized
/// from the level, so a stored out-of-band level settles onto the scale).
pub fn adjust_affection(
    profile: &CharacterProfile,
    message: &str,
    is_from_user: bool,
) -> AffectionUpdate {
    let delta = message_delta(profile, message, is_from_user);
    let level = (profile.affection_level + delta).clamp(MIN_AFFECTION, MAX_AFFECTION);
    AffectionUpdate {
        affection_level: level,
        mood: mood_for_level(level).to_string(),
    }
}

/// Signed, weighted, per-message-bounded affection delta.
pub fn message_delta(profile: &CharacterProfile, message: &str, is_from_user: bool) -> f64 {
    let text = message.to_lowercase();

    let positive = AFFECTIONATE_CUES
        .iter()
        .filter(|cue| text.contains(*cue))
        .count() as f64;
    let mut negative = HOSTILE_CUES
        .iter()
        .filter(|cue| text.contains(*cue))
        .count() as f64;

    // A character's stated dealbreakers are hostile cues for that character.
    negative += profile
        .dealbreaker_tags
        .iter()
        .filter(|tag| !tag.trim().is_empty() && text.contains(&tag.to_lowercase()))
        .count() as f64;

    let weight = if is_from_user {
        USER_WEIGHT
    } else {
        CHARACTER_WEIGHT
    };

    ((positive - negative) * CUE_STEP * weight).clamp(-MAX_DELTA_PER_MESSAGE, MAX_DELTA_PER_MESSAGE)
}

/// Mood label derived from the affection level via fixed thresholds.
pub fn mood_for_level(level: f64) -> &'static str {
    if level < 20.0 {
        "Upset"
    } else if level < 40.0 {
        "Wary"
    } else if level < 60.0 {
        "Neutral"
    } else if level < 80.0 {
        "Happy"
    } else {
        "Affectionate"
    }
}

// ============================================
// Tests
// ============================================

#[cfg(test)]
mod tests {
    use super::*;

    fn profile_at(level: f64) -> CharacterProfile {
        CharacterProfile {
            affection_level: level,
            mood: mood_for_level(level).to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn affectionate_user_message_raises_level() {
        let profile = profile_at(50.0);
        let update = adjust_affection(&profile, "I love spending time with you", true);
        // One affectionate cue at full user weight.
        assert_eq!(update.affection_level, 54.0);
        assert_eq!(update.mood, "Neutral");
    }

    #[test]
    fn crossing_the_threshold_flips_mood() {
        let profile = profile_at(57.0);
        let update = adjust_affection(&profile, "I love spending time with you", true);
        assert_eq!(update.affection_level, 61.0);
        assert_eq!(update.mood, "Happy");
    }

    #[test]
    fn hostile_message_lowers_level() {
        let profile = profile_at(50.0);
        let update = adjust_affection(&profile, "you are so annoying", true);
        assert_eq!(update.affection_level, 46.0);
        assert_eq!(update.mood, "Neutral");
    }

    #[test]
    fn character_replies_are_weighted_down() {
        let profile = profile_at(50.0);
        let from_user = adjust_affection(&profile, "thank you for today", true);
        let from_character = adjust_affection(&profile, "thank you for today", false);
        assert_eq!(from_user.affection_level, 54.0);
        assert_eq!(from_character.affection_level, 51.6);
    }

    #[test]
    fn delta_is_bounded_per_message() {
        let profile = profile_at(50.0);
        let gushing =
            "love love adore amazing wonderful sweet cute beautiful great happy thank appreciate";
        let update = adjust_affection(&profile, gushing, true);
        assert_eq!(update.affection_level, 50.0 + MAX_DELTA_PER_MESSAGE);

        let hateful = "hate hate stupid awful terrible annoying boring ugly worst angry";
        let update = adjust_affection(&profile, hateful, true);
        assert_eq!(update.affection_level, 50.0 - MAX_DELTA_PER_MESSAGE);
    }

    #[test]
    fn level_clamps_to_bounds() {
        let high = profile_at(99.0);
        let update = adjust_affection(&high, "I love you, you are amazing and wonderful", true);
        assert_eq!(update.affection_level, MAX_AFFECTION);
        assert_eq!(update.mood, "Affectionate");

        let low = profile_at(1.0);
        let update = adjust_affection(&low, "I hate you, you are awful and terrible", true);
        assert_eq!(update.affection_level, MIN_AFFECTION);
        assert_eq!(update.mood, "Upset");
    }

    #[test]
    fn dealbreaker_tags_count_as_hostile_cues() {
        let mut profile = profile_at(50.0);
        profile.dealbreaker_tags = vec!["pineapple pizza".into()];
        let update = adjust_affection(&profile, "I ordered pineapple pizza for us", true);
        assert_eq!(update.affection_level, 46.0);
    }

    #[test]
    fn neutral_message_leaves_state_unchanged() {
        let profile = profile_at(42.5);
        let update = adjust_affection(&profile, "what time is it?", true);
        assert_eq!(update.affection_level, 42.5);
        assert_eq!(update.mood, "Neutral");
    }

    #[test]
    fn odd_input_never_panics() {
        let profile = profile_at(50.0);
        for text in ["", " ", "\u{1F600}\u{1F600}\u{1F600}", "日本語のテキスト"] {
            let update = adjust_affection(&profile, text, true);
            assert!(update.affection_level >= MIN_AFFECTION);
            assert!(update.affection_level <= MAX_AFFECTION);
        }

        // Out-of-band stored level settles back into bounds.
        let broken = profile_at(250.0);
        let update = adjust_affection(&broken, "hello", true);
        assert_eq!(update.affection_level, MAX_AFFECTION);
    }

    #[test]
    fn mood_thresholds() {
        assert_eq!(mood_for_level(0.0), "Upset");
        assert_eq!(mood_for_level(19.9), "Upset");
        assert_eq!(mood_for_level(20.0), "Wary");
        assert_eq!(mood_for_level(40.0), "Neutral");
        assert_eq!(mood_for_level(60.0), "Happy");
        assert_eq!(mood_for_level(80.0), "Affectionate");
        assert_eq!(mood_for_level(100.0), "Affectionate");
    }
}
