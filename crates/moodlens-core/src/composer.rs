//! Opening-message composition for the chat companion.
//!
//! Picks one template per detected emotion at random. The RNG is injected so
//! tests can fix a seed; presentation only, nothing here is safety-critical.

use crate::labels::Emotion;
use rand::seq::SliceRandom;
use rand::Rng;

/// Confidence below this appends the low-confidence disclaimer.
pub const LOW_CONFIDENCE_THRESHOLD: f32 = 0.5;

/// Appended whenever no face was found and the full frame was analyzed.
pub const NO_FACE_DISCLAIMER: &str =
    "(I couldn't spot a face, so I read the whole picture instead)";

fn templates(emotion: Emotion) -> &'static [&'static str; 3] {
    match emotion {
        Emotion::Happiness => &[
            "You look really happy! Good news? Tell me everything!",
            "Love seeing that smile! What made your day special?",
            "You seem so cheerful! Want to share the joy?",
        ],
        Emotion::Sadness => &[
            "You look a little sad. Want to talk about it? I'm listening...",
            "Something weighing on your mind? Feel free to vent.",
            "It's okay to feel down. Let's talk it through.",
        ],
        Emotion::Anger => &[
            "Seems like something got under your skin. What happened?",
            "You look upset. Let's talk it over, no rush.",
            "I'm here to listen. What's been so frustrating?",
        ],
        Emotion::Fear => &[
            "You look worried. Is something scaring you? Tell me about it...",
            "Something making you anxious? Want to share what's on your mind?",
            "It's okay to feel afraid. How can I help?",
        ],
        Emotion::Surprise => &[
            "Whoa, something caught you off guard! What happened?",
            "You look surprised! Something unexpected? Tell me!",
            "Something interesting going on? Now I'm curious!",
        ],
        Emotion::Disgust => &[
            "Something's bothering you, isn't it? Want to talk?",
            "Looks like something's on your mind. What happened?",
            "Something left a bad taste? Let's talk it over.",
        ],
        Emotion::Neutral => &[
            "Hi! How's your day going?",
            "Hello! Anything you'd like to talk about?",
            "Hey! I'm here if you need someone to chat with.",
        ],
    }
}

/// Build the disclaimer text reporting a low numeric confidence.
pub fn low_confidence_disclaimer(confidence: f32) -> String {
    format!(
        "(Confidence {:.1}%, your expression was a bit ambiguous)",
        confidence * 100.0
    )
}

/// Compose the companion's opening message with the default RNG.
pub fn compose(emotion: Emotion, confidence: f32, face_found: bool) -> String {
    compose_with_rng(&mut rand::thread_rng(), emotion, confidence, face_found)
}

/// Compose with an injected RNG; fix the seed for deterministic output.
///
/// The two disclaimers are independent and may both appear.
pub fn compose_with_rng<R: Rng + ?Sized>(
    rng: &mut R,
    emotion: Emotion,
    confidence: f32,
    face_found: bool,
) -> String {
    let options = templates(emotion);
    let mut message = options
        .choose(rng)
        .copied()
        .unwrap_or(options[0])
        .to_string();

    if !face_found {
        message.push_str("\n\n");
        message.push_str(NO_FACE_DISCLAIMER);
    }

    if confidence < LOW_CONFIDENCE_THRESHOLD {
        message.push_str("\n\n");
        message.push_str(&low_confidence_disclaimer(confidence));
    }

    message
}
