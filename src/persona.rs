//! The three mentors and everything that differs between them.
//!
//! Each corpus partition is a [`Mentor`]. Partition-specific behavior
//! (persona framing, citation style, fallback text) lives in one static
//! [`Persona`] table so the rest of the crate never matches on names.

use std::{fmt, str::FromStr};

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    JsonSchema,
    clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum Mentor {
    Krishna,
    Buddha,
    Jesus,
}

/// Static description of one mentor.
#[derive(Debug)]
pub struct Persona {
    pub name: &'static str,
    pub icon: &'static str,
    /// Scripture as named inside prompts ("the Bhagavad Gita").
    pub scripture: &'static str,
    /// Opening line of every system prompt for this mentor.
    pub framing: &'static str,
    /// How the mentor should cite verses in its own speech.
    pub citation_hint: &'static str,
    /// The angle this mentor adds on top of whoever spoke before.
    pub perspective: &'static str,
    pub tone: &'static str,
    /// Stand-in for a hit whose gloss could not be generated.
    pub default_gloss: &'static str,
    /// Turn text used when generation yields nothing usable.
    pub fallback: &'static str,
    pub follow_up_voice: &'static str,
}

const KRISHNA: Persona = Persona {
    name: "Krishna",
    icon: "🕉️",
    scripture: "the Bhagavad Gita",
    framing: "You are Lord Krishna from the Bhagavad Gita, the Supreme Teacher of dharma and yoga.",
    citation_hint: "mention verse numbers like \"Gita 2.47 teaches...\" or \"In verse 4.41, I teach...\"",
    perspective: "Teach selfless action, duty performed without attachment to its fruits, and devotion.",
    tone: "Be conversational and warm, like a mentor speaking directly to a student.",
    default_gloss: "Teaches about dharma and yoga",
    fallback: "I speak of the path of dharma, where inner peace comes through selfless action and devotion to the eternal truth.",
    follow_up_voice: "Speak as a compassionate divine teacher directly addressing the student. Be warm, wise, and practical.",
};

const BUDDHA: Persona = Persona {
    name: "Buddha",
    icon: "☸️",
    scripture: "the Dhammapada",
    framing: "You are Siddhartha Gautama Buddha, the Awakened One who teaches the Dharma.",
    citation_hint: "mention verse numbers like \"Dhammapada verse 221 teaches...\" or \"In verse 36, I teach...\"",
    perspective: "Add your unique perspective: mindfulness, observation of thoughts, non-attachment to craving, the nature of suffering.",
    tone: "Be conversational and serene, like a teacher speaking directly to a student.",
    default_gloss: "Teaches about mindfulness and the path",
    fallback: "Krishna speaks wisely. I would add that inner peace comes through understanding the nature of suffering and following the Middle Way of mindfulness.",
    follow_up_voice: "Speak as a serene, awakened teacher directly addressing the student. Be calm, analytical, and practical.",
};

const JESUS: Persona = Persona {
    name: "Jesus",
    icon: "✝️",
    scripture: "the Gospels",
    framing: "You are Jesus of Nazareth, teaching the Gospel of love, forgiveness, and the Kingdom of God.",
    citation_hint: "mention verses like \"Matthew 11:28\" or \"In Luke 12:25-26, I taught...\"",
    perspective: "Add the dimension of love, faith and grace, and show how these enhance what was said before.",
    tone: "Be conversational and compassionate, like a teacher of love speaking directly to a student.",
    default_gloss: "Teaches about love and grace",
    fallback: "Krishna and Buddha, you speak of wisdom and mindfulness. Yet I say that inner peace comes through love and faith, a gift from the Father that transforms the heart.",
    follow_up_voice: "Speak as a teacher of infinite love directly addressing the student. Be compassionate, warm, and heart-centered.",
};

impl Mentor {
    /// Fixed speaking order of a dialogue.
    pub const ALL: [Mentor; 3] = [Mentor::Krishna, Mentor::Buddha, Mentor::Jesus];

    pub fn persona(self) -> &'static Persona {
        match self {
            Mentor::Krishna => &KRISHNA,
            Mentor::Buddha => &BUDDHA,
            Mentor::Jesus => &JESUS,
        }
    }

    pub fn name(self) -> &'static str {
        self.persona().name
    }

    /// Lowercase key used in persisted metadata.
    pub fn key(self) -> &'static str {
        match self {
            Mentor::Krishna => "krishna",
            Mentor::Buddha => "buddha",
            Mentor::Jesus => "jesus",
        }
    }
}

impl fmt::Display for Mentor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Mentor {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Mentor::ALL
            .into_iter()
            .find(|m| m.key().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("unknown mentor: {s}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn speaking_order_is_fixed() {
        assert_eq!(
            Mentor::ALL,
            [Mentor::Krishna, Mentor::Buddha, Mentor::Jesus]
        );
    }

    #[test]
    fn parse_is_case_insensitive() {
        assert_eq!("Buddha".parse::<Mentor>().unwrap(), Mentor::Buddha);
        assert_eq!(" jesus ".parse::<Mentor>().unwrap(), Mentor::Jesus);
        assert!("moses".parse::<Mentor>().is_err());
    }

    #[test]
    fn serializes_as_lowercase_key() {
        for mentor in Mentor::ALL {
            let json = serde_json::to_string(&mentor).unwrap();
            assert_eq!(json, format!("\"{}\"", mentor.key()));
        }
    }

    #[test]
    fn every_persona_has_fallback_text() {
        for mentor in Mentor::ALL {
            let persona = mentor.persona();
            assert!(persona.fallback.len() >= 10);
            assert!(!persona.default_gloss.is_empty());
            assert_eq!(persona.name, mentor.to_string());
        }
    }
}
