//! Human-readable workspace handles such as `swift-falcon-glide`.

use rand::rngs::OsRng;
use rand::TryRngCore;

use crate::error::{Error, Result};

pub const MAX_HANDLE_ATTEMPTS: usize = 100;

const ADJECTIVES: &[&str] = &[
    "amber", "bold", "brisk", "calm", "clever", "crisp", "dapper", "eager", "fancy", "fuzzy",
    "gentle", "glossy", "happy", "hazy", "jolly", "keen", "lively", "lucky", "mellow", "misty",
    "nimble", "noble", "plucky", "polite", "quiet", "rapid", "rosy", "rustic", "sandy", "shiny",
    "silent", "sleek", "snowy", "steady", "sunny", "swift", "tidy", "vivid", "witty", "zesty",
];

const NOUNS: &[&str] = &[
    "badger", "beacon", "canyon", "comet", "cedar", "delta", "ember", "falcon", "fern", "forest",
    "glacier", "harbor", "heron", "island", "lantern", "lynx", "maple", "meadow", "nebula",
    "orchid", "otter", "panther", "pebble", "pine", "quartz", "raven", "river", "rocket", "sailor",
    "salmon", "spruce", "summit", "thistle", "tiger", "tundra", "valley", "walrus", "willow",
    "yak", "zephyr",
];

const VERBS: &[&str] = &[
    "bounce", "build", "carve", "chase", "climb", "dance", "dash", "dive", "drift", "dream",
    "float", "fly", "forge", "gather", "glide", "grow", "hop", "hum", "jump", "kindle", "leap",
    "linger", "march", "mend", "paint", "roam", "row", "run", "sail", "scout", "sing", "skate",
    "soar", "spin", "sprint", "swim", "swing", "trek", "wander", "weave",
];

/// Picks handles from three word lists using the operating system's
/// cryptographically secure random source.
#[derive(Debug, Clone, Copy)]
pub struct HandleGenerator {
    adjectives: &'static [&'static str],
    nouns: &'static [&'static str],
    verbs: &'static [&'static str],
}

impl Default for HandleGenerator {
    fn default() -> Self {
        Self {
            adjectives: ADJECTIVES,
            nouns: NOUNS,
            verbs: VERBS,
        }
    }
}

impl HandleGenerator {
    pub fn with_words(
        adjectives: &'static [&'static str],
        nouns: &'static [&'static str],
        verbs: &'static [&'static str],
    ) -> Self {
        Self {
            adjectives,
            nouns,
            verbs,
        }
    }

    /// One random `adjective-noun-verb` handle.
    pub fn generate(&self) -> Result<String> {
        let adjective = pick(self.adjectives, "adjective")?;
        let noun = pick(self.nouns, "noun")?;
        let verb = pick(self.verbs, "verb")?;
        Ok(format!("{adjective}-{noun}-{verb}"))
    }

    /// First generated handle for which `exists` returns false, trying at
    /// most [`MAX_HANDLE_ATTEMPTS`] times.
    pub fn generate_unique<F>(&self, mut exists: F) -> Result<String>
    where
        F: FnMut(&str) -> bool,
    {
        for attempt in 0..MAX_HANDLE_ATTEMPTS {
            let handle = self.generate()?;
            if !exists(&handle) {
                return Ok(handle);
            }
            log::debug!("handle '{handle}' taken (attempt {})", attempt + 1);
        }
        Err(Error::HandleExhausted(MAX_HANDLE_ATTEMPTS))
    }
}

fn pick(words: &'static [&'static str], list: &str) -> Result<&'static str> {
    if words.is_empty() {
        return Err(Error::Validation(format!("{list} word list is empty")));
    }
    let value = OsRng
        .try_next_u64()
        .map_err(|e| Error::io("reading OS random source", std::io::Error::other(e.to_string())))?;
    Ok(words[(value % words.len() as u64) as usize])
}
