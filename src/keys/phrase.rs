//! Recovery phrase and PIN handling

use rand::rngs::OsRng;
use rand::RngCore;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use crate::error::{Error, Result};

use super::wordlist;

/// Words in a recovery phrase
pub const PHRASE_WORDS: usize = 12;

/// Digits in a PIN
pub const PIN_DIGITS: usize = 6;

/// Word positions asked for in a possession check
pub const CHALLENGE_POSITIONS: usize = 3;

/// A 12-word recovery phrase (96 bits of entropy)
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct RecoveryPhrase {
    words: Vec<String>,
}

impl RecoveryPhrase {
    /// Generate a fresh phrase from the OS random source
    pub fn generate() -> Self {
        let mut entropy = Zeroizing::new([0u8; PHRASE_WORDS]);
        OsRng.fill_bytes(&mut entropy[..]);
        Self::from_entropy(&entropy)
    }

    /// Encode entropy bytes as words
    pub fn from_entropy(entropy: &[u8; PHRASE_WORDS]) -> Self {
        Self {
            words: entropy
                .iter()
                .map(|b| wordlist::word(*b).to_string())
                .collect(),
        }
    }

    /// Parse user input: trims, lowercases and collapses whitespace
    pub fn parse(input: &str) -> Result<Self> {
        let words: Vec<String> = input
            .split_whitespace()
            .map(|w| w.to_lowercase())
            .collect();

        if words.len() != PHRASE_WORDS {
            return Err(Error::InvalidPhrase(format!(
                "expected {} words, got {}",
                PHRASE_WORDS,
                words.len()
            )));
        }

        if let Some(pos) = words.iter().position(|w| wordlist::index_of(w).is_none()) {
            return Err(Error::InvalidPhrase(format!(
                "word {} is not in the vocabulary",
                pos + 1
            )));
        }

        Ok(Self { words })
    }

    /// Entropy bytes encoded by this phrase
    pub fn entropy(&self) -> Zeroizing<[u8; PHRASE_WORDS]> {
        let mut out = Zeroizing::new([0u8; PHRASE_WORDS]);
        for (slot, word) in out.iter_mut().zip(&self.words) {
            // parse() and from_entropy() only admit vocabulary words
            *slot = wordlist::index_of(word).unwrap_or_default();
        }
        out
    }

    /// Words in order
    pub fn words(&self) -> &[String] {
        &self.words
    }

    /// Word at a 1-based position
    pub fn word_at(&self, position: usize) -> Option<&str> {
        position
            .checked_sub(1)
            .and_then(|i| self.words.get(i))
            .map(String::as_str)
    }

    /// Canonical single-space form, the input to key stretching
    pub fn normalized(&self) -> Zeroizing<String> {
        Zeroizing::new(self.words.join(" "))
    }
}

impl std::fmt::Debug for RecoveryPhrase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "RecoveryPhrase(***)")
    }
}

/// A 6-digit numeric PIN
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct Pin(String);

impl Pin {
    pub fn parse(input: &str) -> Result<Self> {
        let trimmed = input.trim();
        if trimmed.len() != PIN_DIGITS || !trimmed.chars().all(|c| c.is_ascii_digit()) {
            return Err(Error::InvalidPin(format!("expected {} digits", PIN_DIGITS)));
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for Pin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Pin(***)")
    }
}

/// Proof-of-possession check over three word positions
///
/// Lets a client show it holds the phrase without sending all of it. Three
/// words from a 256-word vocabulary are only 24 bits, so this is UX friction
/// reduction and not a defence against guessing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WordChallenge {
    positions: [usize; CHALLENGE_POSITIONS],
}

impl WordChallenge {
    /// Pick three distinct random positions
    pub fn random() -> Self {
        let picked = rand::seq::index::sample(&mut OsRng, PHRASE_WORDS, CHALLENGE_POSITIONS);
        let mut positions = [0usize; CHALLENGE_POSITIONS];
        for (slot, index) in positions.iter_mut().zip(picked.iter()) {
            *slot = index + 1;
        }
        positions.sort_unstable();
        Self { positions }
    }

    /// Use explicit 1-based positions
    pub fn new(mut positions: [usize; CHALLENGE_POSITIONS]) -> Result<Self> {
        positions.sort_unstable();
        let in_range = positions.iter().all(|p| (1..=PHRASE_WORDS).contains(p));
        let distinct = positions.windows(2).all(|w| w[0] != w[1]);
        if !in_range || !distinct {
            return Err(Error::InvalidPhrase(format!(
                "positions must be {} distinct values in 1..={}",
                CHALLENGE_POSITIONS, PHRASE_WORDS
            )));
        }
        Ok(Self { positions })
    }

    pub fn positions(&self) -> [usize; CHALLENGE_POSITIONS] {
        self.positions
    }

    /// Check answers given in position order
    pub fn verify(&self, phrase: &RecoveryPhrase, answers: &[&str]) -> bool {
        if answers.len() != CHALLENGE_POSITIONS {
            return false;
        }
        self.positions
            .iter()
            .zip(answers)
            .all(|(pos, answer)| phrase.word_at(*pos) == Some(answer.trim().to_lowercase().as_str()))
    }
}
