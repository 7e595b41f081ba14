//! Recovery phrase vocabulary
//!
//! 256 words, one per entropy byte. The order is part of the phrase format:
//! reordering or replacing a word changes every phrase that uses it.

use std::collections::HashMap;

/// Number of words in the vocabulary
pub const WORDLIST_LEN: usize = 256;

/// The vocabulary, indexed by entropy byte
pub const WORDLIST: [&str; WORDLIST_LEN] = [
    "alert", "amber", "anchor", "angle", "ankle", "apple", "apron", "armor",
    "arrow", "atlas", "attic", "audio", "autumn", "avocado", "awake", "badge",
    "bagel", "baker", "bamboo", "banana", "banjo", "barn", "basil", "basket",
    "beach", "beacon", "bean", "bear", "beaver", "bench", "berry", "bicycle",
    "bird", "biscuit", "blanket", "blossom", "boat", "bonus", "book", "border",
    "bottle", "boulder", "bracket", "brave", "bread", "breeze", "brick", "bridge",
    "broom", "bubble", "bucket", "buffalo", "bundle", "butter", "cabin", "cactus",
    "camel", "camera", "canal", "candle", "canoe", "canyon", "carbon", "carpet",
    "carrot", "castle", "cattle", "cedar", "cello", "chalk", "cherry", "chess",
    "chimney", "cinema", "circle", "citrus", "clay", "cliff", "clock", "cloud",
    "clover", "coast", "cobalt", "cocoa", "comet", "copper", "coral", "cotton",
    "cradle", "crane", "crater", "cricket", "crystal", "cube", "curtain", "cycle",
    "daisy", "dancer", "delta", "desert", "diamond", "dinner", "dolphin", "donkey",
    "dragon", "drum", "eagle", "echo", "eclipse", "elbow", "ember", "engine",
    "falcon", "feather", "fence", "ferry", "fiddle", "finch", "flame", "flute",
    "forest", "fossil", "fountain", "fox", "galaxy", "garden", "garlic", "gecko",
    "ginger", "glacier", "globe", "goose", "grape", "gravel", "guitar", "hammer",
    "harbor", "hazel", "helmet", "heron", "honey", "horizon", "hotel", "husky",
    "igloo", "island", "ivory", "jacket", "jaguar", "jasmine", "jelly", "jigsaw",
    "jungle", "kayak", "kettle", "kitten", "koala", "ladder", "lagoon", "lantern",
    "lemon", "lily", "lizard", "lobster", "lotus", "magnet", "mango", "maple",
    "marble", "meadow", "melon", "mirror", "monkey", "moose", "mosaic", "motor",
    "mountain", "muffin", "nectar", "needle", "nickel", "noodle", "nutmeg", "oasis",
    "ocean", "olive", "onion", "orbit", "orchid", "otter", "owl", "paddle",
    "panda", "paper", "parrot", "peach", "pebble", "pepper", "piano", "pigeon",
    "pillow", "pilot", "planet", "plum", "pocket", "pony", "poppy", "potato",
    "pumpkin", "puzzle", "quartz", "quill", "rabbit", "radar", "radish", "raven",
    "ribbon", "river", "robot", "rocket", "saddle", "salmon", "sandal", "satin",
    "scarf", "shadow", "shell", "silver", "sketch", "sparrow", "spider", "spruce",
    "squid", "stamp", "summit", "sunset", "swan", "tango", "teapot", "tiger",
    "timber", "tomato", "topaz", "tulip", "tunnel", "turtle", "umbrella", "valley",
    "velvet", "violin", "walnut", "walrus", "whale", "willow", "window", "winter",
];

lazy_static::lazy_static! {
    static ref WORD_INDEX: HashMap<&'static str, u8> = WORDLIST
        .iter()
        .enumerate()
        .map(|(i, w)| (*w, i as u8))
        .collect();
}

/// Word for an entropy byte
pub fn word(index: u8) -> &'static str {
    WORDLIST[index as usize]
}

/// Entropy byte for a word (exact, lowercase match)
pub fn index_of(word: &str) -> Option<u8> {
    WORD_INDEX.get(word).copied()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wordlist_is_unique() {
        assert_eq!(WORD_INDEX.len(), WORDLIST_LEN);
    }

    #[test]
    fn test_wordlist_is_lowercase_ascii() {
        for w in WORDLIST.iter() {
            assert!(w.chars().all(|c| c.is_ascii_lowercase()), "bad word {}", w);
        }
    }

    #[test]
    fn test_index_round_trip() {
        assert_eq!(index_of("apple"), Some(5));
        assert_eq!(word(5), "apple");
        assert_eq!(index_of("ocean").map(word), Some("ocean"));
        assert_eq!(index_of("Apple"), None);
        assert_eq!(index_of("zebra"), None);
    }
}
