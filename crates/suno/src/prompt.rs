//! Randomized lo-fi music prompts.

use rand::seq::IndexedRandom;
use rand::Rng;

const TEMPOS: &[&str] = &["80 BPM", "85 BPM", "90 BPM", "75 BPM"];

const AMBIENCES: &[&str] = &[
    "soft rain ambience",
    "gentle cafe background",
    "quiet library atmosphere",
    "peaceful nature sounds",
    "subtle vinyl crackle",
];

const INSTRUMENTS: &[&str] = &[
    "calming synth pads",
    "mellow piano keys",
    "warm bass lines",
    "jazzy guitar chords",
    "smooth rhodes piano",
];

const MOODS: &[&str] = &[
    "study focus",
    "late night relaxation",
    "peaceful meditation",
    "creative flow",
    "chill vibes",
];

pub fn compose_prompt(tempo: &str, ambience: &str, instrument: &str, mood: &str) -> String {
    format!("Lofi study music, {tempo}, {ambience}, {instrument}, {mood}")
}

/// A prompt with one random entry from each pool.
pub fn create_lofi_prompt() -> String {
    create_lofi_prompt_with(&mut rand::rng())
}

pub fn create_lofi_prompt_with<R: Rng + ?Sized>(rng: &mut R) -> String {
    let pick = |pool: &'static [&'static str], rng: &mut R| pool.choose(rng).copied().unwrap_or(pool[0]);
    let tempo = pick(TEMPOS, rng);
    let ambience = pick(AMBIENCES, rng);
    let instrument = pick(INSTRUMENTS, rng);
    let mood = pick(MOODS, rng);
    compose_prompt(tempo, ambience, instrument, mood)
}
