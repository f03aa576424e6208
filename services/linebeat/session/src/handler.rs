//! Application message handlers.
//!
//! The lifecycle core only sees [`MessageHandler`]; the default server
//! handler quotes the message back with a phrase from a [`PhraseSource`].

use rand::seq::SliceRandom;

/// Maps an inbound application line to the reply line
pub trait MessageHandler: Send + Sync + 'static {
    /// Produce the reply for `line`
    fn handle(&self, line: &str) -> String;
}

impl<F> MessageHandler for F
where
    F: Fn(&str) -> String + Send + Sync + 'static,
{
    fn handle(&self, line: &str) -> String {
        self(line)
    }
}

/// Supplies the closing phrase of a reply
pub trait PhraseSource: Send + Sync + 'static {
    /// Pick a phrase
    fn phrase(&self) -> String;
}

/// Phrases used by [`RandomPhrases::default`]
pub const DEFAULT_PHRASES: &[&str] = &[
    "Have a nice day!",
    "Good deal!",
    "From Mars with love",
    "Stay awesome!",
    "Keep it up!",
    "May the Force be with you!",
    "Live long and prosper!",
    "Hakuna Matata!",
    "To infinity and beyond!",
    "Winter is coming!",
    "I am Groot!",
    "Why so serious?",
    "Elementary, my dear Watson.",
    "Here's looking at you, kid.",
    "Hasta la vista, baby.",
    "Yippee-ki-yay!",
    "I'll be back.",
    "You can't handle the truth!",
    "Just keep swimming.",
    "I'm king of the world!",
];

/// Uniformly random pick from a fixed list
#[derive(Debug, Clone)]
pub struct RandomPhrases {
    phrases: Vec<String>,
}

impl RandomPhrases {
    /// Use a custom phrase list
    pub fn new<I, S>(phrases: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            phrases: phrases.into_iter().map(Into::into).collect(),
        }
    }
}

impl Default for RandomPhrases {
    fn default() -> Self {
        Self::new(DEFAULT_PHRASES.iter().copied())
    }
}

impl PhraseSource for RandomPhrases {
    fn phrase(&self) -> String {
        self.phrases
            .choose(&mut rand::thread_rng())
            .cloned()
            .unwrap_or_default()
    }
}

/// Replies `Your message is '<text>'. <phrase>`
#[derive(Debug, Clone, Default)]
pub struct PhraseReplyHandler<P = RandomPhrases> {
    phrases: P,
}

impl<P: PhraseSource> PhraseReplyHandler<P> {
    /// Create a handler drawing phrases from `phrases`
    pub fn new(phrases: P) -> Self {
        Self { phrases }
    }
}

impl<P: PhraseSource> MessageHandler for PhraseReplyHandler<P> {
    fn handle(&self, line: &str) -> String {
        format!("Your message is '{}'. {}", line, self.phrases.phrase())
    }
}
