//! Channel identity: the canonical key used for de-duplication and the
//! request a codec turns into subscribe/unsubscribe frames.

use std::fmt;
use std::sync::Arc;

/// Separator between the channel name and its arguments in a [`ChannelKey`].
pub const KEY_DELIMITER: char = ':';

/// Escapes a literal delimiter (or escape) inside a key segment.
const KEY_ESCAPE: char = '\\';

/// Canonical identifier of one logical subscription.
///
/// Built from a channel name plus canonicalized arguments, rendered as
/// `name:arg1:arg2`. Arguments are trimmed. A delimiter inside a segment is
/// escaped (`1m\:BTC`), and an empty argument keeps its position as an empty
/// segment (`book::BTC`) unless it is trailing, so two keys are equal exactly
/// when the requests carry the same positional arguments. Cloning is cheap
/// (shared string).
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChannelKey(Arc<str>);

impl ChannelKey {
    /// Build a key from a channel name and its arguments.
    pub fn new<I, S>(name: &str, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut key = String::new();
        push_segment(&mut key, name.trim());
        let mut held_empty = 0;
        for arg in args {
            let arg = arg.as_ref().trim();
            if arg.is_empty() {
                held_empty += 1;
                continue;
            }
            for _ in 0..held_empty {
                key.push(KEY_DELIMITER);
            }
            held_empty = 0;
            key.push(KEY_DELIMITER);
            push_segment(&mut key, arg);
        }
        Self(key.into())
    }

    /// Wrap an already-canonical key string as-is.
    pub fn from_raw(raw: impl Into<Arc<str>>) -> Self {
        Self(raw.into())
    }

    /// The canonical string form.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Channel name portion (everything before the first unescaped
    /// delimiter).
    pub fn channel(&self) -> &str {
        let mut escaped = false;
        for (i, c) in self.0.char_indices() {
            match c {
                _ if escaped => escaped = false,
                KEY_ESCAPE => escaped = true,
                KEY_DELIMITER => return &self.0[..i],
                _ => {}
            }
        }
        &self.0
    }
}

fn push_segment(key: &mut String, segment: &str) {
    for c in segment.chars() {
        if c == KEY_DELIMITER || c == KEY_ESCAPE {
            key.push(KEY_ESCAPE);
        }
        key.push(c);
    }
}

impl fmt::Display for ChannelKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for ChannelKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ChannelKey({})", self.0)
    }
}

/// What the application asked for: channel name plus wire arguments.
///
/// Codecs receive this when encoding subscribe and unsubscribe requests. It
/// is stored in the registry so that replay after a reconnect can re-encode
/// exactly the same request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelRequest {
    /// Exchange channel name (e.g. `"tickers"`, `"orderbook"`).
    pub name: String,
    /// Positional arguments (e.g. instrument, depth, interval).
    pub args: Vec<String>,
}

impl ChannelRequest {
    pub fn new<I, S>(name: &str, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self { name: name.to_string(), args: args.into_iter().map(Into::into).collect() }
    }

    /// Argument at `idx`, if present and non-empty.
    pub fn arg(&self, idx: usize) -> Option<&str> {
        self.args.get(idx).map(|a| a.trim()).filter(|a| !a.is_empty())
    }

    /// Default canonical key: `name:arg1:arg2`.
    pub fn default_key(&self) -> ChannelKey {
        ChannelKey::new(&self.name, &self.args)
    }
}
