//! Token view over a raw process command line.
//!
//! procfs exposes the argument vector as NUL-terminated tokens. QEMU option
//! values are themselves comma-separated `key=value` lists, so both NUL and
//! `,` act as boundaries when reading a value.

/// A process's argument vector, one entry per NUL-separated token.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CommandLine {
    tokens: Vec<String>,
}

impl CommandLine {
    /// Split a raw blob on NUL. A trailing NUL does not produce an empty
    /// token; invalid UTF-8 is replaced lossily.
    pub fn from_bytes(raw: &[u8]) -> Self {
        let raw = raw.strip_suffix(&[0]).unwrap_or(raw);
        if raw.is_empty() {
            return Self::default();
        }

        Self {
            tokens: raw
                .split(|b| *b == 0)
                .map(|token| String::from_utf8_lossy(token).into_owned())
                .collect(),
        }
    }

    pub fn tokens(&self) -> &[String] {
        &self.tokens
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    /// Index of the first token containing any of `needles`.
    pub fn position_of_any(&self, needles: &[String]) -> Option<usize> {
        self.tokens
            .iter()
            .position(|token| needles.iter().any(|needle| token.contains(needle.as_str())))
    }
}

/// Whether `token` is the option `name`, written as `-name` or `--name`.
pub fn is_flag(token: &str, name: &str) -> bool {
    token
        .strip_prefix("--")
        .or_else(|| token.strip_prefix('-'))
        .is_some_and(|rest| rest == name)
}

/// Iterate over `(index, value)` for every occurrence of option `name` in
/// `tokens`, where the value is the token that follows the option.
pub fn option_values<'a>(
    tokens: &'a [String],
    name: &'a str,
) -> impl Iterator<Item = (usize, &'a str)> + 'a {
    tokens
        .windows(2)
        .enumerate()
        .filter(move |(_, pair)| is_flag(&pair[0], name))
        .map(|(index, pair)| (index, pair[1].as_str()))
}

/// Split an option value into its comma-separated fields.
pub fn fields(value: &str) -> impl Iterator<Item = &str> {
    value.split(',')
}

/// Value of the `key=` field in a comma-separated option value.
pub fn field<'a>(value: &'a str, key: &str) -> Option<&'a str> {
    fields(value).find_map(|part| part.strip_prefix(key)?.strip_prefix('='))
}

/// Whether the option value contains the exact field `key=expected`.
pub fn has_field(value: &str, key: &str, expected: &str) -> bool {
    fields(value).any(|part| {
        part.strip_prefix(key)
            .and_then(|rest| rest.strip_prefix('='))
            .is_some_and(|v| v == expected)
    })
}
