//! Text block formatting for the `drawtext` stage.
//!
//! Every field is labelled, wrapped on its own, joined in display order and
//! finally escaped so the whole block can sit inside a single-quoted
//! `text=` option of a filter graph.

use serde::{Deserialize, Serialize};

/// The four free-form fields collected from the upload form.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct TextFields {
    pub doctor_name: String,
    pub degree: String,
    pub mobile: String,
    pub address: String,
}

impl TextFields {
    /// Labelled lines in display order. Display order differs from the form order.
    pub fn labelled(&self) -> [String; 4] {
        [
            format!("Doctor: {}", self.doctor_name),
            format!("Mobile: {}", self.mobile),
            format!("Address: {}", self.address),
            format!("Degree: {}", self.degree),
        ]
    }
}

/// Which characters, beyond the mandatory set, get a backslash in front.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct EscapeProfile {
    pub comma_and_period: bool,
    /// drawtext expands `%{...}` sequences; a bare `%` in a field aborts the filter.
    pub percent: bool,
}

impl EscapeProfile {
    pub const fn new(comma_and_period: bool) -> Self {
        Self {
            comma_and_period,
            percent: false,
        }
    }

    pub const fn with_percent(mut self, percent: bool) -> Self {
        self.percent = percent;
        self
    }
}

/// Greedy word wrap on single spaces. Tokens are never split, so a token
/// wider than `max_line_length` ends up alone on its own line.
pub fn wrap(text: &str, max_line_length: usize) -> String {
    let mut tokens = text.split(' ');
    // `split` always yields at least one (possibly empty) token
    let mut current = tokens.next().unwrap_or_default().to_string();
    let mut current_len = current.chars().count();
    let mut lines = Vec::new();

    for token in tokens {
        let token_len = token.chars().count();
        if current_len + 1 + token_len <= max_line_length {
            current.push(' ');
            current.push_str(token);
            current_len += 1 + token_len;
        } else {
            lines.push(std::mem::take(&mut current));
            current.push_str(token);
            current_len = token_len;
        }
    }
    lines.push(current);

    lines.join("\n")
}

/// Escape `text` for a single-quoted filter option value.
///
/// Equivalent to substituting backslash first, then colon, quote and line
/// feed, then (optionally) comma and period and percent, done in one pass so
/// inserted backslashes are never escaped twice.
pub fn escape(text: &str, profile: EscapeProfile) -> String {
    let mut escaped = String::with_capacity(text.len() + text.len() / 4);
    for ch in text.chars() {
        match ch {
            '\\' => escaped.push_str("\\\\"),
            ':' => escaped.push_str("\\:"),
            '\'' => escaped.push_str("\\'"),
            '\n' => escaped.push_str("\\n"),
            ',' | '.' if profile.comma_and_period => {
                escaped.push('\\');
                escaped.push(ch);
            }
            '%' if profile.percent => escaped.push_str("\\%"),
            _ => escaped.push(ch),
        }
    }
    escaped
}

/// Build the quoted text block handed to `drawtext`.
pub fn build_text_block(fields: &TextFields, wrap_width: usize, profile: EscapeProfile) -> String {
    let wrapped = fields
        .labelled()
        .iter()
        .map(|line| wrap(line, wrap_width))
        .collect::<Vec<_>>()
        .join("\n");

    format!("'{}'", escape(&wrapped, profile))
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Reverses `escape` the way the filter option parser reads it back.
    fn unescape(text: &str) -> String {
        let mut out = String::new();
        let mut chars = text.chars();
        while let Some(ch) = chars.next() {
            if ch != '\\' {
                out.push(ch);
                continue;
            }
            match chars.next() {
                Some('n') => out.push('\n'),
                Some(other) => out.push(other),
                None => panic!("dangling backslash in {text:?}"),
            }
        }
        out
    }

    fn jane() -> TextFields {
        TextFields {
            doctor_name: "Jane Doe".into(),
            degree: "MD".into(),
            mobile: "555-1234".into(),
            address: "1 Main St".into(),
        }
    }

    #[test]
    fn short_text_is_unchanged() {
        assert_eq!(wrap("hello world", 50), "hello world");
        assert_eq!(wrap("exactly ten", 11), "exactly ten");
    }

    #[test]
    fn wraps_at_the_boundary() {
        // "aaa bbb" is 7 chars: fits at 7, breaks at 6
        assert_eq!(wrap("aaa bbb", 7), "aaa bbb");
        assert_eq!(wrap("aaa bbb", 6), "aaa\nbbb");
        assert_eq!(wrap("one two three four", 9), "one two\nthree\nfour");
    }

    #[test]
    fn long_token_is_never_split() {
        let wrapped = wrap("supercalifragilistic is long", 5);
        assert_eq!(wrapped, "supercalifragilistic\nis\nlong");

        let text = "a bb ccccccccccccc dd eeeeeeeeeeeeeeeeeeeeee f";
        for width in 1..30 {
            let tokens = wrap(text, width)
                .split(['\n', ' '])
                .map(str::to_string)
                .collect::<Vec<_>>();
            assert_eq!(tokens, text.split(' ').collect::<Vec<_>>(), "width {width}");
        }
    }

    #[test]
    fn empty_input_is_a_single_empty_line() {
        assert_eq!(wrap("", 30), "");
        assert_eq!(wrap("", 0), "");
    }

    #[test]
    fn counts_characters_not_bytes() {
        // 5 + 1 + 5 characters, far more bytes
        assert_eq!(wrap("héllo wörld", 11), "héllo wörld");
    }

    #[test]
    fn escapes_filter_syntax() {
        let profile = EscapeProfile::default();
        assert_eq!(escape("a:b", profile), "a\\:b");
        assert_eq!(escape("it's", profile), "it\\'s");
        assert_eq!(escape("C:\\dir", profile), "C\\:\\\\dir");
        assert_eq!(escape("one\ntwo", profile), "one\\ntwo");
        assert_eq!(escape("a, b.", profile), "a, b.");
        assert_eq!(escape("50% off", profile), "50% off");
    }

    #[test]
    fn percent_profile() {
        let profile = EscapeProfile::default().with_percent(true);
        assert_eq!(escape("50% off", profile), "50\\% off");
        assert_eq!(escape("%{pts}", profile), "\\%{pts}");
        assert_eq!(escape("Dr. A", profile), "Dr. A");
    }

    #[test]
    fn comma_and_period_profile() {
        let profile = EscapeProfile::new(true);
        assert_eq!(escape("Dr. Who, MD", profile), "Dr\\. Who\\, MD");
    }

    #[test]
    fn escape_round_trips() {
        let samples = [
            "plain",
            "back\\slash",
            "\\\\double",
            "colon: here",
            "quote's",
            "mix\\:'\\'::\\",
            "ends with \\",
            "line\nbreak\\n literal",
            "Dr. A, B.",
            "100% \\% sure",
        ];
        let profiles = [
            EscapeProfile::new(false),
            EscapeProfile::new(true),
            EscapeProfile::new(true).with_percent(true),
        ];
        for profile in profiles {
            for sample in samples {
                assert_eq!(unescape(&escape(sample, profile)), sample);
            }
        }
    }

    #[test]
    fn escaped_text_has_no_bare_terminators() {
        let escaped = escape("a'b:c\\d", EscapeProfile::default());
        let mut chars = escaped.chars();
        while let Some(ch) = chars.next() {
            match ch {
                '\\' => {
                    chars.next();
                }
                ':' | '\'' => panic!("bare {ch:?} in {escaped}"),
                _ => {}
            }
        }
    }

    #[test]
    fn text_block_order_and_quoting() {
        let block = build_text_block(&jane(), 50, EscapeProfile::default());
        assert_eq!(
            block,
            "'Doctor\\: Jane Doe\\nMobile\\: 555-1234\\nAddress\\: 1 Main St\\nDegree\\: MD'"
        );

        let inner = unescape(&block[1..block.len() - 1]);
        assert_eq!(
            inner.lines().collect::<Vec<_>>(),
            ["Doctor: Jane Doe", "Mobile: 555-1234", "Address: 1 Main St", "Degree: MD"]
        );
    }

    #[test]
    fn each_field_wraps_independently() {
        let fields = TextFields {
            address: "221B Baker Street Marylebone London".into(),
            ..jane()
        };
        let block = build_text_block(&fields, 20, EscapeProfile::default());
        let inner = unescape(&block[1..block.len() - 1]);
        assert_eq!(
            inner.lines().collect::<Vec<_>>(),
            [
                "Doctor: Jane Doe",
                "Mobile: 555-1234",
                "Address: 221B Baker",
                "Street Marylebone",
                "London",
                "Degree: MD",
            ]
        );
    }
}
