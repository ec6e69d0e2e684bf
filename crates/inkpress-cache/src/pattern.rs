//! Glob-style key patterns.
//!
//! Both backends use the same matching rules, which follow Redis `KEYS`/`SCAN
//! MATCH` semantics so that an invalidation removes the same keys whichever
//! backend happens to be active:
//!
//! - `*` matches any run of characters (including none)
//! - `?` matches exactly one character
//! - `[abc]`, `[a-z]`, `[^a]` match a character class
//! - `\x` matches `x` literally

use std::fmt;

/// A compiled glob pattern for cache keys.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyPattern {
    raw: String,
    tokens: Vec<Token>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Literal(char),
    AnyOne,
    AnyRun,
    Class { negated: bool, items: Vec<ClassItem> },
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum ClassItem {
    Char(char),
    Range(char, char),
}

impl KeyPattern {
    /// Compile a pattern. Every input is a valid pattern; an unterminated
    /// `[` is taken literally.
    pub fn new(pattern: impl Into<String>) -> Self {
        let raw = pattern.into();
        let tokens = tokenize(&raw);
        Self { raw, tokens }
    }

    /// The pattern as written, suitable for `SCAN MATCH`.
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Returns `true` if the pattern contains no wildcard at all.
    pub fn is_literal(&self) -> bool {
        self.tokens.iter().all(|t| matches!(t, Token::Literal(_)))
    }

    /// Returns `true` if `key` matches the whole pattern.
    pub fn matches(&self, key: &str) -> bool {
        let text: Vec<char> = key.chars().collect();

        // Iterative matcher with single-star backtracking.
        let (mut p, mut t) = (0usize, 0usize);
        let mut star: Option<(usize, usize)> = None;

        while t < text.len() {
            match self.tokens.get(p) {
                Some(Token::AnyRun) => {
                    star = Some((p, t));
                    p += 1;
                    continue;
                }
                Some(token) if token_matches(token, text[t]) => {
                    p += 1;
                    t += 1;
                    continue;
                }
                _ => {}
            }

            match star {
                Some((star_p, star_t)) => {
                    p = star_p + 1;
                    t = star_t + 1;
                    star = Some((star_p, star_t + 1));
                }
                None => return false,
            }
        }

        self.tokens[p..].iter().all(|t| matches!(t, Token::AnyRun))
    }
}

impl fmt::Display for KeyPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl From<&str> for KeyPattern {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for KeyPattern {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

fn token_matches(token: &Token, c: char) -> bool {
    match token {
        Token::Literal(l) => *l == c,
        Token::AnyOne => true,
        Token::AnyRun => false,
        Token::Class { negated, items } => {
            let hit = items.iter().any(|item| match item {
                ClassItem::Char(x) => *x == c,
                ClassItem::Range(lo, hi) => *lo <= c && c <= *hi,
            });
            hit != *negated
        }
    }
}

fn tokenize(pattern: &str) -> Vec<Token> {
    let chars: Vec<char> = pattern.chars().collect();
    let mut tokens = Vec::with_capacity(chars.len());
    let mut i = 0;

    while i < chars.len() {
        match chars[i] {
            '*' => {
                // Collapse runs of stars
                if !matches!(tokens.last(), Some(Token::AnyRun)) {
                    tokens.push(Token::AnyRun);
                }
                i += 1;
            }
            '?' => {
                tokens.push(Token::AnyOne);
                i += 1;
            }
            '\\' if i + 1 < chars.len() => {
                tokens.push(Token::Literal(chars[i + 1]));
                i += 2;
            }
            '[' => match parse_class(&chars, i + 1) {
                Some((token, next)) => {
                    tokens.push(token);
                    i = next;
                }
                None => {
                    tokens.push(Token::Literal('['));
                    i += 1;
                }
            },
            c => {
                tokens.push(Token::Literal(c));
                i += 1;
            }
        }
    }

    tokens
}

/// Parse a character class starting just after `[`. Returns the token and the
/// index after the closing `]`, or `None` if the class is unterminated.
fn parse_class(chars: &[char], start: usize) -> Option<(Token, usize)> {
    let mut i = start;
    let negated = chars.get(i) == Some(&'^');
    if negated {
        i += 1;
    }

    let mut items = Vec::new();
    while i < chars.len() {
        let c = match chars[i] {
            ']' => return Some((Token::Class { negated, items }, i + 1)),
            '\\' if i + 1 < chars.len() => {
                i += 1;
                chars[i]
            }
            c => c,
        };

        if chars.get(i + 1) == Some(&'-') && i + 2 < chars.len() && chars[i + 2] != ']' {
            let (lo, hi) = (c, chars[i + 2]);
            items.push(ClassItem::Range(lo.min(hi), lo.max(hi)));
            i += 3;
        } else {
            items.push(ClassItem::Char(c));
            i += 1;
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_star_prefix_pattern() {
        let p = KeyPattern::new("content:*");
        assert!(p.matches("content:1"));
        assert!(p.matches("content:"));
        assert!(p.matches("content:/content?x=1:GET"));
        assert!(!p.matches("public:content:1"));
    }

    #[test]
    fn test_inner_star_is_a_real_glob() {
        let p = KeyPattern::new("public:*content*");
        assert!(p.matches("public:/content?x=1:GET"));
        assert!(p.matches("public:content"));
        assert!(!p.matches("short:/content"));

        // Substring containment of the stripped pattern would accept this one.
        let p = KeyPattern::new("a*b");
        assert!(!p.matches("xaxbx"));
        assert!(p.matches("axxb"));
        assert!(p.matches("ab"));
    }

    #[test]
    fn test_question_mark_and_classes() {
        assert!(KeyPattern::new("h?llo").matches("hello"));
        assert!(!KeyPattern::new("h?llo").matches("hllo"));
        assert!(KeyPattern::new("h[ae]llo").matches("hallo"));
        assert!(!KeyPattern::new("h[ae]llo").matches("hillo"));
        assert!(KeyPattern::new("h[^e]llo").matches("hallo"));
        assert!(!KeyPattern::new("h[^e]llo").matches("hello"));
        assert!(KeyPattern::new("v[0-9]").matches("v7"));
        assert!(!KeyPattern::new("v[0-9]").matches("vx"));
    }

    #[test]
    fn test_escapes_and_literals() {
        let p = KeyPattern::new(r"price\*");
        assert!(p.matches("price*"));
        assert!(!p.matches("prices"));
        assert!(p.is_literal());

        assert!(KeyPattern::new("exact:key").is_literal());
        assert!(!KeyPattern::new("exact:*").is_literal());
    }

    #[test]
    fn test_unterminated_class_is_literal() {
        let p = KeyPattern::new("a[bc");
        assert!(p.matches("a[bc"));
        assert!(!p.matches("ab"));
    }

    #[test]
    fn test_backtracking_across_multiple_stars() {
        let p = KeyPattern::new("*:*:GET");
        assert!(p.matches("http:/blog:GET"));
        assert!(p.matches("http:/a:b:GET"));
        assert!(!p.matches("http:/blog:POST"));
        assert!(KeyPattern::new("*").matches(""));
        assert!(KeyPattern::new("**").matches("anything"));
    }
}
