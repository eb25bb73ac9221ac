// This software is released under the MIT license.
// See file LICENSE for full license details.
use regex::Regex;
use std::sync::LazyLock;

// Casava 1.8: "@<instrument fields> <read>:<is filtered>:<control>:<index>"
// Relaxed on purpose; plain names that happen to look like this are read as Casava.
static CASAVA_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\S+)[ \t]+(([0-9]+):[YNyn]:[0-9]+(?::\S*)?)\s*$").expect("valid Casava regex")
});

// trailing separator followed by a single-digit mate index
static INDEX_SUFFIX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(.+)[./:_]([0-9])$").expect("valid index suffix regex"));

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NameStyle {
    Plain,
    Casava18,
}

impl std::fmt::Display for NameStyle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NameStyle::Plain => write!(f, "plain"),
            NameStyle::Casava18 => write!(f, "Casava 1.8"),
        }
    }
}

/// Header line split into the parts the pairing engine needs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedName {
    pub name: String,
    pub tail: Option<String>,
    pub token: Option<String>,
}

pub fn detect_style(header: &str) -> NameStyle {
    if CASAVA_NAME.is_match(header) {
        NameStyle::Casava18
    } else {
        NameStyle::Plain
    }
}

/// Split a header (without '@') according to an established style.
/// None if the header does not follow that style.
pub fn parse_header(header: &str, style: NameStyle) -> Option<ParsedName> {
    match style {
        NameStyle::Casava18 => {
            let caps = CASAVA_NAME.captures(header)?;
            Some(ParsedName {
                name: caps[1].to_string(),
                tail: Some(caps[2].to_string()),
                token: Some(caps[3].to_string()),
            })
        }
        NameStyle::Plain => {
            if CASAVA_NAME.is_match(header) {
                return None;
            }
            let name = header.split_whitespace().next().unwrap_or("");
            let (_, token) = strip_index_suffix(name);
            Some(ParsedName {
                name: name.to_string(),
                tail: None,
                token: token.map(|t| t.to_string()),
            })
        }
    }
}

/// Split "name/1" into ("name", Some("1")); names without a suffix are returned as is
pub fn strip_index_suffix(name: &str) -> (&str, Option<&str>) {
    match INDEX_SUFFIX.captures(name) {
        Some(caps) => {
            let base = caps.get(1).map(|m| m.as_str()).unwrap_or(name);
            let token = caps.get(2).map(|m| m.as_str());
            (base, token)
        }
        None => (name, None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strip_suffix_all_separators() {
        assert_eq!(strip_index_suffix("A/1"), ("A", Some("1")));
        assert_eq!(strip_index_suffix("A.2"), ("A", Some("2")));
        assert_eq!(strip_index_suffix("A:1"), ("A", Some("1")));
        assert_eq!(strip_index_suffix("A_2"), ("A", Some("2")));
        assert_eq!(strip_index_suffix("read_12"), ("read_12", None));
        assert_eq!(strip_index_suffix("plain"), ("plain", None));
        assert_eq!(strip_index_suffix("/1"), ("/1", None));
    }

    #[test]
    fn detect_casava() {
        let h = "M03699:250:000000000-DT36J:1:1102:5914:5953 1:N:0:GACGAGATTA+ACATTATCCT";
        assert_eq!(detect_style(h), NameStyle::Casava18);
        assert_eq!(detect_style("read1/1"), NameStyle::Plain);
        assert_eq!(detect_style("read1 length=100"), NameStyle::Plain);

        let parsed = parse_header(h, NameStyle::Casava18).unwrap();
        assert_eq!(parsed.name, "M03699:250:000000000-DT36J:1:1102:5914:5953");
        assert_eq!(parsed.tail.as_deref(), Some("1:N:0:GACGAGATTA+ACATTATCCT"));
        assert_eq!(parsed.token.as_deref(), Some("1"));
    }

    #[test]
    fn style_mismatch_is_none() {
        assert!(parse_header("read1/1", NameStyle::Casava18).is_none());
        assert!(parse_header("r 2:Y:0:AAA", NameStyle::Plain).is_none());
    }

    #[test]
    fn plain_header_drops_comment() {
        let parsed = parse_header("frag7/2 some comment", NameStyle::Plain).unwrap();
        assert_eq!(parsed.name, "frag7/2");
        assert_eq!(parsed.tail, None);
        assert_eq!(parsed.token.as_deref(), Some("2"));
    }
}
