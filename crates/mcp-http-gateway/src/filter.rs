//! Whitelist/blacklist filtering of compiled operations.
//!
//! A pattern matches either an operation name (glob), a method-qualified path
//! (`METHOD:/path/glob`), or an individual tool parameter (`tool.param`).
//! Glob semantics: `*` matches within one path segment, `**` matches across
//! segments. Lists are evaluated left to right and the first hit decides.

use regex::Regex;
use tracing::warn;

const METHODS: [&str; 7] = ["GET", "POST", "PUT", "PATCH", "DELETE", "HEAD", "OPTIONS"];

#[derive(Debug)]
enum Pattern {
    /// Glob over the operation name
    Name(Regex),
    /// Glob over the path, qualified by an HTTP method
    MethodPath { method: String, path: Regex },
    /// Glob over a single parameter of a named tool
    Param { tool: Regex, param: Regex },
}

impl Pattern {
    fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            return None;
        }
        if let Some((method, path)) = raw.split_once(':')
            && METHODS.contains(&method.to_ascii_uppercase().as_str())
        {
            return Some(Pattern::MethodPath {
                method: method.to_ascii_uppercase(),
                path: glob_regex(path)?,
            });
        }
        if let Some((tool, param)) = raw.split_once('.')
            && !raw.contains('/')
        {
            return Some(Pattern::Param {
                tool: glob_regex(tool)?,
                param: glob_regex(param)?,
            });
        }
        Some(Pattern::Name(glob_regex(raw)?))
    }
}

/// Translate a glob into an anchored regex. `**` must be handled before `*`
/// so a double star is not read as two single-segment stars.
fn glob_regex(glob: &str) -> Option<Regex> {
    let mut source = String::with_capacity(glob.len() + 8);
    source.push('^');
    let mut chars = glob.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '*' => {
                if chars.peek() == Some(&'*') {
                    chars.next();
                    source.push_str(".*");
                } else {
                    source.push_str("[^/]*");
                }
            }
            '\\' | '.' | '+' | '(' | ')' | '[' | ']' | '{' | '}' | '^' | '$' | '|' | '?' => {
                source.push('\\');
                source.push(c);
            }
            other => source.push(other),
        }
    }
    source.push('$');
    Regex::new(&source)
        .inspect_err(|e| warn!("Ignoring unparseable filter pattern {glob}: {e}"))
        .ok()
}

/// Compiled whitelist/blacklist. A non-empty whitelist restricts the tool set
/// to its matches; the blacklist is consulted only when the whitelist is
/// empty and removes its matches.
#[derive(Debug, Default)]
pub struct OperationFilter {
    whitelist: Vec<Pattern>,
    blacklist: Vec<Pattern>,
}

impl OperationFilter {
    pub fn new(whitelist: &[String], blacklist: &[String]) -> Self {
        Self {
            whitelist: whitelist.iter().filter_map(|p| Pattern::parse(p)).collect(),
            blacklist: blacklist.iter().filter_map(|p| Pattern::parse(p)).collect(),
        }
    }

    pub fn from_config(whitelist: Option<&str>, blacklist: Option<&str>) -> Self {
        Self::new(&split_list(whitelist), &split_list(blacklist))
    }

    /// Decide whether an operation is retained. `method` and `path` are empty
    /// for GraphQL root fields, which are matched by name only.
    pub fn retains_operation(&self, name: &str, method: &str, path: &str) -> bool {
        if !self.whitelist.is_empty() {
            return self
                .whitelist
                .iter()
                .any(|p| Self::matches_operation(p, name, method, path));
        }
        !self
            .blacklist
            .iter()
            .any(|p| Self::matches_operation(p, name, method, path))
    }

    /// Decide whether a single parameter of a tool is retained. Whitelist
    /// parameter entries, when any exist for the tool, restrict it to the
    /// listed parameters; blacklist entries remove the named parameters.
    pub fn retains_param(&self, tool: &str, param: &str) -> bool {
        let whitelisted_for_tool: Vec<&Pattern> = self
            .whitelist
            .iter()
            .filter(|p| matches!(p, Pattern::Param { tool: t, .. } if t.is_match(tool)))
            .collect();
        if !whitelisted_for_tool.is_empty() {
            return whitelisted_for_tool
                .iter()
                .any(|p| matches!(p, Pattern::Param { param: pp, .. } if pp.is_match(param)));
        }
        !self
            .blacklist
            .iter()
            .any(|p| matches!(p, Pattern::Param { tool: t, param: pp } if t.is_match(tool) && pp.is_match(param)))
    }

    fn matches_operation(pattern: &Pattern, name: &str, method: &str, path: &str) -> bool {
        match pattern {
            Pattern::Name(re) => re.is_match(name),
            Pattern::MethodPath { method: m, path: re } => {
                m.eq_ignore_ascii_case(method) && re.is_match(path)
            }
            // A whitelisted parameter implies its tool; a blacklisted
            // parameter never removes the whole tool (handled in
            // retains_param), so only whitelist evaluation reaches here
            // with an effect.
            Pattern::Param { tool, .. } => tool.is_match(name),
        }
    }
}

pub fn split_list(value: Option<&str>) -> Vec<String> {
    value
        .map(|v| {
            v.split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn filter(whitelist: &[&str], blacklist: &[&str]) -> OperationFilter {
        OperationFilter::new(
            &whitelist.iter().map(|s| s.to_string()).collect::<Vec<_>>(),
            &blacklist.iter().map(|s| s.to_string()).collect::<Vec<_>>(),
        )
    }

    #[rstest]
    #[case("getPet", true)]
    #[case("deletePet", false)]
    #[case("listPets", true)]
    fn blacklist_removes_exactly_its_matches(#[case] name: &str, #[case] retained: bool) {
        let f = filter(&[], &["delete*"]);
        assert_eq!(f.retains_operation(name, "GET", "/pets"), retained);
    }

    #[rstest]
    #[case("getPet", true)]
    #[case("deletePet", false)]
    fn whitelist_retains_exactly_its_matches(#[case] name: &str, #[case] retained: bool) {
        let f = filter(&["get*", "list*"], &[]);
        assert_eq!(f.retains_operation(name, "GET", "/pets"), retained);
    }

    #[test]
    fn whitelist_dominates_blacklist() {
        let f = filter(&["getPet"], &["getPet"]);
        assert!(f.retains_operation("getPet", "GET", "/pets/{id}"));
    }

    #[test]
    fn method_qualified_path_pattern() {
        let f = filter(&[], &["DELETE:/pets/**"]);
        assert!(!f.retains_operation("deletePet", "DELETE", "/pets/{id}"));
        assert!(f.retains_operation("getPet", "GET", "/pets/{id}"));
    }

    #[test]
    fn single_star_stays_in_one_segment() {
        let f = filter(&["GET:/pets/*"], &[]);
        assert!(f.retains_operation("getPet", "GET", "/pets/{id}"));
        assert!(!f.retains_operation("getPetOwner", "GET", "/pets/{id}/owner"));
    }

    #[test]
    fn double_star_crosses_segments() {
        let f = filter(&["GET:/pets/**"], &[]);
        assert!(f.retains_operation("getPetOwner", "GET", "/pets/{id}/owner"));
    }

    #[test]
    fn param_entries_filter_parameters_not_tools() {
        let f = filter(&[], &["users.name"]);
        assert!(f.retains_operation("users", "", ""));
        assert!(!f.retains_param("users", "name"));
        assert!(f.retains_param("users", "age"));
        assert!(f.retains_param("orders", "name"));
    }

    #[test]
    fn whitelisted_param_restricts_and_implies_tool() {
        let f = filter(&["users.name"], &[]);
        assert!(f.retains_operation("users", "", ""));
        assert!(!f.retains_operation("orders", "", ""));
        assert!(f.retains_param("users", "name"));
        assert!(!f.retains_param("users", "age"));
    }

    #[test]
    fn glob_metacharacters_are_literal() {
        let f = filter(&["get.pet"], &[]);
        // `get.pet` parses as a parameter entry, so it cannot match an
        // operation called `getXpet`.
        assert!(!f.retains_operation("getXpet", "GET", "/pets"));
    }

    #[test]
    fn split_list_trims_and_drops_empties() {
        assert_eq!(
            split_list(Some("a, b,,c ")),
            vec!["a".to_string(), "b".to_string(), "c".to_string()]
        );
        assert!(split_list(None).is_empty());
    }
}
