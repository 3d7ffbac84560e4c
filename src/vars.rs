// src/vars.rs

//! Ordered variable environment with shell-style expansion
//!
//! Build variables form an insertion-ordered map of string bindings. Lookups
//! of unknown keys return the empty string rather than an error, matching
//! shell semantics. Expansion implements POSIX `$VAR` and `${VAR}` only —
//! no command substitution, no brace expansion.

/// Insertion-ordered map of NAME → value bindings
#[derive(Debug, Clone, Default)]
pub struct VarEnv {
    entries: Vec<(String, String)>,
}

impl VarEnv {
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up a variable, returning `""` when unset
    pub fn get(&self, key: &str) -> &str {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
            .unwrap_or("")
    }

    /// True if the key has been bound, even to an empty value
    pub fn contains(&self, key: &str) -> bool {
        self.entries.iter().any(|(k, _)| k == key)
    }

    /// Bind a variable, replacing any existing value in place
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((key, value)),
        }
    }

    /// Concatenate onto an existing value with `sep`, or set when unbound
    pub fn append(&mut self, key: &str, value: &str, sep: &str) {
        match self.entries.iter_mut().find(|(k, _)| k == key) {
            Some(entry) => {
                entry.1.push_str(sep);
                entry.1.push_str(value);
            }
            None => self.entries.push((key.to_string(), value.to_string())),
        }
    }

    /// Iterate bindings in insertion order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Expand `$VAR` and `${VAR}` references against the current bindings.
    ///
    /// Unknown variables expand to the empty string. A `$` not followed by
    /// a name or `{` is kept literally.
    pub fn expand(&self, input: &str) -> String {
        let mut out = String::with_capacity(input.len());
        let mut i = 0;

        while i < input.len() {
            let rest = &input[i..];
            let dollar = match rest.find('$') {
                Some(p) => p,
                None => {
                    out.push_str(rest);
                    break;
                }
            };
            out.push_str(&rest[..dollar]);
            i += dollar + 1;

            let after = &input[i..];
            if let Some(braced) = after.strip_prefix('{') {
                match braced.find('}') {
                    Some(end) => {
                        out.push_str(self.get(&braced[..end]));
                        i += 1 + end + 1;
                    }
                    None => {
                        // unterminated ${ — keep literally
                        out.push_str("${");
                        i += 1;
                    }
                }
            } else if after
                .chars()
                .next()
                .map(|c| c == '_' || c.is_ascii_alphabetic())
                .unwrap_or(false)
            {
                let end = after
                    .find(|c: char| c != '_' && !c.is_ascii_alphanumeric())
                    .unwrap_or(after.len());
                out.push_str(self.get(&after[..end]));
                i += end;
            } else {
                out.push('$');
            }
        }

        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_unknown_is_empty() {
        let vars = VarEnv::new();
        assert_eq!(vars.get("NOPE"), "");
    }

    #[test]
    fn test_set_replaces_in_place() {
        let mut vars = VarEnv::new();
        vars.set("A", "1");
        vars.set("B", "2");
        vars.set("A", "3");

        let order: Vec<_> = vars.iter().collect();
        assert_eq!(order, vec![("A", "3"), ("B", "2")]);
    }

    #[test]
    fn test_append_uses_separator_only_when_bound() {
        let mut vars = VarEnv::new();
        vars.append("CPPFLAGS", "-I/a", " ");
        assert_eq!(vars.get("CPPFLAGS"), "-I/a");

        vars.append("CPPFLAGS", "-I/b", " ");
        assert_eq!(vars.get("CPPFLAGS"), "-I/a -I/b");

        vars.append("CPATH", "/a", ":");
        vars.append("CPATH", "/b", ":");
        assert_eq!(vars.get("CPATH"), "/a:/b");
    }

    #[test]
    fn test_expand_braced_and_bare() {
        let mut vars = VarEnv::new();
        vars.set("PN", "zlib");
        vars.set("PV", "1.3");

        assert_eq!(vars.expand("${PN}-${PV}.tar.gz"), "zlib-1.3.tar.gz");
        assert_eq!(vars.expand("$PN/$PV"), "zlib/1.3");
        assert_eq!(vars.expand("$PN_suffix"), ""); // PN_suffix is unset
        assert_eq!(vars.expand("${PN}_suffix"), "zlib_suffix");
    }

    #[test]
    fn test_expand_unknown_and_literals() {
        let vars = VarEnv::new();
        assert_eq!(vars.expand("a$MISSING-b"), "a-b");
        assert_eq!(vars.expand("50%$"), "50%$");
        assert_eq!(vars.expand("a$2b"), "a$2b");
        assert_eq!(vars.expand("${UNTERMINATED"), "${UNTERMINATED");
    }

    #[test]
    fn test_expand_in_list_order() {
        // later entries can reference earlier ones
        let mut vars = VarEnv::new();
        vars.set("S", "/build/work/zlib");
        let expanded = vars.expand("${S}/contrib");
        vars.set("B", expanded);
        assert_eq!(vars.get("B"), "/build/work/zlib/contrib");
    }
}
