//! Variable references as they appear in instruction operands.

use std::hash::{Hash, Hasher};

/// Maps a swizzle letter to its component index.
///
/// The three GLSL letter sets (`xyzw`, `rgba`, `stpq`) are synonyms.
pub fn swizzle_index(c: char) -> Option<usize> {
    match c {
        'x' | 'r' | 's' => Some(0),
        'y' | 'g' | 't' => Some(1),
        'z' | 'b' | 'p' => Some(2),
        'w' | 'a' | 'q' => Some(3),
        _ => None,
    }
}

/// A reference to a variable slot, with an optional subscript and swizzle.
///
/// Identity is `(slot, index)`: two references differing only by swizzle
/// compare equal.
#[derive(Debug, Clone)]
pub struct VarName {
    pub slot: usize,
    pub index: Option<usize>,
    pub swizzle: Option<String>,
}

impl VarName {
    pub fn new(slot: usize) -> Self {
        Self {
            slot,
            index: None,
            swizzle: None,
        }
    }

    pub fn with_index(mut self, index: usize) -> Self {
        self.index = Some(index);
        self
    }

    pub fn with_swizzle(mut self, swizzle: impl Into<String>) -> Self {
        self.swizzle = Some(swizzle.into());
        self
    }

    /// True when this reference addresses part of a vector rather than the whole value.
    pub fn is_component(&self) -> bool {
        self.index.is_some() || self.swizzle.is_some()
    }

    pub fn same_slot(&self, other: &VarName) -> bool {
        self.slot == other.slot
    }

    /// Point this reference at another slot, keeping subscript and swizzle.
    pub fn renamed_to(&self, slot: usize) -> VarName {
        VarName {
            slot,
            index: self.index,
            swizzle: self.swizzle.clone(),
        }
    }

    /// Component indices selected by the swizzle, if any.
    pub fn swizzle_indices(&self) -> Option<Vec<usize>> {
        self.swizzle
            .as_deref()
            .map(|s| s.chars().filter_map(swizzle_index).collect())
    }

    /// Renders as `$name[i].swz`, using `name` for the slot.
    pub fn render(&self, name: &str) -> String {
        let mut s = format!("${}", name);
        if let Some(index) = self.index {
            s.push_str(&format!("[{}]", index));
        }
        if let Some(swizzle) = &self.swizzle {
            s.push('.');
            s.push_str(swizzle);
        }
        s
    }
}

impl PartialEq for VarName {
    fn eq(&self, other: &Self) -> bool {
        self.slot == other.slot && self.index == other.index
    }
}

impl Eq for VarName {}

impl Hash for VarName {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.slot.hash(state);
        self.index.hash(state);
    }
}

/// The pieces of a `$name[idx].swz` token, before slot assignment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VarToken<'a> {
    pub name: &'a str,
    pub index: Option<usize>,
    pub swizzle: Option<&'a str>,
}

/// Parse the text after `$`. Returns a description of the problem on failure.
pub fn parse_var_token(text: &str) -> Result<VarToken<'_>, String> {
    if text.trim().is_empty() {
        return Err("Variable name cannot be empty.".to_string());
    }

    let name_end = text
        .char_indices()
        .find(|&(i, c)| !(c == '_' || c.is_ascii_alphabetic() || (i > 0 && c.is_ascii_digit())))
        .map(|(i, _)| i)
        .unwrap_or(text.len());
    if name_end == 0 {
        return Err(format!("Invalid variable name: {}", text));
    }
    let name = &text[..name_end];
    let mut rest = &text[name_end..];

    let mut index = None;
    if let Some(after) = rest.strip_prefix('[') {
        let close = after
            .find(']')
            .ok_or_else(|| format!("Invalid variable name: {}", text))?;
        let digits = &after[..close];
        if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
            return Err(format!("Invalid subscript in variable name: {}", text));
        }
        index = Some(
            digits
                .parse::<usize>()
                .map_err(|_| format!("Invalid subscript in variable name: {}", text))?,
        );
        rest = &after[close + 1..];
    }

    let mut swizzle = None;
    if let Some(swz) = rest.strip_prefix('.') {
        if swz.is_empty() || swz.len() > 4 || !swz.chars().all(|c| swizzle_index(c).is_some()) {
            return Err(format!("Invalid swizzle in variable name: {}", text));
        }
        swizzle = Some(swz);
        rest = "";
    }

    if !rest.is_empty() {
        return Err(format!("Invalid variable name: {}", text));
    }

    Ok(VarToken {
        name,
        index,
        swizzle,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_parse_plain_name() {
        let t = parse_var_token("foo_1").unwrap();
        assert_eq!(t.name, "foo_1");
        assert_eq!(t.index, None);
        assert_eq!(t.swizzle, None);
    }

    #[test]
    fn test_parse_index_and_swizzle() {
        let t = parse_var_token("uv[1]").unwrap();
        assert_eq!(t.index, Some(1));
        let t = parse_var_token("col.rgb").unwrap();
        assert_eq!(t.name, "col");
        assert_eq!(t.swizzle, Some("rgb"));
    }

    #[test]
    fn test_parse_rejects_malformed() {
        assert!(parse_var_token("").is_err());
        assert!(parse_var_token(" ").is_err());
        assert!(parse_var_token("123abc").is_err());
        assert!(parse_var_token("$foo").is_err());
        assert!(parse_var_token("foo[]").is_err());
        assert!(parse_var_token("foo[nope]").is_err());
        assert!(parse_var_token("foo[2]bar").is_err());
        assert!(parse_var_token("foo.xk").is_err());
        assert!(parse_var_token("foo.xyzwx").is_err());
    }

    #[test]
    fn test_equality_ignores_swizzle() {
        let a = VarName::new(3).with_swizzle("xy");
        let b = VarName::new(3);
        let c = VarName::new(3).with_index(1);
        assert_eq!(a, b);
        assert_ne!(b, c);

        let set: HashSet<VarName> = [a, b, c].into_iter().collect();
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn test_swizzle_sets_are_synonyms() {
        for set in ["xyzw", "rgba", "stpq"] {
            let indices: Vec<_> = set.chars().filter_map(swizzle_index).collect();
            assert_eq!(indices, vec![0, 1, 2, 3]);
        }
    }

    #[test]
    fn test_render() {
        let v = VarName::new(0).with_index(2);
        assert_eq!(v.render("v"), "$v[2]");
        assert_eq!(VarName::new(1).with_swizzle("yx").render("p"), "$p.yx");
    }
}
