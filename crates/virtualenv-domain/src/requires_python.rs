//! Coarse `Requires-Python` evaluation against a `major.minor` interpreter.

use std::cmp::Ordering;

const OPERATORS: [&str; 6] = ["!=", "==", "<=", ">=", "<", ">"];

/// Evaluate a `Requires-Python` value such as `>=3.8,!=3.9.*` for the
/// given `(major, minor)`. Clauses with unknown operators are ignored,
/// and only the first two release components of each bound are used.
pub fn requires_python_allows(requires: &str, python: (u32, u32)) -> bool {
    let ours = [python.0, python.1];
    for clause in requires.split(',').map(str::trim).filter(|c| !c.is_empty()) {
        let Some(operator) = OPERATORS.iter().find(|op| clause.starts_with(**op)) else {
            continue;
        };
        let raw = clause[operator.len()..].trim();
        let wildcard = raw.split('.').any(|part| part == "*");
        let Some(bound) = parse_bound(raw) else {
            continue;
        };
        let prefix = &ours[..bound.len().min(ours.len())];
        let allowed = match *operator {
            "==" if wildcard => prefix == bound.as_slice(),
            "!=" if wildcard => prefix != bound.as_slice(),
            "==" => ours.as_slice() == bound.as_slice(),
            "!=" => ours.as_slice() != bound.as_slice(),
            "<=" => ours.as_slice().cmp(bound.as_slice()) != Ordering::Greater,
            ">=" => ours.as_slice().cmp(bound.as_slice()) != Ordering::Less,
            "<" => ours.as_slice().cmp(bound.as_slice()) == Ordering::Less,
            ">" => ours.as_slice().cmp(bound.as_slice()) == Ordering::Greater,
            _ => true,
        };
        if !allowed {
            return false;
        }
    }
    true
}

fn parse_bound(raw: &str) -> Option<Vec<u32>> {
    let mut bound = Vec::new();
    for part in raw.split('.').take(2) {
        if part == "*" {
            break;
        }
        bound.push(part.trim().parse::<u32>().ok()?);
    }
    if bound.is_empty() {
        None
    } else {
        Some(bound)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lower_and_upper_bounds() {
        assert!(requires_python_allows(">=3.8", (3, 12)));
        assert!(!requires_python_allows(">=3.8", (3, 7)));
        assert!(requires_python_allows(">=3.7, <3.13", (3, 12)));
        assert!(!requires_python_allows(">=3.7, <3.13", (3, 13)));
        assert!(requires_python_allows(">3", (3, 12)));
    }

    #[test]
    fn wildcards_compare_by_prefix() {
        let requires = ">=2.7,!=3.0.*,!=3.1.*,!=3.2.*,!=3.3.*";
        assert!(requires_python_allows(requires, (2, 7)));
        assert!(!requires_python_allows(requires, (3, 2)));
        assert!(requires_python_allows(requires, (3, 4)));
        assert!(requires_python_allows("==3.*", (3, 11)));
        assert!(!requires_python_allows("==3.*", (2, 7)));
    }

    #[test]
    fn micro_components_are_truncated() {
        assert!(requires_python_allows(">=3.8.1", (3, 8)));
        assert!(requires_python_allows("==3.12.4", (3, 12)));
    }

    #[test]
    fn unknown_operators_are_ignored() {
        assert!(requires_python_allows("~=3.9", (3, 8)));
        assert!(requires_python_allows("", (3, 8)));
    }
}
