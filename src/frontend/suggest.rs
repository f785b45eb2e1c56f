use strsim::levenshtein;

/// Pick names close to `needle` by edit distance. Distance is capped at a
/// third of the needle's length (minimum 1), which filters out noise for
/// short identifiers; ties break toward shorter, then lexicographic.
fn nearest(needle: &str, candidates: &[String]) -> Vec<String> {
    if needle.is_empty() {
        return Vec::new();
    }
    let cap = (needle.len() / 3).max(1);
    let mut scored: Vec<(usize, &String)> = candidates
        .iter()
        .filter(|c| !c.is_empty() && c.as_str() != needle)
        .map(|c| (levenshtein(needle, c), c))
        .filter(|(d, _)| *d <= cap)
        .collect();
    scored.sort_by(|(da, a), (db, b)| da.cmp(db).then(a.len().cmp(&b.len())).then(a.cmp(b)));
    scored.into_iter().take(2).map(|(_, s)| s.clone()).collect()
}

/// Render a `did you mean` help line, or `None` when nothing is close.
pub fn did_you_mean(needle: &str, candidates: &[String]) -> Option<String> {
    let near = nearest(needle, candidates);
    match near.as_slice() {
        [] => None,
        [one] => Some(format!("did you mean `{}`?", one)),
        many => Some(format!(
            "did you mean one of: {}?",
            many.iter()
                .map(|s| format!("`{}`", s))
                .collect::<Vec<_>>()
                .join(", ")
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn close_name_is_suggested() {
        let candidates = vec!["count".to_string(), "print".to_string()];
        assert_eq!(
            did_you_mean("cout", &candidates),
            Some("did you mean `count`?".to_string())
        );
    }

    #[test]
    fn distant_names_are_not() {
        let candidates = vec!["alpha".to_string()];
        assert_eq!(did_you_mean("zzz", &candidates), None);
    }
}
