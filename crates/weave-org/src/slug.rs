//! URL-safe circle slugs, unique within a workspace.

/// Lowercase, alphanumeric words joined by hyphens. Empty input slugs to
/// "circle".
pub fn slugify(name: &str) -> String {
    let slug: String = name
        .to_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .collect();
    let slug = slug
        .split('-')
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join("-");
    if slug.is_empty() {
        "circle".to_string()
    } else {
        slug
    }
}

/// Append a numeric suffix until the slug is free.
pub(crate) fn ensure_unique(base: &str, taken: &std::collections::HashSet<String>) -> String {
    if !taken.contains(base) {
        return base.to_string();
    }
    let mut n = 2;
    loop {
        let candidate = format!("{base}-{n}");
        if !taken.contains(&candidate) {
            return candidate;
        }
        n += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn slugify_collapses_punctuation() {
        assert_eq!(slugify("Product & Engineering"), "product-engineering");
        assert_eq!(slugify("  Ops  "), "ops");
        assert_eq!(slugify("!!!"), "circle");
    }

    #[test]
    fn unique_slug_appends_suffix() {
        let mut taken = HashSet::new();
        taken.insert("ops".to_string());
        taken.insert("ops-2".to_string());
        assert_eq!(ensure_unique("ops", &taken), "ops-3");
        assert_eq!(ensure_unique("sales", &taken), "sales");
    }
}
