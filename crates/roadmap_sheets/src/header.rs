//! Header normalization and alias resolution.
//!
//! Readers and writers reference fields by canonical names only; the per-tab
//! alias table is the single place spelling variants are declared.

use crate::cells::CellValue;
use std::collections::HashMap;

/// Normalize a header to its canonical form: lowercase, trimmed, separators
/// collapsed to single underscores.
pub fn normalize(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut last_was_sep = false;
    for ch in name.trim().chars() {
        let mapped = if ch.is_alphanumeric() {
            last_was_sep = false;
            Some(ch.to_lowercase().next().unwrap_or(ch))
        } else if last_was_sep {
            None
        } else {
            last_was_sep = true;
            Some('_')
        };
        if let Some(c) = mapped {
            out.push(c);
        }
    }
    out.trim_matches('_').to_string()
}

/// A canonical field name plus the header variants that resolve to it.
pub struct Alias {
    pub canonical: &'static str,
    pub variants: &'static [&'static str],
}

/// Resolve 0-based column positions for each canonical name present in the
/// headers. Unknown canonicals are simply absent from the result.
pub fn resolve_indices(headers: &[String], aliases: &[Alias]) -> HashMap<String, usize> {
    let normalized: Vec<String> = headers.iter().map(|h| normalize(h)).collect();
    let mut out = HashMap::new();

    for alias in aliases {
        let mut candidates = vec![normalize(alias.canonical)];
        candidates.extend(alias.variants.iter().map(|v| normalize(v)));

        if let Some(position) = normalized
            .iter()
            .position(|header| candidates.contains(header))
        {
            out.insert(alias.canonical.to_string(), position);
        }
    }
    out
}

/// Position map of every header, canonical-normalized, for extras capture.
pub fn all_indices(headers: &[String]) -> HashMap<String, usize> {
    headers
        .iter()
        .enumerate()
        .filter(|(_, h)| !h.trim().is_empty())
        .map(|(i, h)| (normalize(h), i))
        .collect()
}

/// Defensive read: the primary canonical name first, then each alias.
pub fn get_value<'a>(
    row: &'a HashMap<String, CellValue>,
    primary: &str,
    aliases: &[&str],
) -> Option<&'a CellValue> {
    if let Some(value) = row.get(primary) {
        return Some(value);
    }
    aliases.iter().find_map(|alias| row.get(*alias))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalization_collapses_separators() {
        assert_eq!(normalize("Initiative Key"), "initiative_key");
        assert_eq!(normalize("  Impact (Expected)  "), "impact_expected");
        assert_eq!(normalize("Engineering--Days"), "engineering_days");
        assert_eq!(normalize("KPI Contribution JSON"), "kpi_contribution_json");
    }

    #[test]
    fn resolves_through_variants() {
        let headers = vec![
            "Initiative Key".to_string(),
            "Idea Title".to_string(),
            "Reach".to_string(),
        ];
        let aliases = [
            Alias {
                canonical: "initiative_key",
                variants: &["key", "init_key"],
            },
            Alias {
                canonical: "title",
                variants: &["idea_title", "name"],
            },
            Alias {
                canonical: "rice_reach",
                variants: &["reach"],
            },
            Alias {
                canonical: "absent_column",
                variants: &[],
            },
        ];
        let indices = resolve_indices(&headers, &aliases);
        assert_eq!(indices["initiative_key"], 0);
        assert_eq!(indices["title"], 1);
        assert_eq!(indices["rice_reach"], 2);
        assert!(!indices.contains_key("absent_column"));
    }

    #[test]
    fn defensive_get_falls_back_to_aliases() {
        let mut row = HashMap::new();
        row.insert("reach".to_string(), CellValue::Number(10.0));
        assert!(get_value(&row, "rice_reach", &["reach"]).is_some());
        assert!(get_value(&row, "rice_reach", &["audience"]).is_none());
    }
}
