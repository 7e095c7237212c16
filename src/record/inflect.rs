use heck::ToKebabCase;

/// Default resource path of a record type: `OrderItem` becomes `order-items`.
pub fn resource_path(type_name: &str) -> String {
    let kebab = type_name.to_kebab_case();
    match kebab.rsplit_once('-') {
        Some((head, last)) => format!("{}-{}", head, pluralize(last)),
        None => pluralize(&kebab),
    }
}

/// English plural of a single lower-case word. Covers the regular rules and
/// the irregular nouns common in resource names.
pub fn pluralize(word: &str) -> String {
    const IRREGULAR: &[(&str, &str)] = &[
        ("person", "people"),
        ("child", "children"),
        ("man", "men"),
        ("woman", "women"),
        ("mouse", "mice"),
        ("goose", "geese"),
    ];
    const UNCOUNTABLE: &[&str] = &["data", "equipment", "information", "media", "news", "series"];

    if word.is_empty() || UNCOUNTABLE.contains(&word) {
        return word.to_string();
    }
    if let Some((_, plural)) = IRREGULAR.iter().find(|(singular, _)| *singular == word) {
        return plural.to_string();
    }
    if let Some(stem) = word.strip_suffix('y') {
        if !stem.ends_with(['a', 'e', 'i', 'o', 'u']) {
            return format!("{}ies", stem);
        }
    }
    if word.ends_with(['s', 'x', 'z']) || word.ends_with("ch") || word.ends_with("sh") {
        return format!("{}es", word);
    }
    format!("{}s", word)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resource_path() {
        assert_eq!(resource_path("Customer"), "customers");
        assert_eq!(resource_path("OrderItem"), "order-items");
        assert_eq!(resource_path("Category"), "categories");
        assert_eq!(resource_path("Address"), "addresses");
        assert_eq!(resource_path("Person"), "people");
        assert_eq!(resource_path("Key"), "keys");
    }
}
