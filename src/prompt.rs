use anyhow::{Context, Result, bail};
use regex::Regex;
use std::collections::HashMap;
use std::path::Path;

/// Substitute `${NAME}` placeholders from `vars`. Unresolved placeholders
/// are a misuse fault listing every missing key; a `$` that is not part of
/// a placeholder passes through untouched.
pub fn render(template: &str, vars: &HashMap<String, String>) -> Result<String> {
    let placeholder = Regex::new(r"\$\{([A-Za-z0-9_]+)\}").expect("valid regex");

    let mut missing = Vec::new();
    let rendered = placeholder.replace_all(template, |captures: &regex::Captures| {
        let name = &captures[1];
        match vars.get(name) {
            Some(value) => value.clone(),
            None => {
                if !missing.contains(&name.to_string()) {
                    missing.push(name.to_string());
                }
                String::new()
            }
        }
    });

    if !missing.is_empty() {
        bail!("template references undefined variables: {}", missing.join(", "));
    }
    Ok(rendered.into_owned())
}

/// Variables from a JSON or YAML file of string-to-string pairs, chosen by
/// extension the way the config loader is.
pub fn vars_from_file(path: &Path) -> Result<HashMap<String, String>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed reading {}", path.display()))?;
    let vars: HashMap<String, String> = if path
        .extension()
        .and_then(|e| e.to_str())
        .map(|s| s.eq_ignore_ascii_case("json"))
        .unwrap_or(false)
    {
        serde_json::from_str(&text).context("invalid JSON vars file")?
    } else {
        serde_yaml::from_str(&text).context("invalid YAML vars file")?
    };
    Ok(vars)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn placeholders_are_substituted() {
        let template = "Fix issue #${ISSUE_NUMBER} in ${REPO}.\n\n${ISSUE_BODY}\n";
        let rendered = render(
            template,
            &vars(&[
                ("ISSUE_NUMBER", "42"),
                ("REPO", "o/r"),
                ("ISSUE_BODY", "it crashes"),
            ]),
        )
        .expect("render");
        assert_eq!(rendered, "Fix issue #42 in o/r.\n\nit crashes\n");
    }

    #[test]
    fn repeated_placeholders_substitute_everywhere() {
        let rendered = render("${A} and ${A}", &vars(&[("A", "x")])).expect("render");
        assert_eq!(rendered, "x and x");
    }

    #[test]
    fn unknown_placeholders_fail_and_are_all_named() {
        let err = render("${A} ${B} ${A}", &vars(&[])).expect_err("expected error");
        let message = err.to_string();
        assert!(message.contains("A"));
        assert!(message.contains("B"));
        assert!(!message.contains("A, B, A"));
    }

    #[test]
    fn bare_dollars_and_braces_pass_through() {
        let rendered = render("cost $5, ${X}, {Y}, $Z", &vars(&[("X", "ok")])).expect("render");
        assert_eq!(rendered, "cost $5, ok, {Y}, $Z");
    }

    #[test]
    fn extra_vars_are_ignored() {
        let rendered = render("hi", &vars(&[("UNUSED", "v")])).expect("render");
        assert_eq!(rendered, "hi");
    }
}
