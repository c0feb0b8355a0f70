/// Render a reminder template, replacing `{{key}}` placeholders. Unknown
/// placeholders are left as-is so a mistyped template is visible in the
/// delivered text rather than silently blanked.
pub fn render(template: &str, vars: &[(&str, &str)]) -> String {
    let mut out = template.to_string();
    for (key, value) in vars {
        out = out.replace(&format!("{{{{{key}}}}}"), value);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replaces_known_placeholders() {
        let out = render(
            "Hi {{name}}, see you on {{date}} at {{time}}.",
            &[("name", "Ana"), ("date", "2025-04-01"), ("time", "09:30")],
        );
        assert_eq!(out, "Hi Ana, see you on 2025-04-01 at 09:30.");
    }

    #[test]
    fn repeated_and_unknown_placeholders() {
        let out = render("{{name}} {{name}} {{typo}}", &[("name", "Ana")]);
        assert_eq!(out, "Ana Ana {{typo}}");
    }
}
