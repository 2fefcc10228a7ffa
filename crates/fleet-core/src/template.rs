//! Single-pass `{{name}}` templating for generated shell scripts.
//!
//! A template is scanned once, left to right. Each placeholder is replaced by
//! its value and the scan resumes *after* the inserted text, so a value that
//! itself contains `{{...}}` is emitted verbatim and never expanded again.
//! Nested scripts are rendered first and then passed in as plain values.
//!
//! Rendering fails on a placeholder with no value and on a value that the
//! template never references, so parameter drift is caught in tests instead
//! of shipping a script with a literal `{{name}}` in it.

use std::collections::BTreeMap;

use crate::error::{FleetError, Result};

const OPEN: &str = "{{";
const CLOSE: &str = "}}";

/// Named values for one template layer.
#[derive(Debug, Clone, Default)]
pub struct Vars {
    values: BTreeMap<&'static str, String>,
}

impl Vars {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(mut self, name: &'static str, value: impl Into<String>) -> Self {
        self.values.insert(name, value.into());
        self
    }
}

/// A static template body.
#[derive(Debug, Clone, Copy)]
pub struct Template {
    name: &'static str,
    body: &'static str,
}

impl Template {
    pub const fn new(name: &'static str, body: &'static str) -> Self {
        Self { name, body }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn render(&self, vars: &Vars) -> Result<String> {
        let mut out = String::with_capacity(self.body.len());
        let mut used = std::collections::BTreeSet::new();
        let mut rest = self.body;
        let mut offset = 0;

        while let Some(start) = rest.find(OPEN) {
            out.push_str(&rest[..start]);
            let after_open = &rest[start + OPEN.len()..];
            let end = after_open
                .find(CLOSE)
                .ok_or(FleetError::UnterminatedPlaceholder(offset + start))?;
            let key = after_open[..end].trim();
            let value = vars
                .values
                .get(key)
                .ok_or_else(|| FleetError::MissingTemplateVar(key.to_string()))?;
            out.push_str(value);
            used.insert(key);

            let consumed = start + OPEN.len() + end + CLOSE.len();
            offset += consumed;
            rest = &rest[consumed..];
        }
        out.push_str(rest);

        if let Some(unused) = vars.values.keys().find(|k| !used.contains(**k)) {
            return Err(FleetError::UnusedTemplateVar(unused.to_string()));
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn substitutes_named_placeholders() {
        let t = Template::new("greet", "hello {{who}}, from {{ where }}\n");
        let out = t
            .render(&Vars::new().set("who", "node-1").set("where", "us-central1"))
            .unwrap();
        assert_eq!(out, "hello node-1, from us-central1\n");
    }

    #[test]
    fn values_are_not_reexpanded() {
        let inner = Template::new("inner", "echo {{x}}");
        let inner_out = inner.render(&Vars::new().set("x", "{{y}}")).unwrap();
        assert_eq!(inner_out, "echo {{y}}");

        let outer = Template::new("outer", "A\n{{block}}\nB");
        let out = outer.render(&Vars::new().set("block", inner_out)).unwrap();
        assert_eq!(out, "A\necho {{y}}\nB");
    }

    #[test]
    fn missing_var_is_an_error() {
        let t = Template::new("t", "{{a}} {{b}}");
        let err = t.render(&Vars::new().set("a", "1")).unwrap_err();
        assert!(matches!(err, FleetError::MissingTemplateVar(ref k) if k == "b"));
    }

    #[test]
    fn unused_var_is_an_error() {
        let t = Template::new("t", "{{a}}");
        let err = t
            .render(&Vars::new().set("a", "1").set("extra", "2"))
            .unwrap_err();
        assert!(matches!(err, FleetError::UnusedTemplateVar(ref k) if k == "extra"));
    }

    #[test]
    fn unterminated_placeholder() {
        let t = Template::new("t", "ok {{broken");
        assert!(matches!(
            t.render(&Vars::new()).unwrap_err(),
            FleetError::UnterminatedPlaceholder(3)
        ));
    }

    #[test]
    fn shell_braces_pass_through() {
        let t = Template::new("t", "echo ${HOME} {{v}}");
        assert_eq!(t.render(&Vars::new().set("v", "x")).unwrap(), "echo ${HOME} x");
    }
}
