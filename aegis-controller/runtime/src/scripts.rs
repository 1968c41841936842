//! Traffic redirection scripts run by the init container.
//!
//! Each script is a template with a fixed number of `%s` placeholders,
//! substituted in order.

use aegis_controller_core::{Error, Result};

#[derive(Copy, Clone, Debug)]
pub struct Template {
    name: &'static str,
    text: &'static str,
    arity: usize,
}

/// Parameters: proxy uid, outbound port.
pub const EGRESS: Template = Template::new("egress", include_str!("../scripts/egress.sh"), 2);

/// Parameters: proxy uid, inbound port, application port.
pub const INGRESS: Template = Template::new("ingress", include_str!("../scripts/ingress.sh"), 3);

/// Parameters: proxy uid, inbound port, outbound port, application port.
pub const INGRESS_EGRESS: Template = Template::new(
    "ingress-egress",
    include_str!("../scripts/ingress_egress.sh"),
    4,
);

const PLACEHOLDER: &str = "%s";

impl Template {
    const fn new(name: &'static str, text: &'static str, arity: usize) -> Self {
        Self { name, text, arity }
    }

    pub fn arity(&self) -> usize {
        self.arity
    }

    pub fn render(&self, params: &[&str]) -> Result<String> {
        let placeholders = self.text.matches(PLACEHOLDER).count();
        if placeholders != self.arity || params.len() != self.arity {
            return Err(Error::Validation(format!(
                "{} script takes {} parameters, got {}",
                self.name,
                self.arity,
                params.len()
            )));
        }

        let mut out = String::with_capacity(self.text.len());
        let mut rest = self.text;
        for param in params {
            let Some((head, tail)) = rest.split_once(PLACEHOLDER) else {
                break;
            };
            out.push_str(head);
            out.push_str(param);
            rest = tail;
        }
        out.push_str(rest);
        Ok(out)
    }
}
