#[cfg(test)]
pub mod test {
    use std::sync::Arc;

    use crate::parser::Parser;
    use crate::rule::{Rule, RuleBuilder};

    /// Build rules with declaration order applied, the way `Parser::add` does.
    pub fn rules(builders: Vec<RuleBuilder>) -> Vec<Arc<Rule>> {
        builders
            .into_iter()
            .enumerate()
            .map(|(i, b)| {
                let mut rule = b.build().unwrap();
                rule.order = i;
                Arc::new(rule)
            })
            .collect()
    }

    pub fn argv(tokens: &[&str]) -> Vec<String> {
        tokens.iter().map(|t| t.to_string()).collect()
    }

    /// The `--power-level` option used throughout the precedence tests.
    pub fn power_rules() -> Vec<Arc<Rule>> {
        rules(vec![
            Rule::option("--power-level")
                .alias("-p")
                .is_int()
                .env("POWER_LEVEL")
                .help("Power level"),
        ])
    }

    /// A parser with an empty synthetic environment.
    pub fn parser() -> Parser {
        Parser::builder().name("test").env_vars(Vec::new()).build()
    }

    /// A parser over the given synthetic environment.
    pub fn parser_with_env(vars: &[(&str, &str)]) -> Parser {
        Parser::builder()
            .name("test")
            .env_vars(vars.iter().map(|(k, v)| (k.to_string(), v.to_string())))
            .build()
    }

    #[test]
    fn rules_carry_declaration_order() {
        let set = rules(vec![Rule::argument("a"), Rule::argument("b")]);
        assert_eq!(set[0].order, 0);
        assert_eq!(set[1].order, 1);
    }
}
