//! Generated help text.

use std::sync::Arc;

use crate::env::env_var_name;
use crate::rule::{Rule, RuleKind};

/// What the help renderer needs to know about the parser.
pub(crate) struct HelpContext<'a> {
    pub name: &'a str,
    pub description: &'a str,
    pub env_prefix: &'a str,
    pub width: usize,
}

/// Render usage, description and the Commands/Arguments/Options sections.
pub(crate) fn render(ctx: &HelpContext<'_>, rules: &[Arc<Rule>]) -> String {
    let commands: Vec<&Rule> = of_kind(rules, RuleKind::Command);
    let mut arguments: Vec<&Rule> = of_kind(rules, RuleKind::Argument);
    arguments.sort_by_key(|r| r.order);
    let options: Vec<&Rule> = of_kind(rules, RuleKind::Option);

    let mut out = format!("Usage: {}", ctx.name);
    if !options.is_empty() {
        out.push_str(" [OPTIONS]");
    }
    if !commands.is_empty() {
        out.push_str(" <COMMAND>");
    }
    for arg in &arguments {
        out.push(' ');
        out.push_str(&usage_token(arg));
    }
    out.push('\n');

    if !ctx.description.trim().is_empty() {
        out.push('\n');
        for line in wrap(ctx.description.trim(), ctx.width) {
            out.push_str(&line);
            out.push('\n');
        }
    }

    let sections: [(&str, Vec<(String, String)>); 3] = [
        ("Commands", commands.iter().map(|r| (r.name.clone(), r.help.clone())).collect()),
        (
            "Arguments",
            arguments
                .iter()
                .map(|r| (usage_token(r), annotated(ctx, r)))
                .collect(),
        ),
        (
            "Options",
            options
                .iter()
                .map(|r| (option_left(r), annotated(ctx, r)))
                .collect(),
        ),
    ];
    for (title, rows) in sections {
        section(&mut out, title, rows, ctx.width);
    }
    out
}

fn of_kind(rules: &[Arc<Rule>], kind: RuleKind) -> Vec<&Rule> {
    rules
        .iter()
        .filter(|r| r.kind == kind)
        .map(|r| &**r)
        .collect()
}

fn section(out: &mut String, title: &str, rows: Vec<(String, String)>, width: usize) {
    if rows.is_empty() {
        return;
    }
    out.push_str(&format!("\n{title}:\n"));
    let left_width = rows.iter().map(|(l, _)| l.len()).max().unwrap_or(0);
    let indent = 2 + left_width + 2;
    let help_width = width.saturating_sub(indent).max(20);
    for (left, help) in rows {
        if help.is_empty() {
            out.push_str(&format!("  {left}\n"));
            continue;
        }
        let mut lines = wrap(&help, help_width).into_iter();
        let first = lines.next().unwrap_or_default();
        out.push_str(&format!("  {left:left_width$}  {first}\n"));
        for line in lines {
            out.push_str(&format!("{:indent$}{line}\n", ""));
        }
    }
}

fn usage_token(rule: &Rule) -> String {
    let name = rule.value_name.clone().unwrap_or_else(|| rule.name.clone());
    match (rule.required, rule.greedy) {
        (true, true) => format!("<{name}>..."),
        (false, true) => format!("[{name}]..."),
        (true, false) => format!("<{name}>"),
        (false, false) => format!("[{name}]"),
    }
}

fn option_left(rule: &Rule) -> String {
    let mut left = rule.aliases.join(", ");
    if rule.takes_value() {
        let placeholder = rule
            .value_name
            .clone()
            .unwrap_or_else(|| rule.name.to_uppercase().replace('-', "_"));
        left.push_str(&format!(" <{placeholder}>"));
    }
    left
}

fn annotated(ctx: &HelpContext<'_>, rule: &Rule) -> String {
    let mut help = rule.help.trim().to_string();
    let mut push = |note: String| {
        if !help.is_empty() {
            help.push(' ');
        }
        help.push_str(&note);
    };
    if let Some(default) = &rule.default {
        push(format!("(default={default})"));
    }
    if !rule.env_vars.is_empty() {
        let vars: Vec<String> = rule
            .env_vars
            .iter()
            .map(|v| env_var_name(ctx.env_prefix, v))
            .collect();
        push(format!("(env={})", vars.join(", ")));
    }
    if rule.required {
        push("(required)".to_string());
    }
    help
}

/// Greedy word wrap. Words longer than `width` get a line of their own.
pub(crate) fn wrap(text: &str, width: usize) -> Vec<String> {
    let mut lines = Vec::new();
    let mut current = String::new();
    for word in text.split_whitespace() {
        if !current.is_empty() && current.len() + 1 + word.len() > width {
            lines.push(std::mem::take(&mut current));
        }
        if !current.is_empty() {
            current.push(' ');
        }
        current.push_str(word);
    }
    if !current.is_empty() {
        lines.push(current);
    }
    lines
}
