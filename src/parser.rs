//! The parser: owns the rules and the published [`Options`] snapshot.
//!
//! Rules are declared with [`Parser::add`] while the parser is still owned
//! mutably. After that every entry point takes `&self`, so a parser can sit
//! in an `Arc` and be re-applied from a watch callback while other threads
//! read [`Parser::get_opts`].
//!
//! Each apply resolves every rule again from its own highest-precedence
//! source. The last argv match and the last external layer are kept, so a
//! backend change never overrides a value given on the command line.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::backend::Backend;
use crate::env::EnvSource;
use crate::error::ArgfigError;
use crate::help::{self, HelpContext};
use crate::ini;
use crate::matcher::{MatchSettings, Matches, match_args};
use crate::options::Options;
use crate::resolve::{ResolveInput, resolve};
use crate::rule::{Rule, RuleBuilder, RuleKind};
use crate::types::{ChangeEvent, Key, lock};
use crate::validate::validate_rules;
use crate::value::Value;
use crate::watch::{self, WatchHandle, WatchSettings};

const DEFAULT_TERMINATOR: &str = "--";
const DEFAULT_WORD_WRAP: usize = 100;
const HELP_NAME: &str = "help";

#[derive(Debug, Clone)]
struct Settings {
    name: String,
    description: String,
    env_prefix: String,
    strict: bool,
    no_help: bool,
    terminator: Option<String>,
    word_wrap: usize,
    watch: WatchSettings,
    env: EnvSource,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            name: String::new(),
            description: String::new(),
            env_prefix: String::new(),
            strict: false,
            no_help: false,
            terminator: Some(DEFAULT_TERMINATOR.to_string()),
            word_wrap: DEFAULT_WORD_WRAP,
            watch: WatchSettings::default(),
            env: EnvSource::Process,
        }
    }
}

/// Builder for a [`Parser`].
#[derive(Debug, Default)]
pub struct ParserBuilder {
    settings: Settings,
}

impl ParserBuilder {
    /// Program name shown in help. Defaults to the executable's file name.
    pub fn name(mut self, name: &str) -> Self {
        self.settings.name = name.to_string();
        self
    }

    pub fn description(mut self, text: &str) -> Self {
        self.settings.description = text.to_string();
        self
    }

    /// Prefix prepended to every rule's environment variable names,
    /// e.g. `"MYAPP_"` turns `.env("PORT")` into `MYAPP_PORT`.
    pub fn env_prefix(mut self, prefix: &str) -> Self {
        self.settings.env_prefix = prefix.to_string();
        self
    }

    /// Reject command-line tokens that match no rule. Off by default: such
    /// tokens are logged and collected in [`Parser::ignored_args`].
    pub fn strict(mut self, strict: bool) -> Self {
        self.settings.strict = strict;
        self
    }

    /// Do not install the automatic `--help`/`-h` flag.
    pub fn no_help(mut self) -> Self {
        self.settings.no_help = true;
        self
    }

    /// Token that ends matching. Defaults to `--`.
    pub fn terminator(mut self, token: &str) -> Self {
        self.settings.terminator = Some(token.to_string());
        self
    }

    pub fn no_terminator(mut self) -> Self {
        self.settings.terminator = None;
        self
    }

    /// Column width for help text.
    pub fn word_wrap(mut self, width: usize) -> Self {
        self.settings.word_wrap = width;
        self
    }

    /// Retry timing for [`Parser::watch`]: the first wait is `step`, doubling
    /// up to `max`.
    pub fn watch_backoff(mut self, step: Duration, max: Duration) -> Self {
        self.settings.watch = WatchSettings { step, max };
        self
    }

    /// Use these variables instead of the process environment.
    pub fn env_vars(mut self, vars: impl IntoIterator<Item = (String, String)>) -> Self {
        self.settings.env = EnvSource::fixed(vars);
        self
    }

    pub fn build(self) -> Parser {
        Parser::with_settings(self.settings, Vec::new())
    }
}

#[derive(Debug)]
pub struct Parser {
    settings: Settings,
    rules: Vec<Arc<Rule>>,
    last_match: Mutex<Matches>,
    external: Mutex<Options>,
    current: Mutex<Arc<Options>>,
    /// Held from the external-layer update until the snapshot is published,
    /// so concurrent appliers publish in the order they changed the layer.
    applying: Mutex<()>,
}

impl Default for Parser {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl Parser {
    pub fn builder() -> ParserBuilder {
        ParserBuilder::default()
    }

    pub fn new(name: &str) -> Self {
        Self::builder().name(name).build()
    }

    fn with_settings(settings: Settings, rules: Vec<Arc<Rule>>) -> Self {
        Self {
            settings,
            rules,
            last_match: Mutex::new(Matches::default()),
            external: Mutex::new(Options::new()),
            current: Mutex::new(Arc::new(Options::new())),
            applying: Mutex::new(()),
        }
    }

    /// Declare a rule. Builder-level conflicts are reported here; conflicts
    /// between rules are reported by the next parse or apply.
    pub fn add(&mut self, builder: RuleBuilder) -> Result<&mut Self, ArgfigError> {
        let mut rule = builder.build()?;
        rule.order = self.rules.iter().map(|r| r.order + 1).max().unwrap_or(0);
        debug!(rule = %rule.key(), kind = ?rule.kind, "rule added");
        self.rules.push(Arc::new(rule));
        Ok(self)
    }

    pub fn rules(&self) -> &[Arc<Rule>] {
        &self.rules
    }

    pub fn name(&self) -> &str {
        &self.settings.name
    }

    /// Match `argv` (without the program name) and apply.
    pub fn parse<S: AsRef<str>>(&mut self, argv: &[S]) -> Result<Arc<Options>, ArgfigError> {
        self.ensure_help();
        validate_rules(&self.rules)?;

        let argv: Vec<String> = argv.iter().map(|a| a.as_ref().to_string()).collect();
        let settings = MatchSettings {
            terminator: self.settings.terminator.as_deref(),
            strict: self.settings.strict,
        };
        let matches = match_args(&self.rules, &argv, settings)?;
        *lock(&self.last_match) = matches;

        self.publish_with(|_| {})
    }

    /// Parse the process arguments.
    pub fn parse_args(&mut self) -> Result<Arc<Options>, ArgfigError> {
        let argv: Vec<String> = std::env::args().skip(1).collect();
        self.parse(&argv)
    }

    /// Parse, or print help and exit with status 1.
    ///
    /// Help is printed to stdout when `--help` was given, and to stderr
    /// after the error message when parsing failed.
    pub fn parse_simple<S: AsRef<str>>(&mut self, argv: &[S]) -> Arc<Options> {
        match self.parse(argv) {
            Ok(opts) if wants_help(&opts) => {
                println!("{}", self.help());
                std::process::exit(1);
            }
            Ok(opts) => opts,
            Err(e) if e.partial().is_some_and(|p| wants_help(p)) => {
                println!("{}", self.help());
                std::process::exit(1);
            }
            Err(e) => {
                eprintln!("{e}\n\n{}", self.help());
                std::process::exit(1);
            }
        }
    }

    /// Resolve every rule and publish the result.
    ///
    /// `Some(external)` replaces the stored external layer; `None` re-applies
    /// the current one. When some rules fail the best-effort snapshot is still
    /// published and returned inside [`ArgfigError::Unresolved`]. A bad
    /// environment value publishes nothing.
    ///
    /// Applies are serialized; a store callback must not call back into the
    /// same parser.
    pub fn apply(&self, external: Option<&Options>) -> Result<Arc<Options>, ArgfigError> {
        validate_rules(&self.rules)?;
        self.publish_with(|layer| {
            if let Some(ext) = external {
                *layer = ext.clone();
            }
        })
    }

    /// Apply INI text as the external layer.
    pub fn from_ini(&self, text: &str) -> Result<Arc<Options>, ArgfigError> {
        let layer = ini::parse(text)?;
        self.apply(Some(&layer))
    }

    /// Fetch every rule's key from `backend` and apply the result as the
    /// external layer. Keys that fail to load are logged and skipped.
    pub async fn from_backend(&self, backend: &dyn Backend) -> Result<Arc<Options>, ArgfigError> {
        let mut layer = Options::new();
        for rule in &self.rules {
            match rule.kind {
                RuleKind::Command => {}
                RuleKind::ConfigGroup => {
                    match backend.list(&Key::new(rule.group.clone(), "")).await {
                        Ok(pairs) => {
                            for pair in pairs {
                                layer.group_mut(&pair.key.group).set(pair.key.name, pair.value);
                            }
                        }
                        Err(e) => warn!(group = %rule.group, error = %e, "skipping config group"),
                    }
                }
                _ => match backend.get(&rule.key()).await {
                    Ok(pair) => {
                        layer.group_mut(&pair.key.group).set(pair.key.name, pair.value);
                    }
                    Err(ArgfigError::KeyNotFound(key)) => debug!(key = %key, "not in backend"),
                    Err(e) => warn!(key = %rule.key(), error = %e, "skipping key"),
                },
            }
        }
        info!(root = backend.root_key(), "loaded configuration from backend");
        self.apply(Some(&layer))
    }

    /// Fold one backend change into the external layer and re-apply.
    pub fn apply_change(&self, event: &ChangeEvent) -> Result<Arc<Options>, ArgfigError> {
        debug!(key = %event.key, deleted = event.deleted, "applying change");
        self.publish_with(|layer| {
            layer.from_change_event(event);
        })
    }

    /// Watch `backend` in the background, handing every change (or error) to
    /// `callback`. Returns once the first watch attempt has completed.
    ///
    /// The callback usually calls [`apply_change`](Self::apply_change) on a
    /// shared parser.
    pub async fn watch<F>(&self, backend: Arc<dyn Backend>, callback: F) -> WatchHandle
    where
        F: FnMut(Result<ChangeEvent, ArgfigError>) + Send + 'static,
    {
        watch::spawn(backend, self.rules.clone(), self.settings.watch, callback).await
    }

    /// The last published snapshot.
    pub fn get_opts(&self) -> Arc<Options> {
        Arc::clone(&lock(&self.current))
    }

    /// Replace the published snapshot. Holders of the old one keep it.
    pub fn set_opts(&self, opts: Arc<Options>) {
        *lock(&self.current) = opts;
    }

    /// Tokens after the terminator, or after a matched command.
    pub fn remaining_args(&self) -> Vec<String> {
        lock(&self.last_match).remaining().to_vec()
    }

    /// Tokens that matched no rule.
    pub fn ignored_args(&self) -> Vec<String> {
        lock(&self.last_match).ignored().to_vec()
    }

    /// Name of the command matched by the last parse.
    pub fn matched_command(&self) -> Option<String> {
        lock(&self.last_match).command().map(|c| c.name.clone())
    }

    /// A fresh parser with the same settings and every non-command rule.
    pub fn sub_parser(&self) -> Parser {
        let rules = self
            .rules
            .iter()
            .filter(|r| r.kind != RuleKind::Command)
            .cloned()
            .collect();
        Parser::with_settings(self.settings.clone(), rules)
    }

    /// Run the handler of the command matched by the last parse with a
    /// sub-parser and the tokens after the command. Returns its exit code.
    pub fn run_command(&self) -> Result<i32, ArgfigError> {
        let (command, remaining) = {
            let matches = lock(&self.last_match);
            (matches.command().cloned(), matches.remaining().to_vec())
        };
        let Some((command, handler)) =
            command.and_then(|c| c.command.clone().map(|handler| (c, handler)))
        else {
            return Err(ArgfigError::NoCommand);
        };

        let mut sub = self.sub_parser();
        sub.settings.name = format!("{} {}", self.program_name(), command.name);
        info!(command = %command.name, args = remaining.len(), "running command");
        handler(&mut sub, &remaining[..])
    }

    pub fn help(&self) -> String {
        let name = self.program_name();
        help::render(
            &HelpContext {
                name: &name,
                description: &self.settings.description,
                env_prefix: &self.settings.env_prefix,
                width: self.settings.word_wrap,
            },
            &self.rules,
        )
    }

    fn program_name(&self) -> String {
        if !self.settings.name.is_empty() {
            return self.settings.name.clone();
        }
        std::env::args()
            .next()
            .and_then(|arg0| {
                std::path::Path::new(&arg0)
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
            })
            .unwrap_or_default()
    }

    fn ensure_help(&mut self) {
        if self.settings.no_help {
            return;
        }
        let taken = |token: &str| self.rules.iter().any(|r| r.aliases.iter().any(|a| a == token));
        if taken("--help") || self.rules.iter().any(|r| r.name == HELP_NAME) {
            return;
        }
        let mut help = Rule::option("--help").is_true().help("Show this help message");
        if !taken("-h") {
            help = help.alias("-h");
        }
        if let Err(e) = self.add(help) {
            warn!(error = %e, "could not install --help");
        }
    }

    /// Update the external layer and publish the snapshot resolved from it,
    /// all under the apply lock.
    fn publish_with<F>(&self, update: F) -> Result<Arc<Options>, ArgfigError>
    where
        F: FnOnce(&mut Options),
    {
        let _applying = lock(&self.applying);
        let layer = {
            let mut external = lock(&self.external);
            update(&mut external);
            external.clone()
        };
        self.publish(&layer)
    }

    fn publish(&self, external: &Options) -> Result<Arc<Options>, ArgfigError> {
        let env_vars = self.settings.env.snapshot();
        let matches = lock(&self.last_match).clone();
        let resolved = resolve(&ResolveInput {
            rules: &self.rules,
            matches: &matches,
            env_vars: &env_vars,
            env_prefix: &self.settings.env_prefix,
            external: Some(external),
        })?;

        let snapshot = Arc::new(resolved.options);
        self.set_opts(Arc::clone(&snapshot));
        if resolved.errors.is_empty() {
            Ok(snapshot)
        } else {
            warn!(failed = resolved.errors.len(), "published snapshot with unresolved rules");
            Err(ArgfigError::Unresolved {
                errors: resolved.errors,
                partial: snapshot,
            })
        }
    }
}

fn wants_help(opts: &Options) -> bool {
    opts.get(HELP_NAME) == Some(&Value::Bool(true))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;
    use crate::fixtures::test::{parser, parser_with_env};
    use crate::options::Source;

    fn power(p: &mut Parser) {
        p.add(
            Rule::option("--power-level")
                .alias("-p")
                .is_int()
                .env("POWER_LEVEL"),
        )
        .unwrap();
    }

    #[test]
    fn default_resolves_without_sources() {
        let mut p = parser();
        p.add(Rule::option("--port").is_int().default("10000")).unwrap();
        let opts = p.parse(&[] as &[&str]).unwrap();
        assert_eq!(opts.int("port"), 10000);
    }

    #[tokio::test]
    async fn argv_env_backend_precedence() {
        let backend = MemoryBackend::new("app");
        backend.insert(Key::top("power-level"), "9");

        let mut p = parser_with_env(&[("POWER_LEVEL", "7")]);
        power(&mut p);
        p.parse(&["--power-level", "5"]).unwrap();
        let opts = p.from_backend(&backend).await.unwrap();
        assert_eq!(opts.int("power-level"), 5);

        let opts = p.parse(&[] as &[&str]).unwrap();
        assert_eq!(opts.int("power-level"), 7);

        let mut p = parser();
        power(&mut p);
        p.from_backend(&backend).await.unwrap();
        let opts = p.parse(&[] as &[&str]).unwrap();
        assert_eq!(opts.int("power-level"), 9);
        assert_eq!(opts.source("power-level"), Some(Source::External));
    }

    #[test]
    fn env_prefix_applies() {
        let mut p = Parser::builder()
            .env_prefix("APP_")
            .env_vars([("APP_POWER_LEVEL".to_string(), "3".to_string())])
            .build();
        power(&mut p);
        assert_eq!(p.parse(&[] as &[&str]).unwrap().int("power-level"), 3);
    }

    #[test]
    fn count_flag() {
        let mut p = parser();
        p.add(Rule::option("--verbose").count()).unwrap();
        let opts = p.parse(&["--verbose", "--verbose", "--verbose"]).unwrap();
        assert_eq!(opts.int("verbose"), 3);
        let opts = p.parse(&[] as &[&str]).unwrap();
        assert_eq!(opts.int("verbose"), 0);
    }

    #[test]
    fn store_string_slice_replaces_on_reapply() {
        let dest = Arc::new(Mutex::new(Vec::new()));
        let mut p = parser();
        p.add(Rule::option("--list").store_string_slice(&dest)).unwrap();

        p.parse(&["--list", "one,two,three"]).unwrap();
        assert_eq!(*dest.lock().unwrap(), vec!["one", "two", "three"]);

        p.parse(&["--list", "six,five,four"]).unwrap();
        assert_eq!(*dest.lock().unwrap(), vec!["six", "five", "four"]);
    }

    #[test]
    fn store_follows_external_layer() {
        let dest = Arc::new(Mutex::new(Vec::new()));
        let mut p = parser();
        p.add(Rule::config("list").store_string_slice(&dest)).unwrap();

        p.apply(Some(&Options::from_pairs([("list", "one,two,three")]))).unwrap();
        p.apply(Some(&Options::from_pairs([("list", "six,five,four")]))).unwrap();
        assert_eq!(*dest.lock().unwrap(), vec!["six", "five", "four"]);
    }

    #[test]
    fn required_error_still_publishes() {
        let mut p = parser();
        p.add(Rule::option("--endpoint").required()).unwrap();
        p.add(Rule::option("--port").is_int().default("80")).unwrap();

        let err = p.parse(&[] as &[&str]).unwrap_err();
        assert!(err.to_string().contains("endpoint"));
        let partial = err.partial().unwrap();
        assert_eq!(partial.int("port"), 80);
        assert!(Arc::ptr_eq(partial, &p.get_opts()));
    }

    #[test]
    fn bad_env_publishes_nothing() {
        let mut p = parser_with_env(&[("POWER_LEVEL", "lots")]);
        power(&mut p);
        let before = p.get_opts();
        let err = p.parse(&[] as &[&str]).unwrap_err();
        assert!(matches!(err, ArgfigError::Cast { .. }));
        assert!(Arc::ptr_eq(&before, &p.get_opts()));
    }

    #[test]
    fn validation_fails_before_matching() {
        let mut p = parser();
        p.add(Rule::option("--power-level").alias("-p")).unwrap();
        p.add(Rule::option("--port").alias("-p")).unwrap();
        let err = p.parse(&["-p", "1"]).unwrap_err();
        assert!(matches!(err, ArgfigError::DuplicateAlias { .. }));
        assert!(p.get_opts().is_empty());
    }

    #[test]
    fn from_ini_fills_rules() {
        let mut p = parser();
        p.add(Rule::config("one")).unwrap();
        p.add(Rule::config("two")).unwrap();
        let opts = p.from_ini("one=this is one value\ntwo=this is two value\n").unwrap();
        assert_eq!(opts.string("one"), "this is one value");
        assert_eq!(opts.string("two"), "this is two value");
    }

    #[test]
    fn from_ini_groups() {
        let mut p = parser();
        p.add(Rule::config("url").in_group("database")).unwrap();
        let opts = p.from_ini("[database]\nurl=pg://db\n").unwrap();
        assert_eq!(opts.group("database").string("url"), "pg://db");
    }

    #[tokio::test]
    async fn from_backend_lists_config_groups() {
        let backend = MemoryBackend::new("app");
        backend.insert(Key::new("endpoints", "primary"), "10.0.0.1");
        backend.insert(Key::new("endpoints", "backup"), "10.0.0.2");
        let mut p = parser();
        p.add(Rule::config_group("endpoints")).unwrap();
        let opts = p.from_backend(&backend).await.unwrap();
        assert_eq!(opts.group("endpoints").len(), 2);
        assert_eq!(opts.group("endpoints").string("backup"), "10.0.0.2");
    }

    #[tokio::test]
    async fn from_backend_required_missing() {
        let backend = MemoryBackend::new("app");
        backend.insert(Key::top("host"), "example.com");
        let mut p = parser();
        p.add(Rule::config("token").required()).unwrap();
        p.add(Rule::config("host")).unwrap();
        let err = p.from_backend(&backend).await.unwrap_err();
        assert!(err.to_string().contains("token"));
        assert_eq!(err.partial().unwrap().string("host"), "example.com");
    }

    #[test]
    fn apply_change_sets_and_deletes() {
        let mut p = parser();
        p.add(Rule::config("port").is_int().default("80")).unwrap();
        let opts = p.apply_change(&ChangeEvent::set(Key::top("port"), "81")).unwrap();
        assert_eq!(opts.int("port"), 81);
        let opts = p.apply_change(&ChangeEvent::deleted(Key::top("port"))).unwrap();
        assert_eq!(opts.int("port"), 80);
    }

    #[test]
    fn apply_change_keeps_argv_precedence() {
        let mut p = parser();
        power(&mut p);
        p.parse(&["-p", "5"]).unwrap();
        let opts = p
            .apply_change(&ChangeEvent::set(Key::top("power-level"), "9"))
            .unwrap();
        assert_eq!(opts.int("power-level"), 5);
    }

    #[test]
    fn concurrent_changes_publish_latest_layer() {
        use std::sync::Barrier;

        let entered = Arc::new(Barrier::new(2));
        let release = Arc::new(Barrier::new(2));
        let (hold_entered, hold_release) = (Arc::clone(&entered), Arc::clone(&release));
        let mut p = parser();
        p.add(Rule::config("port").is_int().store_with(move |v| {
            if *v == Value::Int(1) {
                hold_entered.wait();
                hold_release.wait();
            }
        }))
        .unwrap();
        let p = Arc::new(p);

        let first = {
            let p = Arc::clone(&p);
            std::thread::spawn(move || {
                p.apply_change(&ChangeEvent::set(Key::top("port"), "1")).map(|o| o.int("port"))
            })
        };
        entered.wait();
        let second = {
            let p = Arc::clone(&p);
            std::thread::spawn(move || {
                p.apply_change(&ChangeEvent::set(Key::top("port"), "2")).map(|o| o.int("port"))
            })
        };
        std::thread::sleep(Duration::from_millis(50));
        release.wait();

        assert_eq!(first.join().unwrap().unwrap(), 1);
        assert_eq!(second.join().unwrap().unwrap(), 2);
        assert_eq!(p.get_opts().int("port"), 2);
    }

    #[test]
    fn run_command_sees_parent_stores() {
        let config = Arc::new(Mutex::new(String::new()));
        let seen = Arc::new(Mutex::new(String::new()));
        let (dest, sink) = (Arc::clone(&config), Arc::clone(&seen));
        let mut p = parser();
        p.add(Rule::option("--config").store_string(&config)).unwrap();
        p.add(Rule::command("set", move |sub, args| {
            sub.add(Rule::argument("key"))?;
            sub.add(Rule::argument("value"))?;
            sub.parse(args)?;
            *sink.lock().unwrap() = dest.lock().unwrap().clone();
            Ok(0)
        }))
        .unwrap();

        p.parse(&["--config", "./demo.toml", "set", "port", "8443"]).unwrap();
        assert_eq!(p.run_command().unwrap(), 0);
        assert_eq!(*seen.lock().unwrap(), "./demo.toml");
    }

    #[tokio::test]
    async fn watch_updates_published_snapshot() {
        let backend = Arc::new(MemoryBackend::new("app"));
        let mut p = Parser::builder()
            .env_vars(Vec::new())
            .watch_backoff(Duration::from_millis(5), Duration::from_millis(20))
            .build();
        p.add(Rule::config("port").is_int().default("80")).unwrap();
        let p = Arc::new(p);
        p.apply(None).unwrap();

        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let shared = Arc::clone(&p);
        let handle = p
            .watch(backend.clone(), move |event| {
                if let Ok(event) = event {
                    let _ = tx.send(shared.apply_change(&event).map(|o| o.int("port")));
                }
            })
            .await;

        backend.set(&Key::top("port"), "8443").await.unwrap();
        let port = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(port, 8443);
        assert_eq!(p.get_opts().int("port"), 8443);
        handle.cancel().await;
    }

    #[test]
    fn help_flag_installed() {
        let mut p = parser();
        let opts = p.parse(&["-h"]).unwrap();
        assert!(wants_help(&opts));
        assert!(p.help().contains("--help, -h"));
    }

    #[test]
    fn help_flag_respects_existing_short_alias() {
        let mut p = parser();
        p.add(Rule::option("--host").alias("-h")).unwrap();
        let opts = p.parse(&["-h", "example.com"]).unwrap();
        assert_eq!(opts.string("host"), "example.com");
        assert!(!wants_help(&opts));
        assert!(p.rules().iter().any(|r| r.aliases() == ["--help"]));
    }

    #[test]
    fn no_help_skips_flag() {
        let mut p = Parser::builder().no_help().env_vars(Vec::new()).build();
        p.parse(&[] as &[&str]).unwrap();
        assert!(p.rules().is_empty());
    }

    #[test]
    fn help_installed_once() {
        let mut p = parser();
        p.parse(&[] as &[&str]).unwrap();
        p.parse(&[] as &[&str]).unwrap();
        assert_eq!(p.rules().iter().filter(|r| r.name() == HELP_NAME).count(), 1);
    }

    #[test]
    fn terminator_leaves_remaining() {
        let mut p = parser();
        p.add(Rule::option("--name")).unwrap();
        p.parse(&["--name", "a", "--", "--name", "b"]).unwrap();
        assert_eq!(p.get_opts().string("name"), "a");
        assert_eq!(p.remaining_args(), vec!["--name", "b"]);
    }

    #[test]
    fn custom_and_disabled_terminator() {
        let mut p = Parser::builder().terminator("::").env_vars(Vec::new()).build();
        p.add(Rule::argument("file")).unwrap();
        p.parse(&["a", "::", "b"]).unwrap();
        assert_eq!(p.remaining_args(), vec!["b"]);

        let mut p = Parser::builder().no_terminator().env_vars(Vec::new()).build();
        p.add(Rule::argument("files").greedy()).unwrap();
        let opts = p.parse(&["a", "--", "b"]).unwrap();
        assert_eq!(opts.string_slice("files"), vec!["a", "--", "b"]);
    }

    #[test]
    fn lenient_collects_ignored() {
        let mut p = parser();
        p.parse(&["stray"]).unwrap();
        assert_eq!(p.ignored_args(), vec!["stray"]);
    }

    #[test]
    fn strict_rejects_unknown() {
        let mut p = Parser::builder().strict(true).env_vars(Vec::new()).build();
        let err = p.parse(&["stray"]).unwrap_err();
        assert!(matches!(err, ArgfigError::UnknownArgument(_)));
    }

    #[test]
    fn missing_value_names_flag() {
        let mut p = parser();
        power(&mut p);
        let err = p.parse(&["--power-level"]).unwrap_err();
        assert!(err.to_string().contains("--power-level"));
    }

    #[test]
    fn sub_parser_copies_settings_and_rules() {
        let mut p = Parser::builder()
            .name("app")
            .env_prefix("APP_")
            .word_wrap(60)
            .strict(true)
            .env_vars([("APP_POWER_LEVEL".to_string(), "4".to_string())])
            .build();
        power(&mut p);
        p.add(Rule::command("deploy", |_, _| Ok(0))).unwrap();

        let mut sub = p.sub_parser();
        assert_eq!(sub.name(), "app");
        assert_eq!(sub.rules().len(), 1);
        assert_eq!(sub.parse(&[] as &[&str]).unwrap().int("power-level"), 4);
        assert!(matches!(
            sub.parse(&["stray"]),
            Err(ArgfigError::UnknownArgument(_))
        ));
    }

    #[test]
    fn run_command_passes_remaining() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let mut p = parser();
        p.add(Rule::option("--verbose").alias("-v").count()).unwrap();
        p.add(Rule::command("deploy", move |sub, args| {
            sub.add(Rule::option("--to"))?;
            let opts = sub.parse(args)?;
            sink.lock().unwrap().push(opts.string("to"));
            Ok(7)
        }))
        .unwrap();

        p.parse(&["-v", "deploy", "--to", "prod"]).unwrap();
        assert_eq!(p.matched_command().as_deref(), Some("deploy"));
        assert_eq!(p.run_command().unwrap(), 7);
        assert_eq!(*seen.lock().unwrap(), vec!["prod"]);
    }

    #[test]
    fn run_command_without_match() {
        let mut p = parser();
        p.parse(&[] as &[&str]).unwrap();
        assert!(matches!(p.run_command(), Err(ArgfigError::NoCommand)));
    }

    #[test]
    fn snapshots_are_stable_for_readers() {
        let mut p = parser();
        p.add(Rule::config("port").is_int()).unwrap();
        let old = p.apply(Some(&Options::from_pairs([("port", "1")]))).unwrap();
        p.apply(Some(&Options::from_pairs([("port", "2")]))).unwrap();
        assert_eq!(old.int("port"), 1);
        assert_eq!(p.get_opts().int("port"), 2);
    }

    #[test]
    fn set_opts_replaces_snapshot() {
        let p = parser();
        p.set_opts(Arc::new(Options::from_pairs([("x", "1")])));
        assert_eq!(p.get_opts().int("x"), 1);
    }
}
