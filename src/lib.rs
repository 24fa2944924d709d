//! Rule-driven command-line arguments, environment variables and live
//! configuration for Rust services. Declare each setting once, then read it
//! from wherever the user chose to put it.
//!
//! ```ignore
//! let mut parser = Parser::builder().name("myapp").env_prefix("MYAPP_").build();
//! parser.add(Rule::option("--power-level").alias("-p").is_int().env("POWER").default("10000"))?;
//! let opts = parser.parse_args()?;
//! let level = opts.int("power-level");
//! ```
//!
//! That call matches the process arguments, reads `MYAPP_POWER`, falls back
//! to the declared default, and publishes an immutable [`Options`] snapshot.
//!
//! # Rules
//!
//! A [`Rule`] names one setting and says where it may come from:
//!
//! - **[`Rule::option`]** is matched by alias tokens (`--power-level`, `-p`).
//!   By default it consumes the next token as its value; [`count`](RuleBuilder::count)
//!   and [`is_true`](RuleBuilder::is_true) turn it into a flag.
//! - **[`Rule::argument`]** is matched by position, in declaration order. The
//!   last positional may be [`greedy`](RuleBuilder::greedy).
//! - **[`Rule::config`]** never appears on the command line. It is read from
//!   the environment, an external source or its default.
//! - **[`Rule::config_group`]** takes every key of an external group.
//! - **[`Rule::command`]** is a sub-command with its own handler. See
//!   [`Parser::run_command`].
//!
//! Every rule carries a [`Cast`] that turns raw text into a typed [`Value`],
//! and any number of caller-owned destinations (`store_int`, `store_string_slice`, ...)
//! that are refreshed on every apply.
//!
//! # Precedence
//!
//! ```text
//! Zero value            the cast's empty value, source Unset
//!        ↑ overridden by
//! Default               .default(...)
//!        ↑ overridden by
//! External              INI text, a Backend, or Parser::apply(Some(..))
//!        ↑ overridden by
//! Environment           .env("VAR"), with the parser's prefix
//!        ↑ overridden by
//! Command line          the last Parser::parse
//! ```
//!
//! Each rule resolves independently from its highest layer that has a value.
//! The parser keeps the last argv match and the last external layer, so a
//! backend change re-applied later never beats a value given on the command
//! line. [`Options::source`] tells which layer won.
//!
//! # External sources
//!
//! - [`Parser::from_ini`] parses INI text. Sections become groups.
//! - [`Parser::from_backend`] fetches every rule's key from a [`Backend`].
//!   [`MemoryBackend`] is an in-process store; [`FileBackend`] reads and
//!   writes a TOML file, preserving its formatting on `set`.
//!
//! # Watching
//!
//! [`Parser::watch`] follows a backend in a background task and hands every
//! [`ChangeEvent`] to a callback, usually one that calls
//! [`Parser::apply_change`] on a shared parser. Lost watches are retried with
//! capped exponential backoff (see [`WatchSettings`]); the returned
//! [`WatchHandle`] stops the task.
//!
//! Readers call [`Parser::get_opts`] and keep the `Arc<Options>` they got;
//! a new apply publishes a new snapshot and never mutates an old one.
//!
//! # Errors
//!
//! Every fallible operation returns [`ArgfigError`]. Rule conflicts
//! (duplicate names or aliases, ambiguous positionals, bad defaults) are
//! found before any argument is matched. A required rule with no value, or a
//! value that fails its cast, does not stop the other rules: the best-effort
//! snapshot is published anyway and returned inside
//! [`ArgfigError::Unresolved`]. A malformed environment variable is a hard
//! error and publishes nothing.

pub mod backend;
pub mod error;
pub mod types;

mod env;
mod help;
mod ini;
mod matcher;
mod options;
mod parser;
mod resolve;
mod rule;
mod validate;
mod value;
mod watch;

#[cfg(test)]
mod fixtures;

pub use backend::{Backend, EventStream, FileBackend, MemoryBackend};
pub use env::EnvSource;
pub use error::ArgfigError;
pub use matcher::Matches;
pub use options::{Options, Source};
pub use parser::{Parser, ParserBuilder};
pub use rule::{Action, Rule, RuleBuilder, RuleKind};
pub use types::{ChangeEvent, Key, Pair};
pub use value::{Cast, Value, ValueKind};
pub use watch::{WatchHandle, WatchSettings};
