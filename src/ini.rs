//! INI text as an external layer.
//!
//! Parsing is delegated to the `config` crate. Each section becomes a group;
//! keys outside any section, and keys in a section named `default` (any
//! case), land in the top-level group. The `config` crate lowercases keys.

use config::{Config, File, FileFormat, Source, ValueKind};
use tracing::warn;

use crate::error::ArgfigError;
use crate::options::Options;

const DEFAULT_SECTION: &str = "default";

/// Parse INI text into an [`Options`] tree of raw string values.
pub fn parse(text: &str) -> Result<Options, ArgfigError> {
    let table = Config::builder()
        .add_source(File::from_str(text, FileFormat::Ini))
        .build()
        .and_then(|cfg| cfg.collect())
        .map_err(|e| ArgfigError::Ini(e.to_string()))?;

    let mut opts = Options::new();
    for (name, value) in table {
        match value.kind {
            ValueKind::Table(section) => {
                let target = if name.eq_ignore_ascii_case(DEFAULT_SECTION) {
                    &mut opts
                } else {
                    opts.group_mut(&name)
                };
                for (key, value) in section {
                    match value.into_string() {
                        Ok(s) => {
                            target.set(key, s);
                        }
                        Err(e) => warn!(section = %name, key = %key, error = %e, "skipping INI value"),
                    }
                }
            }
            _ => match value.into_string() {
                Ok(s) => {
                    opts.set(name, s);
                }
                Err(e) => warn!(key = %name, error = %e, "skipping INI value"),
            },
        }
    }
    Ok(opts)
}
