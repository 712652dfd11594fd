//! Public name derivation and parsing.
//!
//! Tools and prompts get `upstream + separator + original` under the
//! qualifying strategies, or the bare original under `none`. Resources
//! always use the URI form `upstream_id://original_uri` regardless of
//! strategy. Parsing gives the slash form precedence over the separator
//! form.

use hatago_common::config::{NamingConfig, NamingStrategy};

/// A parsed public name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParsedName<'a> {
    /// The upstream id, when the name was qualified
    pub upstream_id: Option<&'a str>,
    /// The upstream-local name
    pub name: &'a str,
}

/// Derives and parses public names under one naming configuration.
#[derive(Debug, Clone)]
pub struct NameRouter {
    config: NamingConfig,
}

impl NameRouter {
    /// Create a router for the given configuration.
    pub fn new(config: NamingConfig) -> Self {
        Self { config }
    }

    /// The active strategy.
    pub fn strategy(&self) -> NamingStrategy {
        self.config.strategy
    }

    /// Build the public name for a tool or prompt.
    pub fn public_name(&self, upstream_id: &str, original: &str) -> String {
        if self.config.strategy.qualifies() {
            format!("{}{}{}", upstream_id, self.config.separator, original)
        } else {
            original.to_string()
        }
    }

    /// Build the public URI for a resource. Always qualified.
    pub fn public_uri(&self, upstream_id: &str, original_uri: &str) -> String {
        format!("{upstream_id}://{original_uri}")
    }

    /// Parse an inbound public name.
    ///
    /// Slash form first, then the configured separator, else the bare
    /// name with no upstream.
    pub fn parse<'a>(&self, public: &'a str) -> ParsedName<'a> {
        if let Some((upstream_id, name)) = public.split_once('/') {
            return ParsedName {
                upstream_id: Some(upstream_id),
                name,
            };
        }
        if let Some((upstream_id, name)) = public.split_once(&self.config.separator) {
            return ParsedName {
                upstream_id: Some(upstream_id),
                name,
            };
        }
        ParsedName {
            upstream_id: None,
            name: public,
        }
    }

    /// Parse a public resource URI back into `(upstream_id, original)`.
    pub fn parse_uri<'a>(&self, public: &'a str) -> ParsedName<'a> {
        match public.split_once("://") {
            Some((upstream_id, original)) => ParsedName {
                upstream_id: Some(upstream_id),
                name: original,
            },
            None => ParsedName {
                upstream_id: None,
                name: public,
            },
        }
    }
}
