use std::collections::HashSet;
use std::env;

use anyhow::{Context, Result};

use crate::mastodon::models::Visibility;
use crate::pipeline::filter::FilterConfig;
use crate::pipeline::multiplex::DEFAULT_BUFFER;

/// Central configuration loaded from environment variables.
///
/// Secrets come from env vars (never hardcoded). The .env file is loaded
/// automatically at startup via dotenvy.
pub struct Config {
    /// Instance base URL, e.g. https://mastodon.social
    pub instance_url: String,
    /// User access token for the relay account
    pub access_token: String,
    /// Hashtags to stream, in subscription order
    pub tags: Vec<String>,
    pub filter: FilterConfig,
    /// Capacity of every bounded pipeline channel
    pub channel_capacity: usize,
    /// REST request pacing (Mastodon allows 300 per 5 minutes)
    pub api_requests_per_second: f64,
    required_tags_explicit: bool,
}

impl Config {
    /// Load configuration from the process environment.
    pub fn load() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Parse configuration from any key lookup.
    ///
    /// Nothing is required at this point; call `require_credentials` before
    /// talking to the instance. An empty tag list is accepted here and
    /// rejected when the multiplexer starts.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let tags = parse_tags(lookup("TAGRELAY_TAGS").as_deref().unwrap_or(""));

        let required = lookup("TAGRELAY_REQUIRED_TAGS");
        let required_tags_explicit = required.is_some();
        let required_tags: HashSet<String> = match required {
            Some(list) => parse_tags(&list).into_iter().collect(),
            None => tags.iter().cloned().collect(),
        };

        let visibility = split_list(lookup("TAGRELAY_VISIBILITY").as_deref().unwrap_or("public"))
            .map(str::parse::<Visibility>)
            .collect::<Result<HashSet<_>>>()
            .context("Invalid TAGRELAY_VISIBILITY")?;

        let filter = FilterConfig {
            visibility,
            required_tags,
            require_unmuted: parse_bool(&lookup, "TAGRELAY_REQUIRE_UNMUTED", true)?,
            require_original: parse_bool(&lookup, "TAGRELAY_REQUIRE_ORIGINAL", true)?,
            require_followed_by_us: parse_bool(&lookup, "TAGRELAY_REQUIRE_FOLLOWED", false)?,
            forbid_sensitive: parse_bool(&lookup, "TAGRELAY_FORBID_SENSITIVE", false)?,
        };

        let channel_capacity = match lookup("TAGRELAY_CHANNEL_CAPACITY") {
            Some(v) => {
                let capacity = v
                    .trim()
                    .parse::<usize>()
                    .with_context(|| format!("TAGRELAY_CHANNEL_CAPACITY is not a number: {v}"))?;
                if capacity == 0 {
                    anyhow::bail!("TAGRELAY_CHANNEL_CAPACITY must be at least 1");
                }
                capacity
            }
            None => DEFAULT_BUFFER,
        };

        let api_requests_per_second = match lookup("TAGRELAY_API_RPS") {
            Some(v) => {
                let rate = v
                    .trim()
                    .parse::<f64>()
                    .with_context(|| format!("TAGRELAY_API_RPS is not a number: {v}"))?;
                if !rate.is_finite() || rate < 0.0 {
                    anyhow::bail!("TAGRELAY_API_RPS must be a finite rate of 0 or more, got {v}");
                }
                rate
            }
            None => 1.0,
        };

        Ok(Self {
            instance_url: lookup("MASTODON_INSTANCE").unwrap_or_default(),
            access_token: lookup("MASTODON_ACCESS_TOKEN").unwrap_or_default(),
            tags,
            filter,
            channel_capacity,
            api_requests_per_second,
            required_tags_explicit,
        })
    }

    /// Replace the streamed tags (from `--tag` flags).
    ///
    /// Unless TAGRELAY_REQUIRED_TAGS was set, the required tags follow.
    pub fn override_tags(&mut self, tags: &[String]) {
        self.tags = tags.iter().flat_map(|t| parse_tags(t)).collect();
        if !self.required_tags_explicit {
            self.filter.required_tags = self.tags.iter().cloned().collect();
        }
    }

    /// Check that the instance and token are configured.
    pub fn require_credentials(&self) -> Result<()> {
        if self.instance_url.is_empty() {
            anyhow::bail!(
                "MASTODON_INSTANCE not set. Add it to your .env file.\n\
                 See .env.example for the required variables."
            );
        }
        if self.access_token.is_empty() {
            anyhow::bail!(
                "MASTODON_ACCESS_TOKEN not set. Add it to your .env file.\n\
                 See .env.example for the required variables."
            );
        }
        Ok(())
    }
}

fn split_list(raw: &str) -> impl Iterator<Item = &str> {
    raw.split(',').map(str::trim).filter(|s| !s.is_empty())
}

/// Comma separated hashtags; a leading `#` is dropped, case is kept.
fn parse_tags(raw: &str) -> Vec<String> {
    split_list(raw)
        .map(|t| t.trim_start_matches('#').to_string())
        .filter(|t| !t.is_empty())
        .collect()
}

fn parse_bool<F>(lookup: &F, key: &str, default: bool) -> Result<bool>
where
    F: Fn(&str) -> Option<String>,
{
    let Some(raw) = lookup(key) else {
        return Ok(default);
    };
    match raw.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        "" => Ok(default),
        other => anyhow::bail!("{key} must be true or false, got {other:?}"),
    }
}
