// Mastodon API client: entity types, REST calls, hashtag streaming.
//
// MastodonClient is the production implementation of the pipeline's
// Upstream trait. Each submodule handles one part of the API surface.

pub mod client;
pub mod models;
pub mod rate_limiter;
pub mod streaming;
