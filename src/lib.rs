// tagrelay: hashtag stream relay bot for Mastodon
//
// This is the library root. Each module corresponds to one stage or
// collaborator of the relay pipeline.

pub mod config;
pub mod mastodon;
pub mod output;
pub mod pipeline;
