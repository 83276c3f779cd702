// Terminal sink: print each relayed status.
//
// Used by `tagrelay print` to see what the filter would boost without
// touching the account.

use colored::Colorize;
use tokio::sync::mpsc;

use crate::mastodon::models::{Status, Visibility};

/// Longer statuses are cut when printed. The boost sink never sees this.
const MAX_CONTENT_CHARS: usize = 500;

/// Print statuses until the channel closes. Returns how many were printed.
pub async fn run(mut statuses: mpsc::Receiver<Status>) -> u64 {
    let mut printed = 0;
    while let Some(status) = statuses.recv().await {
        println!("{}", format_status(&status));
        printed += 1;
    }
    printed
}

/// Render one status as a multi-line block.
pub fn format_status(status: &Status) -> String {
    let mut out = String::new();

    let author = if status.account.display_name.is_empty() {
        format!("@{}", status.account.acct)
    } else {
        format!("{} (@{})", status.account.display_name, status.account.acct)
    };
    out.push_str(&format!(
        "{} {} {}\n",
        author.bold(),
        status.created_at.format("%Y-%m-%d %H:%M:%S UTC").to_string().dimmed(),
        colorize_visibility(&status.visibility),
    ));

    if !status.spoiler_text.is_empty() {
        out.push_str(&format!("  {} {}\n", "CW:".yellow(), status.spoiler_text));
    }

    let text = super::truncate_chars(&super::html_to_text(&status.content), MAX_CONTENT_CHARS);
    for line in text.lines() {
        out.push_str(&format!("  {line}\n"));
    }

    let tags: Vec<String> = status.tag_names().map(|t| format!("#{t}")).collect();
    if !tags.is_empty() {
        out.push_str(&format!("  {}\n", tags.join(" ").cyan()));
    }

    if !status.media_attachments.is_empty() {
        out.push_str(&format!(
            "  {}\n",
            format!("[{} attachment(s)]", status.media_attachments.len()).dimmed()
        ));
    }

    if let Some(url) = &status.url {
        out.push_str(&format!("  {}\n", url.dimmed()));
    }

    out
}

fn colorize_visibility(visibility: &Visibility) -> colored::ColoredString {
    match visibility {
        Visibility::Public => "public".green(),
        Visibility::Unlisted => "unlisted".normal(),
        Visibility::Private => "private".yellow(),
        Visibility::Direct => "direct".red(),
        Visibility::Other(s) => s.as_str().dimmed(),
    }
}
