//! Copy-trade provenance parser
//!
//! Trading terminals stamp follower fills with a free-text order comment.
//! Copy-trade bridges write a `copy ...` marker into it; everything else is a
//! manual trade. Parsing lives here, behind a tagged variant, instead of
//! string slicing scattered through the dispatch path.

use serde::Serialize;

/// Whether a trade was placed manually or mirrored from a provider
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase", tag = "origin")]
pub enum TradeOrigin {
    Manual,
    Copy { provider: String },
}

impl TradeOrigin {
    /// Parse an order comment.
    ///
    /// Grammar (case-insensitive, input trimmed):
    /// - `copy <digits>[...]` → provider `Master #<digits>`
    /// - `copy[: ]<name>[#suffix]` → provider `<name>` (text before the first `#`)
    /// - `copy` alone → provider `Unknown Provider`
    /// - anything else → manual
    pub fn from_comment(comment: &str) -> Self {
        let trimmed = comment.trim();
        if !trimmed.to_lowercase().starts_with("copy") {
            return TradeOrigin::Manual;
        }

        // Strip the marker plus any separator (spaces, colons)
        let rest = trimmed[4..].trim_start_matches([' ', ':']).trim();
        if rest.is_empty() {
            return TradeOrigin::Copy {
                provider: "Unknown Provider".to_string(),
            };
        }

        // A leading run of digits is the master's ticket
        let digits: String = rest.chars().take_while(|c| c.is_ascii_digit()).collect();
        if !digits.is_empty() {
            return TradeOrigin::Copy {
                provider: format!("Master #{digits}"),
            };
        }

        let name = rest.split('#').next().unwrap_or("").trim();
        TradeOrigin::Copy {
            provider: if name.is_empty() {
                "Unknown Provider".to_string()
            } else {
                name.to_string()
            },
        }
    }
}
