//! Mapping of concrete routes onto the rate-limit scopes of the remote API.
//!
//! The remote API does not limit every concrete URL separately. IDs of the
//! top-level container resources ([`MAJOR_PARAMETERS`]) partition the limits,
//! every other ID does not. A handful of routes need extra treatment, which is
//! expressed as an ordered table of rewrite rules.

use std::borrow::Cow;
use std::sync::LazyLock;

use http::Method;
use regex::{Captures, Regex};

use super::BucketKey;

/// Resource classes whose IDs genuinely partition the rate limit.
/// Their IDs are kept verbatim in a [`BucketKey`].
pub const MAJOR_PARAMETERS: &[&str] = &["channels", "guilds", "webhooks"];

/// Prefix marking the separately limited deletion of a single message.
pub const DELETE_MARKER: &str = "delete:";

const ID_PLACEHOLDER: &str = "_id";
const TOKEN_PLACEHOLDER: &str = "_token";
const EMOJI_PLACEHOLDER: &str = "_emoji";

/// A single rewrite applied to a route.
#[derive(Debug)]
struct RouteRule {
    /// Used for logging only
    name: &'static str,
    pattern: Regex,
    /// Values of the `param` capture group which leave a match untouched
    exceptions: &'static [&'static str],
    rewrite: fn(&Captures<'_>) -> String,
}

impl RouteRule {
    fn apply<'a>(&self, route: &'a str) -> Cow<'a, str> {
        self.pattern.replace_all(route, |captures: &Captures<'_>| {
            let exempt = captures
                .name("param")
                .is_some_and(|param| self.exceptions.contains(&param.as_str()));
            if exempt {
                captures[0].to_string()
            } else {
                (self.rewrite)(captures)
            }
        })
    }
}

/// Rules are evaluated in order; each one sees the output of the previous.
static ROUTE_RULES: LazyLock<Vec<RouteRule>> = LazyLock::new(|| {
    vec![
        RouteRule {
            // `/<word>/<snowflake>`: collapse every ID which does not belong
            // to a major parameter into one bucket.
            name: "minor-ids",
            pattern: Regex::new(r"/(?P<param>[\w-]+)/[0-9]{17,19}\b").unwrap(),
            exceptions: MAJOR_PARAMETERS,
            rewrite: |captures| format!("/{}/{ID_PLACEHOLDER}", &captures["param"]),
        },
        RouteRule {
            // Webhook tokens are secret and have a very high cardinality.
            name: "webhook-token",
            pattern: Regex::new(r"/webhooks/(?P<id>[0-9]{17,19})/[^/]+/?").unwrap(),
            exceptions: &[],
            rewrite: |captures| format!("/webhooks/{}/{TOKEN_PLACEHOLDER}/", &captures["id"]),
        },
        RouteRule {
            // All reactions on a message share a bucket regardless of the emoji.
            name: "reaction-emoji",
            pattern: Regex::new(r"/reactions/[^/]+(?:/(?P<suffix>@me|_id|[0-9]{17,19}))?/?$")
                .unwrap(),
            exceptions: &[],
            rewrite: |captures| match captures.name("suffix").map(|s| s.as_str()) {
                None => format!("/reactions/{EMOJI_PLACEHOLDER}"),
                Some("@me") => format!("/reactions/{EMOJI_PLACEHOLDER}/@me"),
                Some(_) => format!("/reactions/{EMOJI_PLACEHOLDER}/{ID_PLACEHOLDER}"),
            },
        },
    ]
});

/// Map a route and its method onto the [`BucketKey`] that governs it.
///
/// The result only depends on the inputs, and a route that is already
/// normalized maps onto itself.
///
/// # Examples
///
/// ```
/// use http::Method;
/// use sluice_lib::ratelimit::normalize;
///
/// let key = normalize("/webhooks/111111111111111111/abcSecretToken", &Method::GET);
/// assert_eq!(key.as_str(), "/webhooks/111111111111111111/_token/");
/// ```
#[must_use]
pub fn normalize(route: &str, method: &Method) -> BucketKey {
    let mut normalized = if route.starts_with('/') || route.starts_with(DELETE_MARKER) {
        route.to_string()
    } else {
        format!("/{route}")
    };

    for rule in ROUTE_RULES.iter() {
        if let Cow::Owned(rewritten) = rule.apply(&normalized) {
            log::trace!("Route rule `{}` rewrote {normalized} to {rewritten}", rule.name);
            normalized = rewritten;
        }
    }

    BucketKey::from(mark_message_deletion(normalized, method))
}

/// Deleting a message is limited separately from every other operation on
/// the same message route.
fn mark_message_deletion(route: String, method: &Method) -> String {
    let message_route = format!("/messages/{ID_PLACEHOLDER}");
    if *method == Method::DELETE
        && route.ends_with(&message_route)
        && !route.starts_with(DELETE_MARKER)
    {
        format!("{DELETE_MARKER}{route}")
    } else {
        route
    }
}
