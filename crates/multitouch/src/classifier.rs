//! Channel classification from UTM parameters and referrers.
//!
//! Classification is a pure function of its inputs. It runs once when a
//! touchpoint is recorded and the result is stored, never recomputed.

use crate::types::{Channel, PageVisit, Touchpoint, UtmParams};
use chrono::{DateTime, Utc};
use url::Url;
use uuid::Uuid;

/// Search engines. A bare name matches the site under any suffix
/// (`google.de`, `google.co.uk`); a dotted name matches that domain only.
const SEARCH_ENGINES: &[&str] = &[
    "google",
    "bing",
    "yahoo",
    "duckduckgo",
    "baidu",
    "yandex",
    "ecosia",
    "ask.com",
    "aol.com",
];

/// Social platforms, matched like [`SEARCH_ENGINES`].
const SOCIAL_PLATFORMS: &[&str] = &[
    "facebook",
    "instagram",
    "twitter",
    "linkedin",
    "tiktok",
    "reddit",
    "pinterest",
    "youtube",
    "threads.net",
    "snapchat",
];

/// Hosts whose domain doesn't name the platform, or that must not be
/// read as their parent site.
const HOST_ALIASES: &[(&str, Channel, &str)] = &[
    ("search.brave.com", Channel::OrganicSearch, "brave"),
    ("t.co", Channel::OrganicSocial, "twitter"),
    ("x.com", Channel::OrganicSocial, "twitter"),
    ("lnkd.in", Channel::OrganicSocial, "linkedin"),
    ("youtu.be", Channel::OrganicSocial, "youtube"),
    ("fb.com", Channel::OrganicSocial, "facebook"),
    ("fb.me", Channel::OrganicSocial, "facebook"),
    ("l.facebook.com", Channel::OrganicSocial, "facebook"),
    ("lm.facebook.com", Channel::OrganicSocial, "facebook"),
    ("mail.google.com", Channel::Email, "gmail"),
    ("outlook.live.com", Channel::Email, "outlook"),
    ("outlook.office.com", Channel::Email, "outlook"),
    ("outlook.office365.com", Channel::Email, "outlook"),
];

/// Second-level labels under a country code, as in `google.co.uk`.
const COUNTRY_SECOND_LEVEL: &[&str] = &["co", "com", "net", "org", "ac", "gov", "edu", "ne", "or"];

/// Leading labels of webmail hosts.
const WEBMAIL_LABELS: &[&str] = &["mail", "webmail"];

/// Classify a visit into a channel and a traffic source.
///
/// The first matching rule wins:
/// 1. a `utm_medium` decides the channel, `utm_source` names the source;
/// 2. an empty or same-origin referrer is `direct`;
/// 3. a webmail referrer is `email`;
/// 4. a search engine referrer is `organic-search`;
/// 5. a social platform referrer is `organic-social`;
/// 6. anything else is a `referral` from the referrer's host.
///
/// An unparseable referrer yields `other` with the referrer as given.
pub fn classify(url: &str, referrer: &str, utm: Option<&UtmParams>) -> (Channel, String) {
    if let Some(medium) = utm.and_then(|u| u.medium.as_deref()) {
        let source = utm.and_then(|u| u.source.as_deref());
        return classify_medium(medium, source);
    }

    let referrer = referrer.trim();
    if referrer.is_empty() {
        return (Channel::Direct, "direct".into());
    }

    let referrer_host = match Url::parse(referrer)
        .ok()
        .and_then(|u| u.host_str().map(normalize_host))
    {
        Some(host) => host,
        None => return (Channel::Other, referrer.to_string()),
    };

    let page_host = Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(normalize_host));
    if page_host.as_deref() == Some(referrer_host.as_str()) {
        return (Channel::Direct, "direct".into());
    }

    if let Some((_, channel, name)) = HOST_ALIASES
        .iter()
        .find(|(alias, _, _)| *alias == referrer_host)
    {
        return (*channel, (*name).to_string());
    }

    let Some(domain) = registrable_domain(&referrer_host) else {
        return (Channel::Referral, referrer_host);
    };
    let site = site_name(&domain);

    if referrer_host != domain
        && referrer_host
            .split('.')
            .next()
            .is_some_and(|label| WEBMAIL_LABELS.contains(&label))
    {
        return (Channel::Email, site.to_string());
    }

    if let Some(engine) = match_site(&domain, SEARCH_ENGINES) {
        return (Channel::OrganicSearch, engine.to_string());
    }

    if let Some(platform) = match_site(&domain, SOCIAL_PLATFORMS) {
        return (Channel::OrganicSocial, platform.to_string());
    }

    (Channel::Referral, referrer_host)
}

fn classify_medium(medium: &str, source: Option<&str>) -> (Channel, String) {
    let medium_lower = medium.trim().to_ascii_lowercase();
    let source_is_social = source
        .map(|s| is_social_source(&s.to_ascii_lowercase()))
        .unwrap_or(false);

    let channel = match medium_lower.as_str() {
        "cpc" | "ppc" | "paid-search" | "paidsearch" | "paid_search" | "sem" => {
            if source_is_social {
                Channel::PaidSocial
            } else {
                Channel::PaidSearch
            }
        }
        "paid-social" | "paid_social" | "paidsocial" | "social-paid" | "social_paid" => {
            Channel::PaidSocial
        }
        "social" | "social-media" | "social_media" | "organic-social" => Channel::OrganicSocial,
        "email" | "e-mail" | "newsletter" => Channel::Email,
        "display" | "banner" | "cpm" => Channel::Display,
        "affiliate" | "partner" => Channel::Affiliate,
        "referral" => Channel::Referral,
        "organic" => Channel::OrganicSearch,
        _ => Channel::Other,
    };

    let source = match source.map(str::trim).filter(|s| !s.is_empty()) {
        Some(s) => s.to_string(),
        None => medium_lower,
    };

    (channel, source)
}

fn is_social_source(source: &str) -> bool {
    SOCIAL_PLATFORMS.iter().any(|p| site_name(p) == source)
        || matches!(source, "fb" | "ig" | "x" | "meta")
        || HOST_ALIASES
            .iter()
            .any(|(_, channel, name)| *channel == Channel::OrganicSocial && *name == source)
}

fn normalize_host(host: &str) -> String {
    let host = host.to_ascii_lowercase();
    match host.strip_prefix("www.") {
        Some(rest) => rest.to_string(),
        None => host,
    }
}

/// The domain a host was registered under: `google.co.uk` for
/// `news.google.co.uk`. `None` for single-label hosts.
fn registrable_domain(host: &str) -> Option<String> {
    let labels: Vec<&str> = host.split('.').filter(|l| !l.is_empty()).collect();
    if labels.len() < 2 {
        return None;
    }

    let last = labels.len() - 1;
    let mut start = last - 1;
    if start > 0 && labels[last].len() == 2 && COUNTRY_SECOND_LEVEL.contains(&labels[start]) {
        start -= 1;
    }
    Some(labels[start..].join("."))
}

/// First label of a registrable domain.
fn site_name(domain: &str) -> &str {
    domain.split('.').next().unwrap_or(domain)
}

fn match_site<'a>(domain: &str, names: &[&'a str]) -> Option<&'a str> {
    let site = site_name(domain);
    names
        .iter()
        .copied()
        .find(|name| {
            if name.contains('.') {
                *name == domain
            } else {
                *name == site
            }
        })
        .map(site_name)
}

/// Extract `utm_*` parameters from a URL's query string.
///
/// Returns `None` when the URL can't be parsed or carries no UTM parameters.
pub fn parse_utm_params(url: &str) -> Option<UtmParams> {
    let parsed = Url::parse(url).ok()?;
    let mut utm = UtmParams::default();

    for (key, value) in parsed.query_pairs() {
        if value.is_empty() {
            continue;
        }
        let slot = match key.as_ref() {
            "utm_source" => &mut utm.source,
            "utm_medium" => &mut utm.medium,
            "utm_campaign" => &mut utm.campaign,
            "utm_term" => &mut utm.term,
            "utm_content" => &mut utm.content,
            _ => continue,
        };
        if slot.is_none() {
            *slot = Some(value.into_owned());
        }
    }

    if utm.is_empty() {
        None
    } else {
        Some(utm)
    }
}

/// Build a classified touchpoint from a raw page visit.
///
/// The visit's own timestamp is used when present, `now` otherwise.
pub fn touchpoint_from_visit(visit: &PageVisit, now: DateTime<Utc>) -> Touchpoint {
    let utm_params = parse_utm_params(&visit.url);
    let (channel, source) = classify(&visit.url, &visit.referrer, utm_params.as_ref());

    Touchpoint {
        id: Uuid::new_v4(),
        timestamp: visit.timestamp.unwrap_or(now),
        url: visit.url.clone(),
        path: path_of(&visit.url),
        title: visit.title.clone(),
        referrer: visit.referrer.trim().to_string(),
        channel,
        source,
        utm_params,
        time_on_page: None,
        scroll_depth: None,
        engaged: None,
    }
}

/// Touchpoint standing in for a conversion with no recorded visits.
pub(crate) fn direct_touchpoint(at: DateTime<Utc>) -> Touchpoint {
    Touchpoint {
        id: Uuid::new_v4(),
        timestamp: at,
        url: String::new(),
        path: "/".into(),
        title: String::new(),
        referrer: String::new(),
        channel: Channel::Direct,
        source: "direct".into(),
        utm_params: None,
        time_on_page: None,
        scroll_depth: None,
        engaged: None,
    }
}

/// Path component of a URL, `/` when it can't be parsed.
pub fn path_of(url: &str) -> String {
    match Url::parse(url) {
        Ok(parsed) => parsed.path().to_string(),
        Err(_) => {
            if url.starts_with('/') {
                url.split(['?', '#']).next().unwrap_or("/").to_string()
            } else {
                "/".into()
            }
        }
    }
}
