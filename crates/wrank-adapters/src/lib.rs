//! External roster source: extraction rules over a page-node abstraction plus
//! the live WrestleStat adapter.

use std::collections::HashSet;
use std::sync::OnceLock;

use async_trait::async_trait;
use regex::Regex;
use scraper::{ElementRef, Html};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, info_span, Instrument};
use wrank_core::RosterEntry;
use wrank_storage::{FetchError, HttpFetcher};

pub const CRATE_NAME: &str = "wrank-adapters";

const SIBLING_SCAN_LIMIT: usize = 8;

/// Class-year tokens in match priority order.
const CLASS_YEAR_TOKENS: [&str; 8] = ["RSSR", "RSJR", "RSO", "RSFR", "SR", "JR", "SO", "FR"];

static WRESTLER_ID_RE: OnceLock<Regex> = OnceLock::new();
static LEADING_RANK_RE: OnceLock<Regex> = OnceLock::new();
static RECORD_RE: OnceLock<Regex> = OnceLock::new();

fn wrestler_id_regex() -> &'static Regex {
    WRESTLER_ID_RE.get_or_init(|| Regex::new(r"/wrestler/(\d+)/").expect("valid regex"))
}

fn leading_rank_regex() -> &'static Regex {
    LEADING_RANK_RE.get_or_init(|| Regex::new(r"^#\d+\s+").expect("valid regex"))
}

fn record_regex() -> &'static Regex {
    RECORD_RE.get_or_init(|| Regex::new(r"(\d+)\s*-\s*(\d+)").expect("valid regex"))
}

/// Read-only view of an element in a fetched document. Only elements are
/// nodes; text is reached through `text_fragments`.
pub trait PageNode: Clone {
    fn tag(&self) -> &str;
    fn attribute(&self, name: &str) -> Option<&str>;
    /// Descendant text nodes in document order.
    fn text_fragments(&self) -> Vec<String>;
    fn parent_node(&self) -> Option<Self>;
    fn child_nodes(&self) -> Vec<Self>;
    /// Element siblings after this node, nearest first.
    fn following_siblings(&self) -> Vec<Self>;

    fn inner_text(&self) -> String {
        self.text_fragments().concat()
    }

    /// Pre-order, starting with `self`.
    fn descendant_nodes(&self) -> Vec<Self> {
        let mut out = Vec::new();
        let mut stack = vec![self.clone()];
        while let Some(node) = stack.pop() {
            stack.extend(node.child_nodes().into_iter().rev());
            out.push(node);
        }
        out
    }
}

impl<'a> PageNode for ElementRef<'a> {
    fn tag(&self) -> &str {
        self.value().name()
    }

    fn attribute(&self, name: &str) -> Option<&str> {
        self.value().attr(name)
    }

    fn text_fragments(&self) -> Vec<String> {
        self.text().map(str::to_string).collect()
    }

    fn parent_node(&self) -> Option<Self> {
        self.parent().and_then(ElementRef::wrap)
    }

    fn child_nodes(&self) -> Vec<Self> {
        self.children().filter_map(ElementRef::wrap).collect()
    }

    fn following_siblings(&self) -> Vec<Self> {
        self.next_siblings().filter_map(ElementRef::wrap).collect()
    }

    fn descendant_nodes(&self) -> Vec<Self> {
        self.descendants().filter_map(ElementRef::wrap).collect()
    }
}

fn text_or_none(value: &str) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// `"#7 NC State"` -> `"NC State"`.
pub fn strip_rank_marker(value: &str) -> String {
    leading_rank_regex()
        .replace(value.trim(), "")
        .trim()
        .to_string()
}

/// Collapses whitespace runs to single spaces and trims.
pub fn clean_spaces(value: &str) -> String {
    value.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// `"Robinson, Vincent"` -> `"Vincent Robinson"`. Anything that is not exactly
/// two non-empty comma-separated parts is returned trimmed but otherwise unchanged.
pub fn display_name_to_first_last(value: &str) -> String {
    let value = value.trim();
    let parts = value.split(',').collect::<Vec<_>>();
    if let [last, first] = parts.as_slice() {
        let (last, first) = (last.trim(), first.trim());
        if !last.is_empty() && !first.is_empty() {
            return format!("{first} {last}");
        }
    }
    value.to_string()
}

/// `"Vincent O'Robinson Jr."` -> `"jr-vincent-orobinson"`: lower-cased, punctuation
/// dropped, last token first.
pub fn slugify_last_first(full_name: &str) -> String {
    let cleaned = full_name
        .chars()
        .filter(|c| c.is_alphanumeric() || *c == ' ' || *c == '-')
        .flat_map(char::to_lowercase)
        .collect::<String>();
    let parts = cleaned.split_whitespace().collect::<Vec<_>>();
    match parts.as_slice() {
        [] => "unknown".to_string(),
        [only] => (*only).to_string(),
        [first @ .., last] => format!("{last}-{}", first.join("-")),
    }
}

fn wrestler_id(href: &str) -> Option<i64> {
    wrestler_id_regex()
        .captures(href)?
        .get(1)?
        .as_str()
        .parse::<i64>()
        .ok()
        .filter(|id| *id > 0)
}

fn is_link<N: PageNode>(node: &N) -> bool {
    node.tag().eq_ignore_ascii_case("a")
}

fn is_team_link<N: PageNode>(node: &N) -> bool {
    is_link(node) && node.attribute("href").is_some_and(|href| href.contains("/team/"))
}

/// Text of the first team link at or under `scope`, rank marker stripped.
fn team_link_text<N: PageNode>(scope: &N) -> Option<String> {
    let link = scope.descendant_nodes().into_iter().find(is_team_link)?;
    text_or_none(&strip_rank_marker(&link.inner_text()))
}

fn school_near_link<N: PageNode>(link: &N) -> String {
    let parent = link.parent_node();
    if let Some(school) = parent.as_ref().and_then(team_link_text) {
        return school;
    }

    for sibling in link.following_siblings().into_iter().take(SIBLING_SCAN_LIMIT) {
        if let Some(school) = team_link_text(&sibling) {
            return school;
        }
    }

    parent
        .and_then(|p| p.parent_node())
        .and_then(|grandparent| team_link_text(&grandparent))
        .unwrap_or_default()
}

/// Every wrestler link under `root` becomes one entry, first occurrence per id
/// wins. Links with no visible name are skipped without claiming the id.
pub fn extract_roster_entries<N: PageNode>(root: &N) -> Vec<RosterEntry> {
    let mut seen = HashSet::new();
    let mut out = Vec::new();

    for node in root.descendant_nodes() {
        if !is_link(&node) {
            continue;
        }
        let Some(external_id) = node.attribute("href").and_then(wrestler_id) else {
            continue;
        };
        if seen.contains(&external_id) {
            continue;
        }
        let name = display_name_to_first_last(&node.inner_text());
        if name.is_empty() {
            continue;
        }

        seen.insert(external_id);
        out.push(RosterEntry {
            external_id,
            name,
            school: school_near_link(&node),
        });
    }

    out
}

/// Fields read off the top of a profile page. Missing pieces stay empty.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProfileSummary {
    pub name: Option<String>,
    pub team: Option<String>,
    pub class_year: Option<String>,
    pub wins: i32,
    pub losses: i32,
}

impl ProfileSummary {
    /// A page with neither a rank-marked heading nor a team link is not a profile.
    pub fn is_recognizable(&self) -> bool {
        self.name.is_some() || self.team.is_some()
    }
}

fn rank_marked_heading<N: PageNode>(nodes: &[N]) -> Option<String> {
    ["h3", "h2"].iter().find_map(|level| {
        nodes
            .iter()
            .filter(|n| n.tag().eq_ignore_ascii_case(level))
            .map(|n| n.inner_text().trim().to_string())
            .find(|text| text.starts_with('#') && text.len() > 2)
    })
}

pub fn parse_profile_summary<N: PageNode>(root: &N) -> ProfileSummary {
    let nodes = root.descendant_nodes();

    let name = rank_marked_heading(&nodes).and_then(|heading| text_or_none(&strip_rank_marker(&heading)));
    let team = nodes
        .iter()
        .find(|n| is_team_link(*n))
        .and_then(|link| text_or_none(&strip_rank_marker(&link.inner_text())));

    let body = nodes
        .iter()
        .find(|n| n.tag().eq_ignore_ascii_case("body"))
        .unwrap_or(root);
    let page_text = clean_spaces(&body.text_fragments().join(" "));
    let padded = format!(" {page_text} ");

    let class_year = CLASS_YEAR_TOKENS
        .iter()
        .find(|token| padded.contains(&format!(" {token} ")))
        .map(|token| token.to_string());

    let (wins, losses) = record_regex()
        .captures(&page_text)
        .map(|caps| {
            let count = |i: usize| {
                caps.get(i)
                    .and_then(|m| m.as_str().parse::<i32>().ok())
                    .unwrap_or(0)
            };
            (count(1), count(2))
        })
        .unwrap_or((0, 0));

    ProfileSummary {
        name,
        team,
        class_year,
        wins,
        losses,
    }
}

/// Parses a roster page body. Zero entries means the page was not understood.
pub fn parse_roster_document(body: &str, url: &str) -> Result<Vec<RosterEntry>, FetchError> {
    let document = Html::parse_document(body);
    let entries = extract_roster_entries(&document.root_element());
    if entries.is_empty() {
        return Err(FetchError::Parse {
            url: url.to_string(),
            reason: "no wrestlers parsed from roster page".to_string(),
        });
    }
    Ok(entries)
}

pub fn parse_profile_document(body: &str) -> ProfileSummary {
    let document = Html::parse_document(body);
    parse_profile_summary(&document.root_element())
}

/// A wrestler's profile as fetched, after hint fallbacks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FetchedProfile {
    pub external_id: i64,
    pub name: String,
    pub team: String,
    pub class_year: String,
    pub wins: i32,
    pub losses: i32,
    pub profile_url: String,
}

/// Applies the name/school hints to a parsed summary. An empty name after
/// fallback is a failed fetch.
pub fn resolve_profile(
    external_id: i64,
    summary: ProfileSummary,
    profile_url: &str,
    name_hint: &str,
    school_hint: &str,
) -> Result<FetchedProfile, FetchError> {
    let name = summary
        .name
        .or_else(|| text_or_none(name_hint))
        .ok_or_else(|| FetchError::Parse {
            url: profile_url.to_string(),
            reason: format!("could not parse name for external id {external_id}"),
        })?;
    let team = summary
        .team
        .or_else(|| text_or_none(school_hint))
        .unwrap_or_default();

    Ok(FetchedProfile {
        external_id,
        name,
        team,
        class_year: summary.class_year.unwrap_or_default(),
        wins: summary.wins,
        losses: summary.losses,
        profile_url: profile_url.to_string(),
    })
}

/// Where the roster source lives. Path templates use `{weight_class}`,
/// `{external_id}` and `{slug}` placeholders.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RosterSourceConfig {
    pub base_url: String,
    pub roster_path: String,
    pub profile_path: String,
    pub profile_slug_path: String,
}

impl Default for RosterSourceConfig {
    fn default() -> Self {
        Self {
            base_url: "https://www.wrestlestat.com".to_string(),
            roster_path: "/d1/rankings/starters/weight/{weight_class}".to_string(),
            profile_path: "/wrestler/{external_id}/profile".to_string(),
            profile_slug_path: "/wrestler/{external_id}/{slug}/profile".to_string(),
        }
    }
}

impl RosterSourceConfig {
    fn join(&self, path: &str) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), path)
    }

    pub fn roster_url(&self, weight_class: i32) -> String {
        self.join(
            &self
                .roster_path
                .replace("{weight_class}", &weight_class.to_string()),
        )
    }

    pub fn profile_url(&self, external_id: i64) -> String {
        self.join(
            &self
                .profile_path
                .replace("{external_id}", &external_id.to_string()),
        )
    }

    pub fn profile_slug_url(&self, external_id: i64, slug: &str) -> String {
        self.join(
            &self
                .profile_slug_path
                .replace("{external_id}", &external_id.to_string())
                .replace("{slug}", slug),
        )
    }
}

#[async_trait]
pub trait RosterSource: Send + Sync {
    fn source_id(&self) -> &'static str;

    /// One weight class's roster. Unreachable, non-2xx or entry-less pages fail.
    async fn fetch_roster(&self, weight_class: i32) -> Result<Vec<RosterEntry>, FetchError>;

    async fn fetch_profile(
        &self,
        external_id: i64,
        name_hint: &str,
        school_hint: &str,
    ) -> Result<FetchedProfile, FetchError>;
}

#[derive(Debug)]
pub struct WrestleStatSource {
    http: HttpFetcher,
    config: RosterSourceConfig,
}

impl WrestleStatSource {
    pub fn new(http: HttpFetcher, config: RosterSourceConfig) -> Self {
        Self { http, config }
    }

    async fn fetch_summary(&self, url: &str) -> Result<(ProfileSummary, String), FetchError> {
        let response = self.http.fetch_text(url).await?;
        let summary = parse_profile_document(&response.body);
        if !summary.is_recognizable() {
            return Err(FetchError::Parse {
                url: response.final_url,
                reason: "no profile summary on page".to_string(),
            });
        }
        Ok((summary, response.final_url))
    }
}

#[async_trait]
impl RosterSource for WrestleStatSource {
    fn source_id(&self) -> &'static str {
        "wrestlestat"
    }

    async fn fetch_roster(&self, weight_class: i32) -> Result<Vec<RosterEntry>, FetchError> {
        let url = self.config.roster_url(weight_class);
        let span = info_span!("roster_fetch", source = self.source_id(), weight_class);
        async {
            let response = self.http.fetch_text(&url).await?;
            let entries = parse_roster_document(&response.body, &response.final_url)?;
            info!(entries = entries.len(), "roster parsed");
            Ok(entries)
        }
        .instrument(span)
        .await
    }

    async fn fetch_profile(
        &self,
        external_id: i64,
        name_hint: &str,
        school_hint: &str,
    ) -> Result<FetchedProfile, FetchError> {
        let span = info_span!("profile_fetch", source = self.source_id(), external_id);
        async {
            let canonical = self.config.profile_url(external_id);
            let (summary, url) = match self.fetch_summary(&canonical).await {
                Ok(found) => found,
                Err(err) => {
                    debug!(error = %err, "canonical profile url failed, trying slug url");
                    let slug_url = self
                        .config
                        .profile_slug_url(external_id, &slugify_last_first(name_hint));
                    self.fetch_summary(&slug_url).await?
                }
            };
            resolve_profile(external_id, summary, &url, name_hint, school_hint)
        }
        .instrument(span)
        .await
    }
}
