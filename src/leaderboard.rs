use std::cmp::Ordering;
use std::collections::HashSet;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::payload::{pick, pick_f64, pick_str, pick_u64, unwrap_data};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum LeaderboardKind {
    #[default]
    Overall,
    Weekly,
    Monthly,
}

impl LeaderboardKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Overall => "overall",
            Self::Weekly => "weekly",
            Self::Monthly => "monthly",
        }
    }

    pub fn next(self) -> Self {
        match self {
            Self::Overall => Self::Weekly,
            Self::Weekly => Self::Monthly,
            Self::Monthly => Self::Overall,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Institution {
    pub name: String,
    pub short_name: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EntryStats {
    pub challenge_points: f64,
    pub battle_points: f64,
    pub challenges_solved: u64,
    pub battles_won: u64,
    pub avg_rating: f64,
    pub current_streak: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeaderboardEntry {
    pub id: String,
    pub server_rank: Option<u64>,
    pub username: String,
    pub full_name: Option<String>,
    pub institution: Option<Institution>,
    /// Adjusted total. Not required to equal the breakdown in `stats`.
    pub total_points: f64,
    pub raw_points: Option<f64>,
    pub stats: EntryStats,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RankedEntry {
    pub display_rank: usize,
    pub entry: LeaderboardEntry,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortKey {
    #[default]
    Points,
    ChallengesSolved,
    BattlesWon,
    AvgRating,
}

impl SortKey {
    pub fn label(self) -> &'static str {
        match self {
            Self::Points => "Points",
            Self::ChallengesSolved => "Solved",
            Self::BattlesWon => "Battles won",
            Self::AvgRating => "Avg rating",
        }
    }

    pub fn next(self) -> Self {
        match self {
            Self::Points => Self::ChallengesSolved,
            Self::ChallengesSolved => Self::BattlesWon,
            Self::BattlesWon => Self::AvgRating,
            Self::AvgRating => Self::Points,
        }
    }

    fn value(self, entry: &LeaderboardEntry) -> f64 {
        match self {
            Self::Points => entry.total_points,
            Self::ChallengesSolved => entry.stats.challenges_solved as f64,
            Self::BattlesWon => entry.stats.battles_won as f64,
            Self::AvgRating => entry.stats.avg_rating,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortDirection {
    Ascending,
    #[default]
    Descending,
}

impl SortDirection {
    pub fn flip(self) -> Self {
        match self {
            Self::Ascending => Self::Descending,
            Self::Descending => Self::Ascending,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum InstitutionFilter {
    #[default]
    All,
    /// Case-insensitive equality on the institution short name.
    ShortName(String),
    /// Case-insensitive substring of the institution name.
    NameContains(String),
    /// Entries with no institution.
    Unaffiliated,
}

impl InstitutionFilter {
    pub fn from_key(key: &str) -> Self {
        let key = key.trim();
        if key.is_empty() || key.eq_ignore_ascii_case("all") {
            return Self::All;
        }
        if key.eq_ignore_ascii_case("none") {
            return Self::Unaffiliated;
        }
        if let Some(rest) = key.strip_prefix("name:") {
            return Self::NameContains(rest.trim().to_string());
        }
        Self::ShortName(key.to_string())
    }

    pub fn label(&self) -> String {
        match self {
            Self::All => "All".to_string(),
            Self::ShortName(s) => s.to_uppercase(),
            Self::NameContains(s) => format!("*{s}*"),
            Self::Unaffiliated => "No institution".to_string(),
        }
    }

    fn matches(&self, entry: &LeaderboardEntry) -> bool {
        let inst = entry
            .institution
            .as_ref()
            .filter(|i| !i.name.trim().is_empty() || i.short_name.is_some());
        match self {
            Self::All => true,
            Self::ShortName(key) => inst
                .and_then(|i| i.short_name.as_deref())
                .is_some_and(|s| s.trim().eq_ignore_ascii_case(key)),
            Self::NameContains(needle) => inst.is_some_and(|i| contains_ci(&i.name, needle)),
            Self::Unaffiliated => inst.is_none(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeaderboardQuery {
    pub search: String,
    pub institution: InstitutionFilter,
    pub sort_key: SortKey,
    pub direction: SortDirection,
    pub page_size: Option<usize>,
}

impl Default for LeaderboardQuery {
    fn default() -> Self {
        Self {
            search: String::new(),
            institution: InstitutionFilter::All,
            sort_key: SortKey::Points,
            direction: SortDirection::Descending,
            page_size: Some(50),
        }
    }
}

/// Filter, stable-sort, re-rank and truncate a leaderboard snapshot.
/// Ties keep their input order.
pub fn aggregate(entries: &[LeaderboardEntry], query: &LeaderboardQuery) -> Vec<RankedEntry> {
    let search = query.search.trim();
    let mut rows: Vec<&LeaderboardEntry> = entries
        .iter()
        .filter(|e| search.is_empty() || matches_search(e, search))
        .filter(|e| query.institution.matches(e))
        .collect();

    let key = query.sort_key;
    rows.sort_by(|a, b| {
        let ord = key
            .value(a)
            .partial_cmp(&key.value(b))
            .unwrap_or(Ordering::Equal);
        match query.direction {
            SortDirection::Ascending => ord,
            SortDirection::Descending => ord.reverse(),
        }
    });

    let limit = query.page_size.unwrap_or(usize::MAX);
    rows.into_iter()
        .take(limit)
        .enumerate()
        .map(|(idx, entry)| RankedEntry {
            display_rank: idx + 1,
            entry: entry.clone(),
        })
        .collect()
}

fn matches_search(entry: &LeaderboardEntry, needle: &str) -> bool {
    contains_ci(&entry.username, needle)
        || entry
            .full_name
            .as_deref()
            .is_some_and(|n| contains_ci(n, needle))
        || entry
            .institution
            .as_ref()
            .is_some_and(|i| contains_ci(&i.name, needle))
}

fn contains_ci(haystack: &str, needle: &str) -> bool {
    if needle.is_empty() {
        return true;
    }
    haystack.to_lowercase().contains(&needle.to_lowercase())
}

pub fn resolve_total_points(adjusted: Option<f64>, raw: Option<f64>) -> f64 {
    adjusted.or(raw).unwrap_or(0.0).max(0.0)
}

pub fn parse_leaderboard_json(raw: &str) -> Result<Vec<LeaderboardEntry>> {
    let trimmed = raw.trim();
    if trimmed.is_empty() || trimmed == "null" {
        return Ok(Vec::new());
    }
    let root: Value = serde_json::from_str(trimmed).context("invalid leaderboard json")?;
    parse_leaderboard_value(unwrap_data(&root))
}

/// Accepts an array, or an object holding `leaderboard`/`entries`/`users`.
/// Rows without a username are skipped; repeated ids keep the first row.
pub fn parse_leaderboard_value(data: &Value) -> Result<Vec<LeaderboardEntry>> {
    let items = match data {
        Value::Array(items) => items,
        Value::Object(_) => match pick(data, &["leaderboard", "entries", "users", "rankings"]) {
            Some(Value::Array(items)) => items,
            _ => return Err(anyhow!("leaderboard rows missing")),
        },
        Value::Null => return Ok(Vec::new()),
        _ => return Err(anyhow!("unexpected leaderboard shape")),
    };

    let mut seen = HashSet::new();
    let mut out = Vec::with_capacity(items.len());
    for item in items {
        let Some(entry) = parse_entry(item) else {
            continue;
        };
        if seen.insert(entry.id.clone()) {
            out.push(entry);
        }
    }
    Ok(out)
}

fn parse_entry(v: &Value) -> Option<LeaderboardEntry> {
    let user = v.get("user").filter(|u| u.is_object()).unwrap_or(v);
    let username = pick_str(user, &["username", "handle"]).or_else(|| pick_str(v, &["username"]))?;
    let id = pick_str(v, &["id", "_id", "userId", "user_id"])
        .or_else(|| pick_str(user, &["id", "_id"]))
        .unwrap_or_else(|| username.clone());
    let full_name = pick_str(user, &["fullName", "full_name", "name"]);
    let institution = pick(user, &["institution"])
        .or_else(|| pick(v, &["institution"]))
        .and_then(parse_institution);

    let adjusted = pick_f64(v, &["totalPoints", "total_points", "adjustedPoints"]);
    let raw_points = pick_f64(v, &["rawPoints", "raw_points"]).map(|p| p.max(0.0));
    let stats_src = v.get("stats").filter(|s| s.is_object()).unwrap_or(v);
    let stats = EntryStats {
        challenge_points: pick_f64(stats_src, &["challengePoints", "challenge_points"])
            .unwrap_or(0.0)
            .max(0.0),
        battle_points: pick_f64(stats_src, &["battlePoints", "battle_points"])
            .unwrap_or(0.0)
            .max(0.0),
        challenges_solved: pick_u64(stats_src, &["challengesSolved", "challenges_solved", "solved"])
            .unwrap_or(0),
        battles_won: pick_u64(stats_src, &["battlesWon", "battles_won"]).unwrap_or(0),
        avg_rating: pick_f64(stats_src, &["avgRating", "avg_rating", "rating"])
            .unwrap_or(0.0),
        current_streak: pick_u64(stats_src, &["currentStreak", "current_streak", "streak"])
            .unwrap_or(0),
    };

    Some(LeaderboardEntry {
        id,
        server_rank: pick_u64(v, &["rank", "position"]),
        username,
        full_name,
        institution,
        total_points: resolve_total_points(adjusted, raw_points),
        raw_points,
        stats,
    })
}

fn parse_institution(v: &Value) -> Option<Institution> {
    match v {
        Value::String(name) if !name.trim().is_empty() => Some(Institution {
            name: name.trim().to_string(),
            short_name: None,
        }),
        Value::Object(_) => {
            let name = pick_str(v, &["name", "fullName"]);
            let short_name = pick_str(v, &["shortName", "short_name", "code"]);
            if name.is_none() && short_name.is_none() {
                return None;
            }
            Some(Institution {
                name: name.unwrap_or_default(),
                short_name,
            })
        }
        _ => None,
    }
}
