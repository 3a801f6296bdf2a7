//! Upstream payloads to persistence rows
//!
//! Activity is bucketed per UTC calendar day: a push adds its commit count, an
//! opened pull request or issue adds one. Per-collection commit counts come
//! from the same pushes, so they only cover the recent event window.

use std::collections::{BTreeMap, HashMap};

use super::github::{GithubEvent, RawHarvest};
use super::HarvestError;
use crate::models::{ActivityDay, CollectionData, SubjectData};
use devrank_common::SubjectKey;

#[derive(Debug, Clone)]
pub struct NormalizedHarvest {
    pub key: SubjectKey,
    pub subject: SubjectData,
    pub collections: Vec<CollectionData>,
    pub activity: Vec<ActivityDay>,
}

fn push_commits(event: &GithubEvent) -> i64 {
    let payload = &event.payload;
    payload
        .get("size")
        .and_then(|v| v.as_i64())
        .or_else(|| payload.get("commits").and_then(|c| c.as_array()).map(|c| c.len() as i64))
        .unwrap_or(0)
        .max(0)
}

fn is_opened(event: &GithubEvent) -> bool {
    event.payload.get("action").and_then(|a| a.as_str()) == Some("opened")
}

/// Daily activity plus commits per repository (keyed by lower-cased full name)
pub fn aggregate_activity(events: &[GithubEvent]) -> (Vec<ActivityDay>, HashMap<String, i64>) {
    let mut days: BTreeMap<chrono::NaiveDate, ActivityDay> = BTreeMap::new();
    let mut repo_commits: HashMap<String, i64> = HashMap::new();

    for event in events {
        let day = event.created_at.date_naive();
        let (commits, pull_requests, issues) = match event.kind.as_str() {
            "PushEvent" => {
                let commits = push_commits(event);
                *repo_commits.entry(event.repo.name.to_ascii_lowercase()).or_default() += commits;
                (commits, 0, 0)
            }
            "PullRequestEvent" if is_opened(event) => (0, 1, 0),
            "IssuesEvent" if is_opened(event) => (0, 0, 1),
            _ => continue,
        };

        let entry = days.entry(day).or_insert(ActivityDay {
            day,
            commits: 0,
            pull_requests: 0,
            issues: 0,
        });
        entry.commits = entry.commits.saturating_add(commits.min(i32::MAX as i64) as i32);
        entry.pull_requests += pull_requests;
        entry.issues += issues;
    }

    (days.into_values().collect(), repo_commits)
}

pub fn normalize(raw: RawHarvest) -> Result<NormalizedHarvest, HarvestError> {
    let key = SubjectKey::parse(&raw.user.login)
        .map_err(|e| HarvestError::InvalidPayload(e.to_string()))?;

    let (activity, repo_commits) = aggregate_activity(&raw.events);

    let mut social_links = BTreeMap::new();
    for account in &raw.social_accounts {
        social_links
            .entry(account.provider.to_ascii_lowercase())
            .or_insert_with(|| account.url.clone());
    }

    let collections: Vec<CollectionData> = raw
        .repos
        .into_iter()
        .map(|repo| CollectionData {
            commit_count: repo_commits
                .get(&repo.full_name.to_ascii_lowercase())
                .copied()
                .unwrap_or(0),
            name: repo.name,
            full_name: repo.full_name,
            description: repo.description,
            language: repo.language,
            homepage: repo.homepage.filter(|h| !h.is_empty()),
            topics: repo.topics,
            is_fork: repo.fork,
            stars: repo.stargazers_count,
            forks: repo.forks_count,
            watchers: repo.watchers_count,
            open_issues: repo.open_issues_count,
            pushed_at: repo.pushed_at,
        })
        .collect();

    let user = raw.user;
    let subject = SubjectData {
        login: user.login,
        upstream_id: Some(user.id),
        name: user.name,
        avatar_url: user.avatar_url,
        bio: user.bio,
        company: user.company,
        blog: user.blog.filter(|b| !b.is_empty()),
        location: user.location,
        email: user.email,
        twitter_username: user.twitter_username,
        followers: user.followers,
        following: user.following,
        public_repos: user.public_repos.max(collections.len() as i64),
        public_gists: user.public_gists.max(raw.gists.len() as i64),
        organizations: raw.orgs.into_iter().map(|o| o.login).collect(),
        social_links,
        upstream_created_at: user.created_at,
    };

    Ok(NormalizedHarvest {
        key,
        subject,
        collections,
        activity,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::harvest::github::{GithubEventRepo, GithubRepo, GithubSocialAccount, GithubUser};
    use chrono::{TimeZone, Utc};
    use serde_json::json;

    fn event(kind: &str, repo: &str, day: u32, payload: serde_json::Value) -> GithubEvent {
        GithubEvent {
            kind: kind.to_string(),
            repo: GithubEventRepo { name: repo.to_string() },
            payload,
            created_at: Utc.with_ymd_and_hms(2026, 3, day, 12, 0, 0).unwrap(),
        }
    }

    fn user(login: &str) -> GithubUser {
        serde_json::from_value(json!({ "login": login, "id": 1, "followers": 40, "public_repos": 1 }))
            .unwrap()
    }

    #[test]
    fn test_activity_buckets_by_day() {
        let events = vec![
            event("PushEvent", "octo/app", 1, json!({ "size": 3 })),
            event("PushEvent", "Octo/App", 1, json!({ "commits": [{}, {}] })),
            event("PullRequestEvent", "octo/app", 1, json!({ "action": "opened" })),
            event("PullRequestEvent", "octo/app", 2, json!({ "action": "closed" })),
            event("IssuesEvent", "octo/lib", 2, json!({ "action": "opened" })),
            event("WatchEvent", "octo/lib", 3, json!({})),
        ];

        let (days, per_repo) = aggregate_activity(&events);

        assert_eq!(days.len(), 2);
        assert_eq!((days[0].commits, days[0].pull_requests, days[0].issues), (5, 1, 0));
        assert_eq!((days[1].commits, days[1].pull_requests, days[1].issues), (0, 0, 1));
        assert_eq!(per_repo.get("octo/app"), Some(&5));
    }

    #[test]
    fn test_normalize_maps_profile_and_collections() {
        let repo: GithubRepo = serde_json::from_value(json!({
            "name": "app",
            "full_name": "Octo/app",
            "stargazers_count": 10,
            "forks_count": 2,
            "homepage": ""
        }))
        .unwrap();

        let raw = RawHarvest {
            user: user("Octo"),
            orgs: vec![],
            gists: vec![],
            social_accounts: vec![GithubSocialAccount {
                provider: "Mastodon".into(),
                url: "https://hachyderm.io/@octo".into(),
            }],
            repos: vec![repo],
            events: vec![event("PushEvent", "octo/app", 4, json!({ "size": 2 }))],
        };

        let normalized = normalize(raw).unwrap();
        assert_eq!(normalized.key.as_str(), "octo");
        assert_eq!(normalized.subject.login, "Octo");
        assert_eq!(normalized.collections[0].commit_count, 2);
        assert_eq!(normalized.collections[0].homepage, None);
        assert_eq!(
            normalized.subject.social_links.get("mastodon").map(String::as_str),
            Some("https://hachyderm.io/@octo")
        );
    }

    #[test]
    fn test_invalid_login_is_rejected() {
        let raw = RawHarvest {
            user: user("-bad-"),
            orgs: vec![],
            gists: vec![],
            social_accounts: vec![],
            repos: vec![],
            events: vec![],
        };
        let err = normalize(raw).unwrap_err();
        assert!(!err.is_retryable());
    }
}
