use criterion::{Criterion, criterion_group, criterion_main};
use std::hint::black_box;

use arena_client::battle::parse_battle_list_json;
use arena_client::leaderboard::{
    EntryStats, Institution, InstitutionFilter, LeaderboardEntry, LeaderboardQuery, SortKey,
    aggregate, parse_leaderboard_json,
};
use arena_client::snapshot::SnapshotHash;

fn sample_entries(n: usize) -> Vec<LeaderboardEntry> {
    (0..n)
        .map(|i| LeaderboardEntry {
            id: format!("u{i}"),
            server_rank: Some(i as u64 + 1),
            username: format!("user{i}"),
            full_name: Some(format!("Player Number {i}")),
            institution: if i % 3 == 0 {
                None
            } else {
                Some(Institution {
                    name: format!("University {}", i % 7),
                    short_name: Some(if i % 2 == 0 { "DBUU" } else { "MIT" }.to_string()),
                })
            },
            total_points: ((i * 37) % 1000) as f64,
            raw_points: None,
            stats: EntryStats {
                challenge_points: (i % 400) as f64,
                battle_points: (i % 90) as f64,
                challenges_solved: (i % 55) as u64,
                battles_won: (i % 13) as u64,
                avg_rating: (i % 50) as f64 / 10.0,
                current_streak: (i % 5) as u64,
            },
        })
        .collect()
}

fn bench_aggregate(c: &mut Criterion) {
    let entries = sample_entries(2_000);
    let default_query = LeaderboardQuery::default();
    let filtered = LeaderboardQuery {
        search: "univ".to_string(),
        institution: InstitutionFilter::from_key("dbuu"),
        sort_key: SortKey::AvgRating,
        page_size: None,
        ..LeaderboardQuery::default()
    };

    c.bench_function("aggregate_default", |b| {
        b.iter(|| aggregate(black_box(&entries), black_box(&default_query)))
    });
    c.bench_function("aggregate_filtered", |b| {
        b.iter(|| aggregate(black_box(&entries), black_box(&filtered)))
    });
}

fn bench_snapshot(c: &mut Criterion) {
    let entries = sample_entries(500);
    c.bench_function("snapshot_hash_leaderboard", |b| {
        b.iter(|| SnapshotHash::of(black_box(&entries)))
    });
}

fn bench_parsing(c: &mut Criterion) {
    let leaderboard = serde_json::json!({
        "success": true,
        "data": { "leaderboard": sample_entries(500).iter().map(|e| serde_json::json!({
            "user": { "_id": e.id, "username": e.username, "fullName": e.full_name },
            "totalPoints": e.total_points,
            "stats": { "challengesSolved": e.stats.challenges_solved, "battlesWon": e.stats.battles_won }
        })).collect::<Vec<_>>() }
    })
    .to_string();
    let battles = serde_json::json!({
        "success": true,
        "data": (0..200).map(|i| serde_json::json!({
            "_id": format!("b{i}"),
            "title": format!("Battle {i}"),
            "challenge": { "_id": "c1", "title": "Two Sum" },
            "creator": { "username": "ada" },
            "opponent": { "username": "grace" },
            "status": if i % 2 == 0 { "in_progress" } else { "waiting" },
            "duration": 30,
            "startedAt": "2024-05-01T10:00:00Z"
        })).collect::<Vec<_>>()
    })
    .to_string();

    c.bench_function("parse_leaderboard", |b| {
        b.iter(|| parse_leaderboard_json(black_box(&leaderboard)))
    });
    c.bench_function("parse_battle_list", |b| {
        b.iter(|| parse_battle_list_json(black_box(&battles)))
    });
}

criterion_group!(benches, bench_aggregate, bench_snapshot, bench_parsing);
criterion_main!(benches);
