use arena_client::leaderboard::{
    EntryStats, Institution, InstitutionFilter, LeaderboardEntry, LeaderboardQuery, SortDirection,
    SortKey, aggregate,
};

fn entry(id: &str, points: f64, institution: Option<(&str, Option<&str>)>) -> LeaderboardEntry {
    LeaderboardEntry {
        id: id.to_string(),
        server_rank: None,
        username: format!("user-{id}"),
        full_name: None,
        institution: institution.map(|(name, short)| Institution {
            name: name.to_string(),
            short_name: short.map(str::to_string),
        }),
        total_points: points,
        raw_points: None,
        stats: EntryStats::default(),
    }
}

fn ids(rows: &[arena_client::leaderboard::RankedEntry]) -> Vec<&str> {
    rows.iter().map(|r| r.entry.id.as_str()).collect()
}

fn all_rows() -> LeaderboardQuery {
    LeaderboardQuery {
        page_size: None,
        ..LeaderboardQuery::default()
    }
}

#[test]
fn ties_keep_input_order() {
    let entries = vec![entry("1", 100.0, None), entry("2", 100.0, None), entry("3", 100.0, None)];
    let rows = aggregate(&entries, &all_rows());
    assert_eq!(ids(&rows), vec!["1", "2", "3"]);
    let ranks: Vec<usize> = rows.iter().map(|r| r.display_rank).collect();
    assert_eq!(ranks, vec![1, 2, 3]);
}

#[test]
fn ascending_sort_also_keeps_ties_stable() {
    let entries = vec![
        entry("a", 5.0, None),
        entry("b", 1.0, None),
        entry("c", 5.0, None),
        entry("d", 1.0, None),
    ];
    let query = LeaderboardQuery {
        direction: SortDirection::Ascending,
        ..all_rows()
    };
    assert_eq!(ids(&aggregate(&entries, &query)), vec!["b", "d", "a", "c"]);
    assert_eq!(ids(&aggregate(&entries, &all_rows())), vec!["a", "c", "b", "d"]);
}

#[test]
fn display_rank_ignores_server_rank() {
    let mut low = entry("low", 10.0, None);
    low.server_rank = Some(1);
    let mut high = entry("high", 90.0, None);
    high.server_rank = Some(7);
    let rows = aggregate(&[low, high], &all_rows());
    assert_eq!(ids(&rows), vec!["high", "low"]);
    assert_eq!(rows[0].display_rank, 1);
    assert_eq!(rows[0].entry.server_rank, Some(7));
}

#[test]
fn institution_short_name_filter() {
    let entries = vec![
        entry("1", 10.0, Some(("Dev Bhoomi Uttarakhand University", Some("DBUU")))),
        entry("2", 20.0, Some(("Harvard University", None))),
        entry("3", 30.0, None),
        entry("4", 40.0, Some(("Dev Bhoomi Uttarakhand University", Some("dbuu ")))),
    ];
    let query = LeaderboardQuery {
        institution: InstitutionFilter::from_key("dbuu"),
        ..all_rows()
    };
    assert_eq!(ids(&aggregate(&entries, &query)), vec!["4", "1"]);

    let unaffiliated = LeaderboardQuery {
        institution: InstitutionFilter::Unaffiliated,
        ..all_rows()
    };
    assert_eq!(ids(&aggregate(&entries, &unaffiliated)), vec!["3"]);

    let by_name = LeaderboardQuery {
        institution: InstitutionFilter::from_key("name:harvard"),
        ..all_rows()
    };
    assert_eq!(ids(&aggregate(&entries, &by_name)), vec!["2"]);
}

#[test]
fn search_matches_username_full_name_and_institution() {
    let mut ada = entry("ada", 1.0, None);
    ada.full_name = Some("Ada Lovelace".to_string());
    let entries = vec![
        ada,
        entry("mit", 2.0, Some(("Massachusetts Institute", Some("MIT")))),
        entry("other", 3.0, None),
    ];
    let by_name = LeaderboardQuery {
        search: "LOVE".to_string(),
        ..all_rows()
    };
    assert_eq!(ids(&aggregate(&entries, &by_name)), vec!["ada"]);

    let by_inst = LeaderboardQuery {
        search: "massachusetts".to_string(),
        ..all_rows()
    };
    assert_eq!(ids(&aggregate(&entries, &by_inst)), vec!["mit"]);

    let by_user = LeaderboardQuery {
        search: "  user-oth ".to_string(),
        ..all_rows()
    };
    assert_eq!(ids(&aggregate(&entries, &by_user)), vec!["other"]);
}

#[test]
fn page_size_truncates_after_sorting() {
    let entries: Vec<LeaderboardEntry> = (0..10)
        .map(|i| entry(&i.to_string(), f64::from(i), None))
        .collect();
    let query = LeaderboardQuery {
        page_size: Some(3),
        ..LeaderboardQuery::default()
    };
    let rows = aggregate(&entries, &query);
    assert_eq!(ids(&rows), vec!["9", "8", "7"]);
    assert_eq!(rows[2].display_rank, 3);
}

#[test]
fn alternate_sort_keys() {
    let mut a = entry("a", 100.0, None);
    a.stats.challenges_solved = 3;
    a.stats.battles_won = 9;
    a.stats.avg_rating = 4.0;
    let mut b = entry("b", 50.0, None);
    b.stats.challenges_solved = 8;
    b.stats.battles_won = 1;
    b.stats.avg_rating = 4.5;
    let entries = vec![a, b];

    let solved = LeaderboardQuery {
        sort_key: SortKey::ChallengesSolved,
        ..all_rows()
    };
    assert_eq!(ids(&aggregate(&entries, &solved)), vec!["b", "a"]);

    let won = LeaderboardQuery {
        sort_key: SortKey::BattlesWon,
        ..all_rows()
    };
    assert_eq!(ids(&aggregate(&entries, &won)), vec!["a", "b"]);

    let rating = LeaderboardQuery {
        sort_key: SortKey::AvgRating,
        ..all_rows()
    };
    assert_eq!(ids(&aggregate(&entries, &rating)), vec!["b", "a"]);
}

#[test]
fn aggregation_leaves_input_untouched() {
    let entries = vec![entry("x", 1.0, None), entry("y", 2.0, None)];
    let before = entries.clone();
    let _ = aggregate(&entries, &all_rows());
    assert_eq!(entries, before);
}

#[test]
fn sort_key_cycle_visits_every_key() {
    let mut key = SortKey::default();
    let mut seen = vec![key];
    for _ in 0..3 {
        key = key.next();
        seen.push(key);
    }
    assert_eq!(key.next(), SortKey::Points);
    assert_eq!(seen.len(), 4);
}
