use std::collections::{HashMap, VecDeque};
use std::env;

use chrono::{DateTime, Utc};

use crate::api::{ApiError, BattleList, CreateBattle, RunOutput, SubmitOutcome};
use crate::battle::{Battle, BattleAction, BattleStatus, legal_actions};
use crate::leaderboard::{
    InstitutionFilter, LeaderboardEntry, LeaderboardKind, LeaderboardQuery, RankedEntry,
};
use crate::match_clock::MatchTiming;

const MAX_LOGS: usize = 200;
const DEFAULT_INSTITUTION_KEYS: &[&str] = &["all", "dbuu", "name:University", "none"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Screen {
    Leaderboard,
    Battles,
    Battle,
}

#[derive(Debug, Clone)]
pub struct ArenaState {
    pub screen: Screen,
    pub viewer: Option<String>,
    pub battles: HashMap<BattleList, Vec<Battle>>,
    pub battle_list: BattleList,
    pub battles_selected: usize,
    pub open_battle_id: Option<String>,
    pub open_battle: Option<Battle>,
    pub leaderboard_kind: LeaderboardKind,
    pub leaderboard: Vec<LeaderboardEntry>,
    pub leaderboard_loading: bool,
    pub leaderboard_query: LeaderboardQuery,
    pub leaderboard_selected: usize,
    pub institution_presets: Vec<InstitutionFilter>,
    pub pending_action: Option<BattleAction>,
    pub last_error: Option<String>,
    pub last_run: Option<RunOutput>,
    pub last_submit: Option<String>,
    pub logs: VecDeque<String>,
    pub help_overlay: bool,
}

impl Default for ArenaState {
    fn default() -> Self {
        Self::new()
    }
}

impl ArenaState {
    pub fn new() -> Self {
        Self {
            screen: Screen::Leaderboard,
            viewer: None,
            battles: HashMap::new(),
            battle_list: BattleList::Waiting,
            battles_selected: 0,
            open_battle_id: None,
            open_battle: None,
            leaderboard_kind: LeaderboardKind::Overall,
            leaderboard: Vec::new(),
            leaderboard_loading: true,
            leaderboard_query: LeaderboardQuery::default(),
            leaderboard_selected: 0,
            institution_presets: institution_presets_from_env(),
            pending_action: None,
            last_error: None,
            last_run: None,
            last_submit: None,
            logs: VecDeque::new(),
            help_overlay: false,
        }
    }

    pub fn push_log(&mut self, msg: impl Into<String>) {
        self.logs.push_back(msg.into());
        while self.logs.len() > MAX_LOGS {
            self.logs.pop_front();
        }
    }

    pub fn leaderboard_view(&self) -> Vec<RankedEntry> {
        crate::leaderboard::aggregate(&self.leaderboard, &self.leaderboard_query)
    }

    pub fn current_battles(&self) -> &[Battle] {
        self.battles
            .get(&self.battle_list)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn selected_battle(&self) -> Option<&Battle> {
        self.current_battles().get(self.battles_selected)
    }

    pub fn open_battle_timing(&self, now: DateTime<Utc>) -> Option<MatchTiming> {
        self.open_battle.as_ref().and_then(|b| b.timing(now))
    }

    pub fn open_battle_actions(&self) -> Vec<BattleAction> {
        self.open_battle
            .as_ref()
            .map(|b| legal_actions(b, self.viewer.as_deref()))
            .unwrap_or_default()
    }

    pub fn watch_battle(&mut self, id: impl Into<String>) {
        let id = id.into();
        if self.open_battle.as_ref().is_some_and(|b| b.id != id) {
            self.open_battle = None;
        }
        self.open_battle_id = Some(id);
        self.last_run = None;
        self.last_submit = None;
        self.screen = Screen::Battle;
    }

    pub fn close_battle(&mut self) {
        self.open_battle_id = None;
        self.open_battle = None;
        self.screen = Screen::Battles;
    }

    pub fn select_next(&mut self) {
        match self.screen {
            Screen::Leaderboard => {
                let len = self.leaderboard_view().len();
                if len > 0 {
                    self.leaderboard_selected = (self.leaderboard_selected + 1).min(len - 1);
                }
            }
            Screen::Battles => {
                let len = self.current_battles().len();
                if len > 0 {
                    self.battles_selected = (self.battles_selected + 1).min(len - 1);
                }
            }
            Screen::Battle => {}
        }
    }

    pub fn select_prev(&mut self) {
        match self.screen {
            Screen::Leaderboard => {
                self.leaderboard_selected = self.leaderboard_selected.saturating_sub(1)
            }
            Screen::Battles => self.battles_selected = self.battles_selected.saturating_sub(1),
            Screen::Battle => {}
        }
    }

    pub fn cycle_sort_key(&mut self) {
        self.leaderboard_query.sort_key = self.leaderboard_query.sort_key.next();
        self.leaderboard_selected = 0;
    }

    pub fn flip_sort_direction(&mut self) {
        self.leaderboard_query.direction = self.leaderboard_query.direction.flip();
        self.leaderboard_selected = 0;
    }

    pub fn cycle_institution(&mut self) {
        if self.institution_presets.is_empty() {
            return;
        }
        let idx = self
            .institution_presets
            .iter()
            .position(|f| *f == self.leaderboard_query.institution)
            .map(|i| (i + 1) % self.institution_presets.len())
            .unwrap_or(0);
        self.leaderboard_query.institution = self.institution_presets[idx].clone();
        self.leaderboard_selected = 0;
    }

    pub fn set_search(&mut self, search: impl Into<String>) {
        self.leaderboard_query.search = search.into();
        self.leaderboard_selected = 0;
    }

    pub fn cycle_battle_list(&mut self) {
        self.battle_list = match self.battle_list {
            BattleList::Waiting => BattleList::Active,
            BattleList::Active => BattleList::History,
            BattleList::History => BattleList::Waiting,
        };
        self.battles_selected = 0;
    }

    fn clamp_selection(&mut self) {
        let lb_len = self.leaderboard_view().len();
        self.leaderboard_selected = self.leaderboard_selected.min(lb_len.saturating_sub(1));
        let battles_len = self.current_battles().len();
        self.battles_selected = self.battles_selected.min(battles_len.saturating_sub(1));
    }
}

#[derive(Debug, Clone)]
pub enum Delta {
    SetBattles {
        list: BattleList,
        battles: Vec<Battle>,
    },
    SetBattle(Battle),
    BattleClosed {
        id: String,
    },
    SetLeaderboard {
        kind: LeaderboardKind,
        entries: Vec<LeaderboardEntry>,
    },
    ActionFinished {
        action: BattleAction,
        battle_id: String,
        outcome: Result<(), ApiError>,
    },
    RunFinished(Result<RunOutput, ApiError>),
    SubmitFinished(Result<SubmitOutcome, ApiError>),
    Log(String),
}

#[derive(Debug, Clone)]
pub enum ProviderCommand {
    WatchLeaderboard { kind: LeaderboardKind },
    WatchBattles { list: BattleList },
    OpenBattle { id: String },
    CloseBattle,
    Act { action: BattleAction, battle_id: String },
    RunCode { language: String, code: String, input: String },
    SubmitCode { battle_id: String, language: String, code: String },
    CreateBattle(CreateBattle),
}

pub fn apply_delta(state: &mut ArenaState, delta: Delta) {
    match delta {
        Delta::SetBattles { list, battles } => {
            state.battles.insert(list, battles);
            state.clamp_selection();
        }
        Delta::SetBattle(battle) => {
            for list in state.battles.values_mut() {
                if let Some(slot) = list.iter_mut().find(|b| b.id == battle.id) {
                    *slot = battle.clone();
                }
            }
            if state.open_battle_id.as_deref() == Some(battle.id.as_str()) {
                if let Some(prev) = state.open_battle.as_ref()
                    && prev.status != battle.status
                {
                    state.push_log(format!(
                        "[INFO] Battle {} is now {}",
                        battle.title,
                        battle.status.as_str()
                    ));
                }
                state.open_battle = Some(battle);
            }
        }
        Delta::BattleClosed { id } => {
            if state.open_battle_id.as_deref() == Some(id.as_str()) {
                state.open_battle_id = None;
                state.open_battle = None;
                if state.screen == Screen::Battle {
                    state.screen = Screen::Battles;
                }
            }
        }
        Delta::SetLeaderboard { kind, entries } => {
            if kind != state.leaderboard_kind {
                return;
            }
            state.leaderboard = entries;
            state.leaderboard_loading = false;
            state.clamp_selection();
        }
        Delta::ActionFinished {
            action,
            battle_id,
            outcome,
        } => {
            if state.pending_action == Some(action) {
                state.pending_action = None;
            }
            match outcome {
                Ok(()) => {
                    state.last_error = None;
                    state.push_log(format!("[INFO] {} ok for battle {battle_id}", action.label()));
                    if action == BattleAction::Decline
                        && state
                            .open_battle
                            .as_ref()
                            .is_some_and(|b| b.status == BattleStatus::Cancelled)
                    {
                        state.screen = Screen::Battles;
                    }
                }
                Err(err) => {
                    let message = err.user_message();
                    state.push_log(format!("[WARN] {} failed: {err}", action.label()));
                    state.last_error = Some(message);
                }
            }
        }
        Delta::RunFinished(result) => {
            if state.pending_action == Some(BattleAction::Run) {
                state.pending_action = None;
            }
            match result {
                Ok(output) => {
                    state.last_error = None;
                    state.last_run = Some(output);
                }
                Err(err) => {
                    state.push_log(format!("[WARN] run failed: {err}"));
                    state.last_error = Some(err.user_message());
                }
            }
        }
        Delta::SubmitFinished(result) => {
            if state.pending_action == Some(BattleAction::Submit) {
                state.pending_action = None;
            }
            match result {
                Ok(outcome) => {
                    state.last_error = None;
                    let summary = match (outcome.passed, outcome.total) {
                        (Some(p), Some(t)) => format!("{p}/{t} tests passed"),
                        _ => outcome
                            .verdict
                            .or(outcome.message)
                            .unwrap_or_else(|| "Submitted".to_string()),
                    };
                    state.push_log(format!("[INFO] Submission: {summary}"));
                    state.last_submit = Some(summary);
                }
                Err(err) => {
                    state.push_log(format!("[WARN] submit failed: {err}"));
                    state.last_error = Some(err.user_message());
                }
            }
        }
        Delta::Log(msg) => state.push_log(msg),
    }
}

fn institution_presets_from_env() -> Vec<InstitutionFilter> {
    let keys = match env::var("LEADERBOARD_INSTITUTIONS") {
        Ok(raw) if !raw.trim().is_empty() => raw
            .split([',', ';'])
            .map(|part| part.trim().to_string())
            .filter(|part| !part.is_empty())
            .collect::<Vec<_>>(),
        _ => DEFAULT_INSTITUTION_KEYS
            .iter()
            .map(|k| k.to_string())
            .collect(),
    };
    let mut presets: Vec<InstitutionFilter> =
        keys.iter().map(|k| InstitutionFilter::from_key(k)).collect();
    if !presets.contains(&InstitutionFilter::All) {
        presets.insert(0, InstitutionFilter::All);
    }
    presets
}

pub fn status_label(status: BattleStatus) -> &'static str {
    match status {
        BattleStatus::Waiting => "Waiting",
        BattleStatus::Invited => "Invited",
        BattleStatus::InProgress => "Live",
        BattleStatus::Completed => "Done",
        BattleStatus::Cancelled => "Cancelled",
    }
}

pub fn battle_list_label(list: BattleList) -> &'static str {
    match list {
        BattleList::Waiting => "Open",
        BattleList::Active => "Active",
        BattleList::History => "History",
    }
}
