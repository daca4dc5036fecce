use std::sync::Arc;
use std::sync::mpsc::{Receiver, Sender};
use std::thread::{self, JoinHandle};

use crate::api::{ApiError, ArenaApi, BattleList};
use crate::battle::{BattleAction, BattleSession};
use crate::config::ClientConfig;
use crate::leaderboard::LeaderboardKind;
use crate::poller::{PollHandle, Polled, spawn_poller};
use crate::state::{Delta, ProviderCommand};

pub fn spawn_provider(
    api: ArenaApi,
    config: ClientConfig,
    tx: Sender<Delta>,
    cmd_rx: Receiver<ProviderCommand>,
) -> JoinHandle<()> {
    thread::spawn(move || {
        let pool = build_action_pool(config.fetch_parallelism);
        let mut leaderboard_poll: Option<PollHandle> = None;
        let mut battles_poll: Option<PollHandle> = None;
        let mut battle_poll: Option<PollHandle> = None;

        while let Ok(cmd) = cmd_rx.recv() {
            match cmd {
                ProviderCommand::WatchLeaderboard { kind } => {
                    close(&mut leaderboard_poll);
                    leaderboard_poll = Some(watch_leaderboard(&api, &config, &tx, kind));
                }
                ProviderCommand::WatchBattles { list } => {
                    close(&mut battles_poll);
                    battles_poll = Some(watch_battles(&api, &config, &tx, list));
                }
                ProviderCommand::OpenBattle { id } => {
                    close(&mut battle_poll);
                    battle_poll = Some(watch_battle(&api, &config, &tx, id));
                }
                ProviderCommand::CloseBattle => close(&mut battle_poll),
                ProviderCommand::Act { action, battle_id } => {
                    let api = api.clone();
                    let tx = tx.clone();
                    run_job(&pool, move || {
                        let outcome = perform_action(&api, &tx, action, &battle_id);
                        let _ = tx.send(Delta::ActionFinished {
                            action,
                            battle_id,
                            outcome,
                        });
                    });
                }
                ProviderCommand::RunCode {
                    language,
                    code,
                    input,
                } => {
                    let api = api.clone();
                    let tx = tx.clone();
                    run_job(&pool, move || {
                        let result = api.run_code(&language, &code, &input);
                        let _ = tx.send(Delta::RunFinished(result));
                    });
                }
                ProviderCommand::SubmitCode {
                    battle_id,
                    language,
                    code,
                } => {
                    let api = api.clone();
                    let tx = tx.clone();
                    run_job(&pool, move || {
                        let result = BattleSession::open(&api, &battle_id).and_then(|mut session| {
                            let outcome = session.submit(&api, &language, &code)?;
                            let _ = tx.send(Delta::SetBattle(session.battle().clone()));
                            Ok(outcome)
                        });
                        let _ = tx.send(Delta::SubmitFinished(result));
                    });
                }
                ProviderCommand::CreateBattle(req) => {
                    let api = api.clone();
                    let tx = tx.clone();
                    run_job(&pool, move || match api.create_battle(&req) {
                        Ok(battle) => {
                            let _ = tx.send(Delta::Log(format!(
                                "[INFO] Created battle {} ({})",
                                battle.title,
                                battle.status.as_str()
                            )));
                            let _ = tx.send(Delta::SetBattle(battle));
                        }
                        Err(err) => {
                            let _ = tx.send(Delta::Log(format!("[WARN] Create battle failed: {err}")));
                        }
                    });
                }
            }
        }
        tracing::debug!("provider command channel closed");
    })
}

fn build_action_pool(threads: usize) -> Option<Arc<rayon::ThreadPool>> {
    rayon::ThreadPoolBuilder::new()
        .num_threads(threads.max(1))
        .thread_name(|idx| format!("action-{idx}"))
        .build()
        .ok()
        .map(Arc::new)
}

fn close(handle: &mut Option<PollHandle>) {
    if let Some(mut handle) = handle.take() {
        handle.close();
    }
}

fn run_job(pool: &Option<Arc<rayon::ThreadPool>>, job: impl FnOnce() + Send + 'static) {
    if let Some(pool) = pool.as_ref() {
        pool.spawn(job);
    } else {
        thread::spawn(job);
    }
}

// The battle is re-read first and only published once the server accepted.
fn perform_action(
    api: &ArenaApi,
    tx: &Sender<Delta>,
    action: BattleAction,
    battle_id: &str,
) -> Result<(), ApiError> {
    let mut session = BattleSession::open(api, battle_id)?;
    match action {
        BattleAction::Join => session.join(api)?,
        BattleAction::Accept => session.accept(api)?,
        BattleAction::Decline => session.decline(api)?,
        BattleAction::ViewResult => {}
        BattleAction::Run | BattleAction::Submit => {
            return Err(ApiError::Rejected {
                message: format!("{} needs code; use the editor", action.label()),
            });
        }
    }
    let _ = tx.send(Delta::SetBattle(session.battle().clone()));
    Ok(())
}

fn watch_leaderboard(
    api: &ArenaApi,
    config: &ClientConfig,
    tx: &Sender<Delta>,
    kind: LeaderboardKind,
) -> PollHandle {
    let refresh_api = api.clone();
    let sink_tx = tx.clone();
    let per_page = config.leaderboard_page_size;
    spawn_poller(
        format!("leaderboard-{}", kind.as_str()),
        config.leaderboard_poll,
        move || match refresh_api.fetch_leaderboard(kind, per_page) {
            Ok(entries) => Polled::Snapshot(entries),
            Err(err) => Polled::Failed(err.to_string()),
        },
        move |polled| {
            let delta = match polled {
                Polled::Snapshot(entries) => Delta::SetLeaderboard { kind, entries },
                Polled::Failed(err) => Delta::Log(format!("[WARN] Leaderboard fetch error: {err}")),
                Polled::Gone | Polled::Nothing => return,
            };
            let _ = sink_tx.send(delta);
        },
    )
}

fn watch_battles(
    api: &ArenaApi,
    config: &ClientConfig,
    tx: &Sender<Delta>,
    list: BattleList,
) -> PollHandle {
    let refresh_api = api.clone();
    let sink_tx = tx.clone();
    spawn_poller(
        format!("battles-{}", list.as_str()),
        config.battles_list_poll,
        move || match refresh_api.list_battles(list) {
            Ok(battles) => Polled::Snapshot(battles),
            Err(err) => Polled::Failed(err.to_string()),
        },
        move |polled| {
            let delta = match polled {
                Polled::Snapshot(battles) => Delta::SetBattles { list, battles },
                Polled::Failed(err) => Delta::Log(format!("[WARN] Battles fetch error: {err}")),
                Polled::Gone | Polled::Nothing => return,
            };
            let _ = sink_tx.send(delta);
        },
    )
}

fn watch_battle(
    api: &ArenaApi,
    config: &ClientConfig,
    tx: &Sender<Delta>,
    id: String,
) -> PollHandle {
    let refresh_api = api.clone();
    let sink_tx = tx.clone();
    let battle_id = id.clone();
    spawn_poller(
        format!("battle-{id}"),
        config.battle_poll,
        move || match refresh_api.fetch_battle(&battle_id) {
            Ok(battle) => Polled::Snapshot(battle),
            Err(ApiError::Http { status: 404, .. }) => Polled::Gone,
            Err(err) => Polled::Failed(err.to_string()),
        },
        move |polled| {
            let delta = match polled {
                Polled::Snapshot(battle) => Delta::SetBattle(battle),
                Polled::Gone => Delta::BattleClosed { id: id.clone() },
                Polled::Failed(err) => Delta::Log(format!("[WARN] Battle fetch error: {err}")),
                Polled::Nothing => return,
            };
            let _ = sink_tx.send(delta);
        },
    )
}
