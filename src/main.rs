use std::fs;
use std::io;
use std::sync::mpsc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use chrono::Utc;
use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind};
use crossterm::execute;
use crossterm::terminal::{
    EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode,
};
use ratatui::layout::{Constraint, Direction, Layout};
use ratatui::prelude::*;
use ratatui::style::{Color, Modifier, Style};
use ratatui::widgets::{Block, Borders, Clear, Gauge, Paragraph, Row, Table, Wrap};
use tracing_subscriber::EnvFilter;

use arena_client::api::{ArenaApi, CreateBattle};
use arena_client::battle::BattleAction;
use arena_client::config::ClientConfig;
use arena_client::feed;
use arena_client::session::SessionStore;
use arena_client::state::{
    self, ArenaState, ProviderCommand, Screen, apply_delta, battle_list_label, status_label,
};

struct App {
    state: ArenaState,
    should_quit: bool,
    search_mode: bool,
    cmd_tx: mpsc::Sender<ProviderCommand>,
}

impl App {
    fn new(cmd_tx: mpsc::Sender<ProviderCommand>, viewer: Option<String>) -> Self {
        let mut state = ArenaState::new();
        state.viewer = viewer;
        Self {
            state,
            should_quit: false,
            search_mode: false,
            cmd_tx,
        }
    }

    fn send(&mut self, cmd: ProviderCommand) {
        if self.cmd_tx.send(cmd).is_err() {
            self.state.push_log("[WARN] Provider is not running");
        }
    }

    fn on_key(&mut self, key: KeyEvent) {
        if self.search_mode {
            self.on_search_key(key);
            return;
        }
        match key.code {
            KeyCode::Char('q') => self.should_quit = true,
            KeyCode::Char('?') => self.state.help_overlay = !self.state.help_overlay,
            KeyCode::Char('1') => self.state.screen = Screen::Leaderboard,
            KeyCode::Char('2') => self.state.screen = Screen::Battles,
            KeyCode::Char('j') | KeyCode::Down => self.state.select_next(),
            KeyCode::Char('k') | KeyCode::Up => self.state.select_prev(),
            _ => match self.state.screen {
                Screen::Leaderboard => self.on_leaderboard_key(key),
                Screen::Battles => self.on_battles_key(key),
                Screen::Battle => self.on_battle_key(key),
            },
        }
    }

    fn on_search_key(&mut self, key: KeyEvent) {
        let mut search = self.state.leaderboard_query.search.clone();
        match key.code {
            KeyCode::Enter => self.search_mode = false,
            KeyCode::Esc => {
                search.clear();
                self.search_mode = false;
            }
            KeyCode::Backspace => {
                search.pop();
            }
            KeyCode::Char(c) => search.push(c),
            _ => {}
        }
        self.state.set_search(search);
    }

    fn on_leaderboard_key(&mut self, key: KeyEvent) {
        match key.code {
            KeyCode::Char('s') => self.state.cycle_sort_key(),
            KeyCode::Char('r') => self.state.flip_sort_direction(),
            KeyCode::Char('f') => self.state.cycle_institution(),
            KeyCode::Char('/') => self.search_mode = true,
            KeyCode::Char('t') => {
                self.state.leaderboard_kind = self.state.leaderboard_kind.next();
                self.state.leaderboard.clear();
                self.state.leaderboard_loading = true;
                let kind = self.state.leaderboard_kind;
                self.send(ProviderCommand::WatchLeaderboard { kind });
            }
            _ => {}
        }
    }

    fn on_battles_key(&mut self, key: KeyEvent) {
        match key.code {
            KeyCode::Char('l') | KeyCode::Tab => {
                self.state.cycle_battle_list();
                let list = self.state.battle_list;
                self.send(ProviderCommand::WatchBattles { list });
            }
            KeyCode::Enter | KeyCode::Char('d') => {
                let Some(id) = self.state.selected_battle().map(|b| b.id.clone()) else {
                    self.state.push_log("[INFO] No battle selected");
                    return;
                };
                self.state.watch_battle(id.clone());
                self.send(ProviderCommand::OpenBattle { id });
            }
            KeyCode::Char('n') => self.request_create(),
            _ => {}
        }
    }

    fn request_create(&mut self) {
        let Ok(challenge_id) = std::env::var("ARENA_CHALLENGE_ID") else {
            self.state.push_log("[WARN] Set ARENA_CHALLENGE_ID to create a battle");
            return;
        };
        let duration_minutes = std::env::var("ARENA_BATTLE_DURATION")
            .ok()
            .and_then(|val| val.parse::<u32>().ok())
            .filter(|d| *d > 0)
            .unwrap_or(30);
        let non_empty = |key: &str| std::env::var(key).ok().filter(|v| !v.trim().is_empty());
        self.state
            .push_log(format!("[INFO] Creating a {duration_minutes} minute battle"));
        self.send(ProviderCommand::CreateBattle(CreateBattle {
            challenge_id,
            duration_minutes,
            title: non_empty("ARENA_BATTLE_TITLE"),
            prize_points: None,
            opponent: non_empty("ARENA_INVITE"),
        }));
    }

    fn on_battle_key(&mut self, key: KeyEvent) {
        let action = match key.code {
            KeyCode::Char('b') | KeyCode::Esc => {
                self.state.close_battle();
                self.send(ProviderCommand::CloseBattle);
                return;
            }
            KeyCode::Char('J') => BattleAction::Join,
            KeyCode::Char('a') => BattleAction::Accept,
            KeyCode::Char('x') => BattleAction::Decline,
            KeyCode::Char('R') => BattleAction::Run,
            KeyCode::Char('S') => BattleAction::Submit,
            _ => return,
        };
        self.request_action(action);
    }

    fn request_action(&mut self, action: BattleAction) {
        let Some(battle_id) = self.state.open_battle_id.clone() else {
            return;
        };
        if self.state.pending_action.is_some() {
            self.state.push_log("[INFO] Another action is still running");
            return;
        }
        if !self.state.open_battle_actions().contains(&action) {
            self.state
                .push_log(format!("[INFO] {} is not available right now", action.label()));
        }
        let cmd = match action {
            BattleAction::Run | BattleAction::Submit => {
                let Some((language, code)) = load_code(&mut self.state) else {
                    return;
                };
                if action == BattleAction::Run {
                    let input = std::env::var("ARENA_RUN_INPUT").unwrap_or_default();
                    ProviderCommand::RunCode {
                        language,
                        code,
                        input,
                    }
                } else {
                    ProviderCommand::SubmitCode {
                        battle_id,
                        language,
                        code,
                    }
                }
            }
            _ => ProviderCommand::Act { action, battle_id },
        };
        self.state.pending_action = Some(action);
        self.send(cmd);
    }
}

fn load_code(state: &mut ArenaState) -> Option<(String, String)> {
    let Ok(path) = std::env::var("ARENA_CODE_FILE") else {
        state.push_log("[WARN] Set ARENA_CODE_FILE to run or submit code");
        return None;
    };
    let language = std::env::var("ARENA_LANGUAGE").unwrap_or_else(|_| "python".to_string());
    match fs::read_to_string(&path) {
        Ok(code) => Some((language, code)),
        Err(err) => {
            state.push_log(format!("[WARN] Cannot read {path}: {err}"));
            None
        }
    }
}

fn main() -> Result<()> {
    let _ = dotenvy::from_filename(".env.local");
    let _ = dotenvy::from_filename(".env");
    init_tracing()?;

    let config = ClientConfig::from_env();
    let session_path = config.session_path();
    let session = session_path
        .as_deref()
        .map(SessionStore::load)
        .unwrap_or_default();

    let args = std::env::args().skip(1).collect::<Vec<_>>();
    match args.first().map(String::as_str) {
        Some("login") => {
            let token = args.get(1).context("usage: arena_client login <token>")?;
            let saved = session.login(token.clone());
            if let Some(path) = session_path.as_deref() {
                session.save(path)?;
            }
            println!(
                "Logged in{}",
                saved
                    .username
                    .map(|u| format!(" as {u}"))
                    .unwrap_or_default()
            );
            return Ok(());
        }
        Some("logout") => {
            session.logout();
            if let Some(path) = session_path.as_deref() {
                session.save(path)?;
            }
            println!("Logged out");
            return Ok(());
        }
        _ => {}
    }

    let api = ArenaApi::new(&config, session.clone());
    let (tx, rx) = mpsc::channel();
    let (cmd_tx, cmd_rx) = mpsc::channel();
    let provider = feed::spawn_provider(api, config.clone(), tx, cmd_rx);

    let mut app = App::new(cmd_tx, session.username());
    if session
        .current()
        .is_some_and(|saved| saved.is_expired(Utc::now().timestamp()))
    {
        app.state
            .push_log("[WARN] Saved session has expired, run `arena_client login <token>`");
    }
    app.state.leaderboard_query.page_size = Some(config.leaderboard_page_size);
    app.send(ProviderCommand::WatchLeaderboard {
        kind: app.state.leaderboard_kind,
    });
    app.send(ProviderCommand::WatchBattles {
        list: app.state.battle_list,
    });

    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = ratatui::backend::CrosstermBackend::new(stdout);
    let mut terminal = ratatui::Terminal::new(backend)?;

    let res = run_app(&mut terminal, &mut app, rx);

    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;

    drop(app);
    let _ = provider.join();

    if let Err(err) = res {
        eprintln!("error: {err}");
    }
    Ok(())
}

fn init_tracing() -> Result<()> {
    let Ok(path) = std::env::var("ARENA_TRACE") else {
        return Ok(());
    };
    let file = fs::File::create(&path).with_context(|| format!("open trace file {path}"))?;
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_ansi(false)
        .with_writer(std::sync::Mutex::new(file))
        .init();
    Ok(())
}

fn run_app<B: Backend>(
    terminal: &mut Terminal<B>,
    app: &mut App,
    rx: mpsc::Receiver<state::Delta>,
) -> io::Result<()> {
    let tick_rate = Duration::from_millis(250);
    let mut last_tick = Instant::now();

    loop {
        while let Ok(delta) = rx.try_recv() {
            apply_delta(&mut app.state, delta);
        }

        terminal.draw(|f| ui(f, app))?;

        let timeout = tick_rate
            .checked_sub(last_tick.elapsed())
            .unwrap_or(Duration::ZERO);
        if event::poll(timeout)? {
            if let Event::Key(key) = event::read()? {
                if key.kind == KeyEventKind::Press {
                    app.on_key(key);
                }
            }
        }

        if last_tick.elapsed() >= tick_rate {
            last_tick = Instant::now();
        }

        if app.should_quit {
            return Ok(());
        }
    }
}

fn ui(frame: &mut Frame, app: &App) {
    let area = frame.size();
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(2),
            Constraint::Min(1),
            Constraint::Length(4),
            Constraint::Length(1),
        ])
        .split(area);

    let header = Paragraph::new(header_text(app)).block(Block::default().borders(Borders::BOTTOM));
    frame.render_widget(header, chunks[0]);

    match app.state.screen {
        Screen::Leaderboard => render_leaderboard(frame, chunks[1], &app.state),
        Screen::Battles => render_battles(frame, chunks[1], &app.state),
        Screen::Battle => render_battle(frame, chunks[1], &app.state),
    }

    render_logs(frame, chunks[2], &app.state);

    let footer = Paragraph::new(footer_text(app)).style(Style::default().fg(Color::DarkGray));
    frame.render_widget(footer, chunks[3]);

    if app.state.help_overlay {
        render_help_overlay(frame, area);
    }
}

fn header_text(app: &App) -> String {
    let state = &app.state;
    let who = state.viewer.as_deref().unwrap_or("guest");
    match state.screen {
        Screen::Leaderboard => {
            let q = &state.leaderboard_query;
            let dir = match q.direction {
                arena_client::leaderboard::SortDirection::Ascending => "asc",
                arena_client::leaderboard::SortDirection::Descending => "desc",
            };
            let search = if app.search_mode {
                format!(" | Search: {}_", q.search)
            } else if !q.search.is_empty() {
                format!(" | Search: {}", q.search)
            } else {
                String::new()
            };
            format!(
                "ARENA LEADERBOARD | {} | Sort: {} {} | Inst: {}{} | {}",
                state.leaderboard_kind.as_str(),
                q.sort_key.label(),
                dir,
                q.institution.label(),
                search,
                who
            )
        }
        Screen::Battles => format!(
            "ARENA BATTLES | {} | {}",
            battle_list_label(state.battle_list),
            who
        ),
        Screen::Battle => format!(
            "ARENA BATTLE | {} | {}",
            state
                .open_battle
                .as_ref()
                .map(|b| b.title.as_str())
                .unwrap_or("loading..."),
            who
        ),
    }
}

fn footer_text(app: &App) -> &'static str {
    if app.search_mode {
        return "Type to search | Enter Done | Esc Clear";
    }
    match app.state.screen {
        Screen::Leaderboard => {
            "1 Board | 2 Battles | s Sort | r Reverse | f Institution | t Type | / Search | ? Help | q Quit"
        }
        Screen::Battles => "1 Board | 2 Battles | j/k Move | Enter Open | l List | n New | ? Help | q Quit",
        Screen::Battle => {
            "b Back | J Join | a Accept | x Decline | R Run | S Submit | ? Help | q Quit"
        }
    }
}

fn render_leaderboard(frame: &mut Frame, area: Rect, state: &ArenaState) {
    let rows = state.leaderboard_view();
    if rows.is_empty() {
        let msg = if state.leaderboard_loading {
            "Loading leaderboard..."
        } else {
            "No entries match"
        };
        frame.render_widget(
            Paragraph::new(msg).style(Style::default().fg(Color::DarkGray)),
            area,
        );
        return;
    }

    let visible = area.height.saturating_sub(1) as usize;
    let (start, end) = visible_range(state.leaderboard_selected, rows.len(), visible);
    let body = rows[start..end].iter().enumerate().map(|(i, r)| {
        let e = &r.entry;
        let style = if start + i == state.leaderboard_selected {
            Style::default().fg(Color::White).bg(Color::DarkGray)
        } else {
            Style::default()
        };
        Row::new(vec![
            format!("{}", r.display_rank),
            e.username.clone(),
            e.institution
                .as_ref()
                .map(|i| i.short_name.clone().unwrap_or_else(|| i.name.clone()))
                .unwrap_or_else(|| "-".to_string()),
            format!("{:.0}", e.total_points),
            format!("{:.0}/{:.0}", e.stats.challenge_points, e.stats.battle_points),
            e.stats.challenges_solved.to_string(),
            e.stats.battles_won.to_string(),
            format!("{:.1}", e.stats.avg_rating),
            e.stats.current_streak.to_string(),
        ])
        .style(style)
    });

    let widths = [
        Constraint::Length(5),
        Constraint::Min(14),
        Constraint::Length(10),
        Constraint::Length(8),
        Constraint::Length(12),
        Constraint::Length(7),
        Constraint::Length(7),
        Constraint::Length(7),
        Constraint::Length(7),
    ];
    let header = Row::new(vec![
        "#", "User", "Inst", "Points", "Chal/Bat", "Solved", "Won", "Rating", "Streak",
    ])
    .style(Style::default().add_modifier(Modifier::BOLD));
    frame.render_widget(Table::new(body, widths).header(header), area);
}

fn render_battles(frame: &mut Frame, area: Rect, state: &ArenaState) {
    let battles = state.current_battles();
    if battles.is_empty() {
        frame.render_widget(
            Paragraph::new("No battles in this list").style(Style::default().fg(Color::DarkGray)),
            area,
        );
        return;
    }
    let now = Utc::now();
    let visible = area.height.saturating_sub(1) as usize;
    let (start, end) = visible_range(state.battles_selected, battles.len(), visible);
    let body = battles[start..end].iter().enumerate().map(|(i, b)| {
        let style = if start + i == state.battles_selected {
            Style::default().fg(Color::White).bg(Color::DarkGray)
        } else {
            Style::default()
        };
        let clock = b
            .timing(now)
            .map(|t| t.label)
            .unwrap_or_else(|| format!("{}m", b.duration_minutes));
        Row::new(vec![
            status_label(b.status).to_string(),
            b.title.clone(),
            b.creator.username.clone(),
            b.opponent
                .as_ref()
                .map(|o| o.username.clone())
                .unwrap_or_else(|| "-".to_string()),
            clock,
            b.prize_points.to_string(),
        ])
        .style(style)
    });
    let widths = [
        Constraint::Length(9),
        Constraint::Min(16),
        Constraint::Length(14),
        Constraint::Length(14),
        Constraint::Length(8),
        Constraint::Length(6),
    ];
    let header = Row::new(vec!["Status", "Title", "Creator", "Opponent", "Clock", "Prize"])
        .style(Style::default().add_modifier(Modifier::BOLD));
    frame.render_widget(Table::new(body, widths).header(header), area);
}

fn render_battle(frame: &mut Frame, area: Rect, state: &ArenaState) {
    let Some(battle) = state.open_battle.as_ref() else {
        frame.render_widget(Paragraph::new("Loading battle..."), area);
        return;
    };
    let sections = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(6),
            Constraint::Length(3),
            Constraint::Min(1),
        ])
        .split(area);

    let mut info = vec![
        format!(
            "{} [{}] challenge {}",
            battle.title,
            status_label(battle.status),
            battle
                .challenge
                .title
                .as_deref()
                .unwrap_or(&battle.challenge.id)
        ),
        format!(
            "{}{} vs {}",
            battle.creator.username,
            battle
                .creator
                .rating
                .map(|r| format!(" ({r})"))
                .unwrap_or_default(),
            battle
                .opponent
                .as_ref()
                .map(|o| o.username.clone())
                .unwrap_or_else(|| "(open)".to_string())
        ),
        format!(
            "Duration {}m | Prize {} pts",
            battle.duration_minutes, battle.prize_points
        ),
    ];
    if let Some(winner) = battle.winner.as_deref() {
        info.push(format!("Winner: {winner}"));
    }
    let actions = state
        .open_battle_actions()
        .iter()
        .map(|a| a.label())
        .collect::<Vec<_>>()
        .join(", ");
    info.push(format!(
        "Actions: {}",
        if actions.is_empty() { "none" } else { &actions }
    ));
    frame.render_widget(
        Paragraph::new(info.join("\n")).block(Block::default().borders(Borders::BOTTOM)),
        sections[0],
    );

    match state.open_battle_timing(Utc::now()) {
        Some(timing) => {
            let color = if timing.remaining_sec < 60 {
                Color::Red
            } else {
                Color::Green
            };
            let gauge = Gauge::default()
                .block(Block::default().borders(Borders::ALL).title("Time"))
                .gauge_style(Style::default().fg(color))
                .percent(u16::from(timing.progress_pct.min(100)));
            let gauge = if timing.is_over() {
                gauge.label("Time's up, waiting for results")
            } else {
                gauge.label(timing.label)
            };
            frame.render_widget(gauge, sections[1]);
        }
        None => frame.render_widget(
            Paragraph::new("No countdown").style(Style::default().fg(Color::DarkGray)),
            sections[1],
        ),
    }

    let mut lines = Vec::new();
    if let Some(action) = state.pending_action {
        lines.push(format!("{}...", action.label()));
    }
    if let Some(err) = state.last_error.as_deref() {
        lines.push(format!("Error: {err}"));
    }
    if let Some(summary) = state.last_submit.as_deref() {
        lines.push(format!("Last submission: {summary}"));
    }
    if let Some(run) = state.last_run.as_ref() {
        lines.push(format!(
            "Run{}{}:",
            run.verdict
                .as_deref()
                .map(|v| format!(" [{v}]"))
                .unwrap_or_default(),
            run.time_ms.map(|t| format!(" {t:.0}ms")).unwrap_or_default()
        ));
        lines.push(run.stdout.clone());
        if !run.stderr.is_empty() {
            lines.push(run.stderr.clone());
        }
    }
    for s in &battle.submissions {
        lines.push(format!(
            "{}: {}/{}{}",
            s.username,
            s.passed.map(|p| p.to_string()).unwrap_or_else(|| "?".to_string()),
            s.total.map(|t| t.to_string()).unwrap_or_else(|| "?".to_string()),
            s.score.map(|sc| format!(" score {sc:.1}")).unwrap_or_default()
        ));
    }
    frame.render_widget(
        Paragraph::new(lines.join("\n")).wrap(Wrap { trim: false }),
        sections[2],
    );
}

fn render_logs(frame: &mut Frame, area: Rect, state: &ArenaState) {
    let take = area.height.saturating_sub(1) as usize;
    let skip = state.logs.len().saturating_sub(take);
    let text = state
        .logs
        .iter()
        .skip(skip)
        .cloned()
        .collect::<Vec<_>>()
        .join("\n");
    frame.render_widget(
        Paragraph::new(text)
            .style(Style::default().fg(Color::Gray))
            .block(Block::default().borders(Borders::TOP)),
        area,
    );
}

fn render_help_overlay(frame: &mut Frame, area: Rect) {
    let width = area.width.min(60);
    let height = area.height.min(15);
    let popup = Rect {
        x: area.x + (area.width.saturating_sub(width)) / 2,
        y: area.y + (area.height.saturating_sub(height)) / 2,
        width,
        height,
    };
    let text = [
        "1/2      Leaderboard / Battles",
        "j/k      Move selection",
        "s r f t  Sort, reverse, institution, board type",
        "/        Search by name or institution",
        "Enter    Open battle",
        "n        New battle for ARENA_CHALLENGE_ID",
        "J a x    Join, accept, decline",
        "R S      Run / submit ARENA_CODE_FILE",
        "b Esc    Back",
        "q        Quit",
    ]
    .join("\n");
    frame.render_widget(Clear, popup);
    frame.render_widget(
        Paragraph::new(text).block(Block::default().borders(Borders::ALL).title("Help")),
        popup,
    );
}

fn visible_range(selected: usize, total: usize, visible: usize) -> (usize, usize) {
    if total == 0 || visible == 0 {
        return (0, 0);
    }
    let start = selected
        .saturating_sub(visible - 1)
        .min(total.saturating_sub(visible));
    let end = (start + visible).min(total);
    (start, end)
}
