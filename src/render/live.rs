//! 实时视图
//!
//! 每次追加（watch 序号变化）或每个 tick 从最新快照重绘。
//! 渲染跟不上时会跳过中间帧，但每一帧都来自当时最新的快照，不会倒序。
//! 按 `q` / `Esc` / `Ctrl-C` 设置取消标记并退出视图；外部设置取消标记时视图同样退出。

use std::io;
use std::time::{Duration, Instant};

use anyhow::Result;
use crossterm::{
    event::{self, Event, KeyCode, KeyEventKind, KeyModifiers},
    execute,
    terminal::{EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode},
};
use ratatui::{
    Frame, Terminal,
    backend::{Backend, CrosstermBackend},
    layout::{Constraint, Layout},
    style::{Color, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Paragraph},
};
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use super::ViewMode;
use super::bar::render_bar;
use super::log_capture::LogBuffer;
use super::table::render_table;
use crate::session::SessionState;
use crate::trace_log::{TraceSnapshot, TraceView};

/// 底部日志区显示的行数
const LOG_LINES: usize = 5;

/// 一帧需要的全部数据
pub struct LiveFrame<'a> {
    pub mode: ViewMode,
    pub snapshot: &'a TraceSnapshot,
    pub state: SessionState,
    pub elapsed: Duration,
    pub logs: &'a [String],
    pub ms_per_cell: f64,
}

fn status_line(live: &LiveFrame) -> Line<'static> {
    let (label, color) = match live.state {
        SessionState::Idle => ("starting", Color::DarkGray),
        SessionState::Capturing => ("capturing", Color::Green),
        SessionState::Completed => ("completed", Color::Cyan),
        SessionState::Cancelled => ("cancelled", Color::Yellow),
    };
    let help = if live.state.is_terminal() {
        "q/Esc: exit"
    } else {
        "q/Esc/Ctrl-C: stop"
    };

    Line::from(vec![
        Span::styled(format!(" {} ", label), Style::default().fg(color)),
        Span::raw(format!(
            "| {} records | {}s | {}",
            live.snapshot.len(),
            live.elapsed.as_secs(),
            help
        )),
    ])
}

pub fn draw(frame: &mut Frame, live: &LiveFrame) {
    let log_height = if live.logs.is_empty() {
        0
    } else {
        live.logs.len() as u16 + 2
    };
    let chunks = Layout::vertical([
        Constraint::Min(5),
        Constraint::Length(1),
        Constraint::Length(log_height),
    ])
    .split(frame.area());

    match live.mode {
        ViewMode::Table => render_table(frame, chunks[0], live.snapshot),
        ViewMode::Bar => render_bar(frame, chunks[0], live.snapshot.last(), live.ms_per_cell),
    }

    frame.render_widget(Paragraph::new(status_line(live)), chunks[1]);

    if !live.logs.is_empty() {
        let lines: Vec<Line> = live.logs.iter().map(|l| Line::from(l.as_str())).collect();
        frame.render_widget(
            Paragraph::new(lines).block(Block::default().borders(Borders::TOP).title("Log")),
            chunks[2],
        );
    }
}

fn setup_terminal() -> Result<Terminal<CrosstermBackend<io::Stdout>>> {
    enable_raw_mode()?;
    let entered = (|| -> Result<_> {
        let mut stdout = io::stdout();
        execute!(stdout, EnterAlternateScreen)?;
        let mut terminal = Terminal::new(CrosstermBackend::new(stdout))?;
        terminal.clear()?;
        Ok(terminal)
    })();
    if entered.is_err() {
        let _ = disable_raw_mode();
        let _ = execute!(io::stdout(), LeaveAlternateScreen);
        return entered;
    }

    let original_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |panic_info| {
        let _ = disable_raw_mode();
        let _ = execute!(io::stdout(), LeaveAlternateScreen);
        original_hook(panic_info);
    }));
    entered
}

fn restore_terminal(terminal: &mut Terminal<CrosstermBackend<io::Stdout>>) -> Result<()> {
    terminal.clear()?;
    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;
    Ok(())
}

/// 用户是否请求退出
fn quit_requested() -> Result<bool> {
    if event::poll(Duration::from_millis(0))?
        && let Event::Key(key) = event::read()?
        && key.kind == KeyEventKind::Press
    {
        return Ok(match key.code {
            KeyCode::Char('q') | KeyCode::Esc => true,
            KeyCode::Char('c') => key.modifiers.contains(KeyModifiers::CONTROL),
            _ => false,
        });
    }
    Ok(false)
}

/// 实时渲染端
pub struct LiveSink {
    mode: ViewMode,
    view: TraceView,
    updates: watch::Receiver<u64>,
    state: watch::Receiver<SessionState>,
    cancel: CancellationToken,
    logs: Option<LogBuffer>,
    tick: Duration,
    ms_per_cell: f64,
}

impl LiveSink {
    pub fn new(
        mode: ViewMode,
        view: TraceView,
        updates: watch::Receiver<u64>,
        state: watch::Receiver<SessionState>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            mode,
            view,
            updates,
            state,
            cancel,
            logs: None,
            tick: Duration::from_millis(250),
            ms_per_cell: 20.0,
        }
    }

    pub fn with_logs(mut self, logs: LogBuffer) -> Self {
        self.logs = Some(logs);
        self
    }

    pub fn with_tick(mut self, tick: Duration) -> Self {
        self.tick = tick.max(Duration::from_millis(10));
        self
    }

    pub fn with_scale(mut self, ms_per_cell: f64) -> Self {
        self.ms_per_cell = ms_per_cell;
        self
    }

    /// 接管终端直到用户退出；任何退出路径（包括终端初始化失败）都会设置取消标记
    pub async fn run(self) -> Result<()> {
        self.run_with(setup_terminal, restore_terminal).await
    }

    async fn run_with<B, S, R>(mut self, setup: S, restore: R) -> Result<()>
    where
        B: Backend,
        S: FnOnce() -> Result<Terminal<B>>,
        R: FnOnce(&mut Terminal<B>) -> Result<()>,
    {
        let _stop_capture = self.cancel.clone().drop_guard();

        let mut terminal = setup()?;
        let result = self.run_loop(&mut terminal).await;
        restore(&mut terminal)?;
        result
    }

    async fn run_loop<B: Backend>(&mut self, terminal: &mut Terminal<B>) -> Result<()> {
        let started = Instant::now();
        let mut finished_after: Option<Duration> = None;
        let mut updates_open = true;

        let mut ticker = tokio::time::interval(self.tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            let state = *self.state.borrow();
            if state.is_terminal() && finished_after.is_none() {
                finished_after = Some(started.elapsed());
            }
            let snapshot = self.view.snapshot();
            let logs = self
                .logs
                .as_ref()
                .map(|b| b.recent_lines(LOG_LINES))
                .unwrap_or_default();
            let frame = LiveFrame {
                mode: self.mode,
                snapshot: &snapshot,
                state,
                elapsed: finished_after.unwrap_or_else(|| started.elapsed()),
                logs: &logs,
                ms_per_cell: self.ms_per_cell,
            };
            terminal.draw(|f| draw(f, &frame))?;

            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    // 会话启动失败等由外部取消的情况
                    break;
                }
                changed = self.updates.changed(), if updates_open => {
                    // 会话结束后发送端被释放，之后只靠 tick 刷新
                    if changed.is_err() {
                        updates_open = false;
                    }
                }
                _ = ticker.tick() => {
                    if quit_requested()? {
                        tracing::info!("用户停止实时视图");
                        break;
                    }
                }
            }
        }
        Ok(())
    }
}
