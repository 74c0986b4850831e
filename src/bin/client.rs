use std::io;
use std::time::{Duration, Instant};

use anyhow::Result;
use chrono::Local;
use clap::Parser;
use crossterm::{
    event::{self, Event, KeyCode, KeyEvent, KeyModifiers},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use futures_util::{SinkExt, StreamExt};
use ratatui::{
    backend::CrosstermBackend,
    layout::{Alignment, Constraint, Direction, Layout},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, List, ListItem, Paragraph},
    Frame, Terminal,
};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message as WsMessage;

use chat_hub::protocol::{Message, MessageType};

/// Minimum gap between two outgoing typing notifications.
const TYPING_THROTTLE: Duration = Duration::from_secs(2);
/// How long a peer stays in the "is typing" line after their last notification.
const TYPING_TTL: Duration = Duration::from_secs(3);

// ─── CLI ──────────────────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(name = "client", about = "Chat hub TUI client")]
struct Args {
    /// WebSocket endpoint of the hub
    #[arg(long, default_value = "ws://localhost:8080/ws")]
    url: String,

    /// Join immediately with this display name
    #[arg(long)]
    name: Option<String>,
}

// ─── Screens ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
enum Screen {
    Join,
    Chat,
}

// ─── Simple one-line text input ───────────────────────────────────────────────

#[derive(Default, Clone)]
struct Input {
    value: String,
    cursor: usize,
}

impl Input {
    fn insert(&mut self, ch: char) {
        self.value.insert(self.cursor, ch);
        self.cursor += ch.len_utf8();
    }

    fn delete_back(&mut self) {
        if self.cursor == 0 {
            return;
        }
        // find previous char boundary
        let mut prev = self.cursor - 1;
        while prev > 0 && !self.value.is_char_boundary(prev) {
            prev -= 1;
        }
        self.value.drain(prev..self.cursor);
        self.cursor = prev;
    }

    fn clear(&mut self) {
        self.value.clear();
        self.cursor = 0;
    }

    fn as_str(&self) -> &str {
        &self.value
    }

    /// Terminal column of the cursor; `cursor` itself is a byte offset.
    fn column(&self) -> u16 {
        let chars = self.value[..self.cursor].chars().count();
        u16::try_from(chars).unwrap_or(u16::MAX)
    }
}

// ─── App state ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
struct ChatLine {
    username: String,
    content: String,
    timestamp: String,
    is_system: bool,
}

struct App {
    screen: Screen,
    name: String,
    name_input: Input,
    join_error: String,

    messages: Vec<ChatLine>,
    chat_input: Input,
    roster: Vec<String>,
    typing: Vec<(String, Instant)>,
    last_typing_sent: Option<Instant>,
    scroll: usize,
    viewport_height: u16,

    quit: bool,
}

impl App {
    fn new() -> Self {
        Self {
            screen: Screen::Join,
            name: String::new(),
            name_input: Input::default(),
            join_error: String::new(),

            messages: Vec::new(),
            chat_input: Input::default(),
            roster: Vec::new(),
            typing: Vec::new(),
            last_typing_sent: None,
            scroll: 0,
            viewport_height: 20,

            quit: false,
        }
    }

    fn push_message(&mut self, line: ChatLine) {
        self.messages.push(line);
    }

    fn push_system(&mut self, content: impl Into<String>) {
        self.push_message(ChatLine {
            username: String::new(),
            content: content.into(),
            timestamp: String::new(),
            is_system: true,
        });
    }

    fn scroll_up(&mut self) {
        let max = self.messages.len().saturating_sub(self.viewport_height as usize);
        self.scroll = (self.scroll + 3).min(max);
    }

    fn scroll_down(&mut self) {
        self.scroll = self.scroll.saturating_sub(3);
    }

    fn mark_typing(&mut self, user: String) {
        let now = Instant::now();
        match self.typing.iter_mut().find(|(u, _)| *u == user) {
            Some(entry) => entry.1 = now,
            None => self.typing.push((user, now)),
        }
    }

    fn expire_typing(&mut self) {
        self.typing.retain(|(_, at)| at.elapsed() < TYPING_TTL);
    }

    fn typing_line(&self) -> String {
        let names: Vec<&str> = self.typing.iter().map(|(u, _)| u.as_str()).collect();
        match names.len() {
            0 => String::new(),
            1 => format!("{} is typing…", names[0]),
            _ => format!("{} are typing…", names.join(", ")),
        }
    }
}

// ─── Network message types (from server → TUI) ───────────────────────────────

enum NetMsg {
    Event(Message),
    Disconnected,
}

// ─── Main ────────────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Connect to server
    let (ws, _) = tokio_tungstenite::connect_async(args.url.as_str()).await?;
    let (mut writer, mut reader) = ws.split();

    // Channel: server → UI
    let (net_tx, mut net_rx) = mpsc::channel::<NetMsg>(128);
    // Channel: UI → server writer
    let (write_tx, mut write_rx) = mpsc::channel::<Message>(64);

    // Spawn reader task
    tokio::spawn(async move {
        while let Some(frame) = reader.next().await {
            match frame {
                Ok(WsMessage::Text(text)) => {
                    if let Ok(msg) = Message::decode(text.as_str().as_bytes()) {
                        if net_tx.send(NetMsg::Event(msg)).await.is_err() {
                            return;
                        }
                    }
                }
                Ok(WsMessage::Close(_)) | Err(_) => break,
                Ok(_) => {}
            }
        }
        net_tx.send(NetMsg::Disconnected).await.ok();
    });

    // Spawn writer task
    tokio::spawn(async move {
        while let Some(msg) = write_rx.recv().await {
            let Ok(frame) = msg.encode() else { continue };
            if writer.send(WsMessage::text(frame.to_string())).await.is_err() {
                break;
            }
        }
        writer.close().await.ok();
    });

    let mut app = App::new();
    if let Some(name) = args.name.map(|n| n.trim().to_string()) {
        if !name.is_empty() {
            join(&mut app, name, &write_tx).await;
        }
    }

    // Set up terminal
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let result = run_app(&mut terminal, &mut app, &mut net_rx, &write_tx).await;

    // Restore terminal
    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;

    result
}

async fn run_app(
    terminal: &mut Terminal<CrosstermBackend<io::Stdout>>,
    app: &mut App,
    net_rx: &mut mpsc::Receiver<NetMsg>,
    write_tx: &mpsc::Sender<Message>,
) -> Result<()> {
    loop {
        app.expire_typing();

        // Draw
        let size = terminal.size()?;
        app.viewport_height = size.height.saturating_sub(6);
        terminal.draw(|f| draw(f, app))?;

        // Poll keyboard (non-blocking, 20ms)
        if event::poll(Duration::from_millis(20))? {
            if let Event::Key(key) = event::read()? {
                handle_key(app, key, write_tx).await;
            }
        }

        // Drain all pending network messages
        while let Ok(msg) = net_rx.try_recv() {
            handle_net(app, msg);
        }

        if app.quit {
            break;
        }
    }
    Ok(())
}

async fn join(app: &mut App, name: String, write_tx: &mpsc::Sender<Message>) {
    write_tx.send(Message::join(name.clone())).await.ok();
    app.name = name;
    app.screen = Screen::Chat;
    app.join_error.clear();
}

// ─── Key handling ─────────────────────────────────────────────────────────────

async fn handle_key(app: &mut App, key: KeyEvent, write_tx: &mpsc::Sender<Message>) {
    if key.modifiers.contains(KeyModifiers::CONTROL)
        && matches!(key.code, KeyCode::Char('c') | KeyCode::Char('q'))
    {
        app.quit = true;
        return;
    }
    match app.screen {
        Screen::Join => handle_join_key(app, key, write_tx).await,
        Screen::Chat => handle_chat_key(app, key, write_tx).await,
    }
}

async fn handle_join_key(app: &mut App, key: KeyEvent, write_tx: &mpsc::Sender<Message>) {
    match key.code {
        KeyCode::Enter => {
            let name = app.name_input.value.trim().to_string();
            if name.is_empty() {
                app.join_error = "A display name is required".into();
                return;
            }
            join(app, name, write_tx).await;
        }
        KeyCode::Backspace => app.name_input.delete_back(),
        KeyCode::Char(c) => app.name_input.insert(c),
        _ => {}
    }
}

async fn handle_chat_key(app: &mut App, key: KeyEvent, write_tx: &mpsc::Sender<Message>) {
    match key.code {
        KeyCode::PageUp => app.scroll_up(),
        KeyCode::PageDown => app.scroll_down(),
        KeyCode::Enter => {
            let content = app.chat_input.value.trim().to_string();
            if content.is_empty() {
                return;
            }
            app.chat_input.clear();
            write_tx
                .send(Message::chat(app.name.clone(), content))
                .await
                .ok();
        }
        KeyCode::Backspace => app.chat_input.delete_back(),
        KeyCode::Char(c) => {
            app.chat_input.insert(c);
            let due = app
                .last_typing_sent
                .map_or(true, |at| at.elapsed() >= TYPING_THROTTLE);
            if due {
                app.last_typing_sent = Some(Instant::now());
                write_tx
                    .send(Message::typing(app.name.clone(), None))
                    .await
                    .ok();
            }
        }
        _ => {}
    }
}

// ─── Network message handling ─────────────────────────────────────────────────

fn handle_net(app: &mut App, msg: NetMsg) {
    match msg {
        NetMsg::Disconnected => app.push_system("Disconnected from server."),
        NetMsg::Event(ev) => match ev.msg_type {
            MessageType::Message => {
                let username = ev.user.unwrap_or_default();
                app.typing.retain(|(u, _)| *u != username);
                app.push_message(ChatLine {
                    username,
                    content: ev.text.unwrap_or_default(),
                    timestamp: Local::now().format("%H:%M:%S").to_string(),
                    is_system: false,
                });
            }
            MessageType::Typing => {
                if let Some(user) = ev.user.filter(|u| *u != app.name) {
                    app.mark_typing(user);
                }
            }
            MessageType::Users => {
                app.roster = ev.users.unwrap_or_default();
            }
            MessageType::Join | MessageType::Unknown => {}
        },
    }
}

// ─── Drawing ─────────────────────────────────────────────────────────────────

fn draw(f: &mut Frame, app: &App) {
    match app.screen {
        Screen::Join => draw_join(f, app),
        Screen::Chat => draw_chat(f, app),
    }
}

fn draw_join(f: &mut Frame, app: &App) {
    let area = f.area();

    let block = Block::default()
        .title(" Chat Hub ")
        .title_alignment(Alignment::Center)
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Cyan));

    let inner = block.inner(area);
    f.render_widget(block, area);

    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(2), // title
            Constraint::Length(3), // name
            Constraint::Length(1), // hint
            Constraint::Length(1), // error
            Constraint::Min(0),
        ])
        .split(inner);

    let title = Paragraph::new("── Join ──")
        .alignment(Alignment::Center)
        .style(Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD));
    f.render_widget(title, chunks[0]);

    let name_widget = Paragraph::new(app.name_input.as_str())
        .block(
            Block::default()
                .title(" Display name ")
                .borders(Borders::ALL)
                .border_style(Style::default().fg(Color::Yellow)),
        )
        .style(Style::default().fg(Color::White));
    f.render_widget(name_widget, chunks[1]);

    let hint = Paragraph::new("Enter to join | Ctrl+Q to quit")
        .alignment(Alignment::Center)
        .style(Style::default().fg(Color::DarkGray));
    f.render_widget(hint, chunks[2]);

    if !app.join_error.is_empty() {
        let err = Paragraph::new(app.join_error.as_str())
            .alignment(Alignment::Center)
            .style(Style::default().fg(Color::Red));
        f.render_widget(err, chunks[3]);
    }

    f.set_cursor_position((
        chunks[1].x + 1 + app.name_input.column(),
        chunks[1].y + 1,
    ));
}

fn draw_chat(f: &mut Frame, app: &App) {
    let area = f.area();

    let rows = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(1), // header
            Constraint::Min(3),    // messages + roster
            Constraint::Length(1), // typing
            Constraint::Length(3), // input
        ])
        .split(area);

    let body = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Min(20), Constraint::Length(22)])
        .split(rows[1]);

    // Header
    let header = Paragraph::new(format!(
        " Chat Hub  │  {}  │  {} online  │  PgUp/PgDn scroll  │  Ctrl+Q quit ",
        app.name,
        app.roster.len()
    ))
    .style(
        Style::default()
            .bg(Color::DarkGray)
            .fg(Color::White)
            .add_modifier(Modifier::BOLD),
    );
    f.render_widget(header, rows[0]);

    // Messages viewport
    let msg_block = Block::default()
        .borders(Borders::LEFT | Borders::RIGHT | Borders::TOP)
        .border_style(Style::default().fg(Color::DarkGray));
    let msg_inner = msg_block.inner(body[0]);
    f.render_widget(msg_block, body[0]);

    let height = msg_inner.height as usize;
    let total = app.messages.len();
    let start = if total > height + app.scroll {
        total - height - app.scroll
    } else {
        0
    };
    let visible = &app.messages[start..total.saturating_sub(app.scroll)];

    let items: Vec<ListItem> = visible
        .iter()
        .map(|line| {
            if line.is_system {
                ListItem::new(Line::from(vec![Span::styled(
                    format!("  ◆ {}", line.content),
                    Style::default()
                        .fg(Color::DarkGray)
                        .add_modifier(Modifier::ITALIC),
                )]))
            } else {
                let name_color = if line.username == app.name {
                    Color::Green
                } else {
                    Color::Cyan
                };
                ListItem::new(Line::from(vec![
                    Span::styled(
                        format!("[{}] ", line.timestamp),
                        Style::default().fg(Color::DarkGray),
                    ),
                    Span::styled(
                        format!("{}: ", line.username),
                        Style::default().fg(name_color).add_modifier(Modifier::BOLD),
                    ),
                    Span::raw(line.content.clone()),
                ]))
            }
        })
        .collect();
    f.render_widget(List::new(items), msg_inner);

    // Roster
    let roster_items: Vec<ListItem> = app
        .roster
        .iter()
        .map(|name| {
            let style = if *name == app.name {
                Style::default().fg(Color::Green).add_modifier(Modifier::BOLD)
            } else {
                Style::default().fg(Color::White)
            };
            ListItem::new(Span::styled(name.clone(), style))
        })
        .collect();
    let roster = List::new(roster_items).block(
        Block::default()
            .title(" Online ")
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::DarkGray)),
    );
    f.render_widget(roster, body[1]);

    // Typing indicator
    let typing = Paragraph::new(app.typing_line()).style(
        Style::default()
            .fg(Color::DarkGray)
            .add_modifier(Modifier::ITALIC),
    );
    f.render_widget(typing, rows[2]);

    // Input box
    let input_block = Block::default()
        .title(" Message (Enter to send) ")
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Cyan));
    let input_inner = input_block.inner(rows[3]);
    f.render_widget(input_block, rows[3]);

    let input_widget =
        Paragraph::new(app.chat_input.as_str()).style(Style::default().fg(Color::White));
    f.render_widget(input_widget, input_inner);

    f.set_cursor_position((
        input_inner.x + app.chat_input.column(),
        input_inner.y,
    ));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cursor_column_counts_characters_not_bytes() {
        let mut input = Input::default();
        for ch in "zoë€".chars() {
            input.insert(ch);
        }
        assert_eq!(input.cursor, "zoë€".len());
        assert_eq!(input.column(), 4);

        input.delete_back();
        assert_eq!(input.as_str(), "zoë");
        assert_eq!(input.column(), 3);
    }
}
