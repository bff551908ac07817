use anyhow::{Context, Result};
use clap::Parser;
use crossterm::{
    cursor::MoveToColumn,
    event::{Event, EventStream, KeyCode, KeyEvent, KeyEventKind, KeyModifiers},
    queue,
    style::Print,
    terminal::{self, disable_raw_mode, enable_raw_mode, Clear, ClearType},
};
use futures_util::StreamExt;
use std::io::{self, IsTerminal, Write};
use std::path::PathBuf;
use tile_sh::{Shell, DEFAULT_TERMWIDTH};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "tile-sh", about = "Interactive shell for the window-manager control hub")]
struct Args {
    #[arg(long, default_value = "")]
    socket: String,
    /// Run one line and exit.
    #[arg(short = 'c', long)]
    command: Option<String>,
    #[arg(long)]
    width: Option<usize>,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging();

    let socket_path = if args.socket.trim().is_empty() {
        tile_core::default_socket_path()
    } else {
        PathBuf::from(args.socket.trim())
    };
    let interactive = io::stdin().is_terminal();
    let width = args.width.unwrap_or_else(|| terminal_width(interactive));

    let mut shell = Shell::connect(&socket_path)
        .await
        .with_context(|| format!("cannot reach hub at {}", socket_path.display()))?
        .with_width(width);

    if let Some(line) = args.command {
        print_output(&shell.process_line(&line).await);
        return Ok(());
    }
    if interactive {
        run_interactive(&mut shell).await
    } else {
        run_script(&mut shell).await
    }
}

fn init_logging() {
    let level = std::env::var("TILE_LOG_LEVEL")
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .unwrap_or_else(|| "warn".to_string());
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(level))
        .with_writer(io::stderr)
        .try_init();
}

fn terminal_width(interactive: bool) -> usize {
    if !interactive {
        return DEFAULT_TERMWIDTH;
    }
    terminal::size()
        .map(|(cols, _)| usize::from(cols))
        .unwrap_or(DEFAULT_TERMWIDTH)
}

fn print_output(output: &str) {
    if !output.is_empty() {
        println!("{output}");
    }
}

async fn run_script(shell: &mut Shell) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await.context("reading stdin")? {
        print_output(&shell.process_line(&line).await);
        if shell.exit_requested() {
            break;
        }
    }
    Ok(())
}

async fn run_interactive(shell: &mut Shell) -> Result<()> {
    enable_raw_mode().context("enabling raw mode")?;
    let result = line_editor(shell).await;
    let _ = disable_raw_mode();
    println!();
    result
}

#[derive(Default)]
struct Editor {
    buffer: String,
    history: Vec<String>,
    history_pos: Option<usize>,
    /// Input as it was before the first Tab of a completion run.
    tab_origin: Option<String>,
}

enum Step {
    Continue,
    Submit(String),
    Quit,
}

async fn line_editor(shell: &mut Shell) -> Result<()> {
    let mut stdout = io::stdout();
    let mut editor = Editor::default();
    let mut events = EventStream::new();
    redraw(&mut stdout, &shell.prompt(), &editor.buffer)?;

    while let Some(event) = events.next().await {
        match event.context("reading terminal events")? {
            Event::Key(key) if key.kind != KeyEventKind::Release => {
                match editor.handle_key(shell, key).await {
                    Step::Continue => {}
                    Step::Quit => break,
                    Step::Submit(line) => {
                        queue!(stdout, Print("\r\n"))?;
                        let output = shell.process_line(&line).await;
                        if !output.is_empty() {
                            queue!(stdout, Print(output.replace('\n', "\r\n")), Print("\r\n"))?;
                        }
                        if shell.exit_requested() {
                            stdout.flush()?;
                            break;
                        }
                    }
                }
                redraw(&mut stdout, &shell.prompt(), &editor.buffer)?;
            }
            Event::Resize(cols, _) => shell.set_termwidth(usize::from(cols)),
            _ => {}
        }
    }
    Ok(())
}

impl Editor {
    async fn handle_key(&mut self, shell: &mut Shell, key: KeyEvent) -> Step {
        if key.code != KeyCode::Tab {
            self.tab_origin = None;
            shell.reset_completion();
        }
        let ctrl = key.modifiers.contains(KeyModifiers::CONTROL);
        match key.code {
            KeyCode::Char('d') if ctrl && self.buffer.is_empty() => return Step::Quit,
            KeyCode::Char('c') if ctrl => self.buffer.clear(),
            KeyCode::Char('u') if ctrl => self.buffer.clear(),
            KeyCode::Char(c) if !ctrl => self.buffer.push(c),
            KeyCode::Backspace => {
                self.buffer.pop();
            }
            KeyCode::Tab => {
                let origin = self.tab_origin.get_or_insert_with(|| self.buffer.clone()).clone();
                if let Some(completed) = shell.complete_next(&origin).await {
                    self.buffer = completed;
                }
            }
            KeyCode::Up => self.history_back(),
            KeyCode::Down => self.history_forward(),
            KeyCode::Enter => {
                let line = std::mem::take(&mut self.buffer);
                self.history_pos = None;
                if !line.trim().is_empty() && self.history.last() != Some(&line) {
                    self.history.push(line.clone());
                }
                return Step::Submit(line);
            }
            _ => {}
        }
        Step::Continue
    }

    fn history_back(&mut self) {
        if self.history.is_empty() {
            return;
        }
        let pos = match self.history_pos {
            Some(pos) => pos.saturating_sub(1),
            None => self.history.len() - 1,
        };
        self.history_pos = Some(pos);
        if let Some(entry) = self.history.get(pos) {
            self.buffer = entry.clone();
        }
    }

    fn history_forward(&mut self) {
        let Some(pos) = self.history_pos else {
            return;
        };
        if pos + 1 < self.history.len() {
            self.history_pos = Some(pos + 1);
            self.buffer = self.history[pos + 1].clone();
        } else {
            self.history_pos = None;
            self.buffer.clear();
        }
    }
}

fn redraw(stdout: &mut io::Stdout, prompt: &str, buffer: &str) -> io::Result<()> {
    queue!(
        stdout,
        MoveToColumn(0),
        Clear(ClearType::CurrentLine),
        Print(prompt),
        Print(buffer)
    )?;
    stdout.flush()
}
