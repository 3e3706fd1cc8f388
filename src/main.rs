//! conbridge - host a program in a pseudo console
//!
//! Runs a command line inside a Windows pseudo console and bridges it to the
//! current console: keystrokes go to the child, its output goes to stdout,
//! and console resizes are forwarded.
//!
//! # Quick Start
//!
//! ```text
//! conbridge                      # Host the configured shell (cmd.exe by default)
//! conbridge -s "pwsh.exe"        # Host PowerShell 7
//! conbridge -d C:\src --poll     # Start in C:\src, poll the output pipe
//! ```
//!
//! On other platforms a short image compositor demo runs instead.

use std::env;
use std::path::PathBuf;

use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use conbridge::config::{self, Config, PumpStrategy};

/// Version string from Cargo.toml
const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Command line overrides for the config file
#[derive(Debug, Default)]
struct CliArgs {
    shell: Option<String>,
    dir: Option<PathBuf>,
    poll: bool,
}

fn print_version() {
    eprintln!("conbridge {}", VERSION);
}

fn print_help() {
    eprintln!("conbridge {} - host a program in a pseudo console", VERSION);
    eprintln!();
    eprintln!("Usage: conbridge [OPTIONS]");
    eprintln!();
    eprintln!("Options:");
    eprintln!("  -s, --shell <CMD>     Command line to run (default: config.toml or cmd.exe)");
    eprintln!("  -d, --dir <PATH>      Starting directory");
    eprintln!("      --poll            Poll the output pipe instead of blocking reads");
    eprintln!("  -v, --version         Show version");
    eprintln!("  -h, --help            Show this help");
    eprintln!();
    eprintln!("Configuration: ~/.conbridge/config.toml");
    eprintln!("Log file:      ~/.conbridge/conbridge.log (filter with RUST_LOG)");
}

fn parse_args() -> Result<CliArgs, String> {
    let args: Vec<String> = env::args().collect();
    let mut cli = CliArgs::default();
    let mut i = 1;

    while i < args.len() {
        match args[i].as_str() {
            "-h" | "--help" => {
                print_help();
                std::process::exit(0);
            }
            "-v" | "--version" => {
                print_version();
                std::process::exit(0);
            }
            "-s" | "--shell" => {
                i += 1;
                if i >= args.len() {
                    return Err("Missing shell argument".to_string());
                }
                cli.shell = Some(args[i].clone());
            }
            "-d" | "--dir" => {
                i += 1;
                if i >= args.len() {
                    return Err("Missing directory argument".to_string());
                }
                cli.dir = Some(PathBuf::from(&args[i]));
            }
            "--poll" => {
                cli.poll = true;
            }
            arg => {
                return Err(format!("Unknown argument: {}. Use -h for help.", arg));
            }
        }
        i += 1;
    }

    Ok(cli)
}

/// Command line flags win over the config file.
fn apply_args(config: &mut Config, cli: CliArgs) {
    if let Some(shell) = cli.shell {
        config.shell = Some(shell);
    }
    if let Some(dir) = cli.dir {
        config.starting_directory = Some(dir);
    }
    if cli.poll {
        config.pump.strategy = PumpStrategy::Polling;
    }
}

fn init_logging(config: &Config) {
    let log_path = config::app_dir()
        .map(|dir| dir.join("conbridge.log"))
        .unwrap_or_else(|| PathBuf::from("conbridge.log"));

    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
        .ok();

    if let Some(file) = log_file {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));
        let subscriber = FmtSubscriber::builder()
            .with_env_filter(filter)
            .with_writer(std::sync::Mutex::new(file))
            .with_ansi(false)
            .finish();
        let _ = tracing::subscriber::set_global_default(subscriber);
    }
}

fn main() -> anyhow::Result<()> {
    let cli = match parse_args() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error: {}", e);
            eprintln!("Use --help for usage information");
            std::process::exit(1);
        }
    };

    let mut config = Config::load();
    apply_args(&mut config, cli);
    init_logging(&config);
    info!("conbridge {} starting", VERSION);

    #[cfg(not(windows))]
    {
        eprintln!("conbridge hosts Windows pseudo consoles; running the compositor demo instead.");
        demo::run(&config)?;
    }

    #[cfg(windows)]
    {
        let exit_code = host::run(&config)?;
        info!("conbridge exiting with {}", exit_code);
        if exit_code != 0 {
            std::process::exit(exit_code as i32);
        }
    }

    Ok(())
}

#[cfg(windows)]
mod host {
    use std::io::Write;
    use std::sync::Arc;
    use std::thread;

    use anyhow::Context;
    use crossterm::terminal;
    use tracing::{debug, error, info, warn};
    use windows::Win32::Foundation::HANDLE;
    use windows::Win32::System::Console::{
        GetConsoleMode, GetStdHandle, SetConsoleMode, CONSOLE_MODE, DISABLE_NEWLINE_AUTO_RETURN,
        ENABLE_VIRTUAL_TERMINAL_INPUT, ENABLE_VIRTUAL_TERMINAL_PROCESSING, ENABLE_WINDOW_INPUT, STD_HANDLE,
        STD_INPUT_HANDLE, STD_OUTPUT_HANDLE,
    };

    use conbridge::config::Config;
    use conbridge::core::input::{ConsoleInput, InputReader};
    use conbridge::core::{PseudoConsoleSession, SessionEvent, UNKNOWN_EXIT_CODE};

    /// Console modes restored on drop
    struct ConsoleModes {
        saved: Vec<(HANDLE, CONSOLE_MODE)>,
    }

    impl ConsoleModes {
        fn enable() -> Self {
            let mut modes = Self { saved: Vec::new() };
            modes.add(STD_OUTPUT_HANDLE, ENABLE_VIRTUAL_TERMINAL_PROCESSING | DISABLE_NEWLINE_AUTO_RETURN);
            modes.add(STD_INPUT_HANDLE, ENABLE_VIRTUAL_TERMINAL_INPUT | ENABLE_WINDOW_INPUT);
            modes
        }

        fn add(&mut self, which: STD_HANDLE, flags: CONSOLE_MODE) {
            unsafe {
                let Ok(handle) = GetStdHandle(which) else {
                    return;
                };
                let mut mode = CONSOLE_MODE::default();
                if GetConsoleMode(handle, &mut mode).is_err() {
                    return;
                }
                if let Err(e) = SetConsoleMode(handle, mode | flags) {
                    warn!("could not set console mode: {}", e);
                    return;
                }
                self.saved.push((handle, mode));
            }
        }
    }

    impl Drop for ConsoleModes {
        fn drop(&mut self) {
            for (handle, mode) in self.saved.drain(..) {
                unsafe {
                    let _ = SetConsoleMode(handle, mode);
                }
            }
        }
    }

    /// Host the configured program until it exits; returns its exit code.
    pub fn run(config: &Config) -> anyhow::Result<u32> {
        let (cols, rows) = terminal::size().unwrap_or((config.cols, config.rows));
        info!("Terminal size: {}x{}", cols, rows);

        let session = Arc::new(PseudoConsoleSession::new(config.session_options(rows, cols)));
        let events = session.subscribe();
        session
            .start()
            .with_context(|| format!("failed to start '{}'", session.options().command_line))?;

        terminal::enable_raw_mode()?;
        let modes = ConsoleModes::enable();
        print!("\x1b]0;{}\x07", session.tab_title(""));
        let _ = std::io::stdout().flush();

        spawn_input_thread(Arc::clone(&session))?;
        let exit_code = pump_events(&events);

        session.close();
        drop(modes);
        let _ = terminal::disable_raw_mode();
        Ok(session.exit_code().unwrap_or(exit_code))
    }

    fn spawn_input_thread(session: Arc<PseudoConsoleSession>) -> anyhow::Result<()> {
        let source = ConsoleInput::stdin()?;
        thread::Builder::new().name("conbridge-input".to_string()).spawn(move || {
            let mut reader = InputReader::new(source);
            let resized = Arc::clone(&session);
            reader.set_window_size_changed_callback(move |size| {
                let (cols, rows) = terminal::size().unwrap_or((size.columns, size.rows));
                if let Err(e) = resized.resize(rows, cols) {
                    warn!("resize to {}x{} failed: {}", cols, rows, e);
                }
            });

            while let Some(units) = reader.read() {
                if session.is_closing() {
                    break;
                }
                if let Err(e) = session.write_input_utf16(&units) {
                    error!("input forwarding stopped: {}", e);
                    break;
                }
            }
            debug!("input thread finished");
        })?;
        Ok(())
    }

    /// Copy output to stdout until the child goes away.
    fn pump_events(events: &std::sync::mpsc::Receiver<SessionEvent>) -> u32 {
        let mut stdout = std::io::stdout();
        for event in events.iter() {
            match event {
                SessionEvent::Output(text) => {
                    let _ = stdout.write_all(text.as_bytes());
                    let _ = stdout.flush();
                }
                SessionEvent::Disconnected { exit_code } => return exit_code,
                SessionEvent::StateChanged { state, exit_code } => {
                    debug!("session {}", state);
                    if state.is_terminal() {
                        return exit_code.unwrap_or(UNKNOWN_EXIT_CODE);
                    }
                }
            }
        }
        UNKNOWN_EXIT_CODE
    }
}

#[cfg(not(windows))]
mod demo {
    use conbridge::buffer::{CellSize, ImageRow, ImageRows, ImageSlice, LineRendition, Pixel, Rect, TextBuffer};
    use conbridge::config::Config;
    use conbridge::core::PseudoConsoleSession;

    fn describe(buffer: &TextBuffer) {
        for y in 0..buffer.height() as i32 {
            let row = buffer.row_by_offset(y);
            match row.image_slice() {
                Some(slice) => println!(
                    "  row {}: columns {}..{} stride {}px",
                    y,
                    slice.column_offset(),
                    slice.column_end(),
                    slice.pixel_width()
                ),
                None => println!("  row {}: -", y),
            }
        }
    }

    pub fn run(config: &Config) -> anyhow::Result<()> {
        println!("=== conbridge Demo Mode ===\n");

        let session = PseudoConsoleSession::new(config.session_options(0, 0));
        if let Err(e) = session.start() {
            println!("session '{}': {} ({})\n", session.tab_title(""), e, session.state());
        }

        let cell = CellSize::new(8, 16);
        let mut buffer = TextBuffer::new(6);
        for y in 0..4 {
            let mut slice = ImageSlice::new(cell);
            slice.fill(y, y + 5, Pixel::rgb(0x20 * y as u8, 0x80, 0xff));
            *buffer.row_by_offset_mut(y).image_slice_mut() = Some(slice);
        }
        buffer.row_by_offset_mut(3).set_line_rendition(LineRendition::DoubleWidth);
        println!("After drawing:");
        describe(&buffer);

        ImageSlice::erase_block(&mut buffer, Rect::new(2, 0, 4, 2));
        println!("\nAfter erasing columns 2..4 of rows 0..2:");
        describe(&buffer);

        buffer.scroll_images(Rect::new(0, 0, 20, 6), 2);
        println!("\nAfter scrolling down two rows:");
        describe(&buffer);

        println!("\nDemo complete. Build on Windows to host pseudo consoles.");
        Ok(())
    }
}
