//! # zsurface-whiteboard
//!
//! A fading whiteboard drawn with the spatial pointer. Pressing near the
//! center of the board moves the window instead of drawing.

use anyhow::{Context, Result};
use clap::Parser;
use log::{debug, error, info};
use std::cell::RefCell;
use std::rc::Rc;
use zsurface::{ButtonState, Display, DisplayHandler, SessionConfig, Toplevel, View};

#[derive(Parser)]
#[command(name = "zsurface-whiteboard")]
#[command(about = "Draw on a fading whiteboard floating in a 3D compositor")]
#[command(version)]
struct Cli {
    /// Compositor socket name or absolute path
    #[arg(short, long)]
    socket: Option<String>,

    /// Path to configuration file
    #[arg(short, long)]
    config: Option<String>,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    /// Board width in pixels
    #[arg(long, default_value_t = 256)]
    width: u32,

    /// Board height in pixels
    #[arg(long, default_value_t = 256)]
    height: u32,
}

/// Squared radius of the pen, in pixels
const PEN_RADIUS_SQ: f32 = 64.0;

/// Squared radius of the move handle around the board center
const HANDLE_RADIUS_SQ: f32 = 1600.0;

#[derive(Debug, Default, Clone, Copy)]
struct Pointer {
    x: f32,
    y: f32,
    inside: bool,
    pressed: bool,
}

struct Board {
    width: u32,
    height: u32,
    pixels: Vec<u8>,
    pointer: Pointer,
}

impl Board {
    fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            pixels: vec![u8::MAX; width as usize * height as usize * 4],
            pointer: Pointer::default(),
        }
    }

    /// Fade every pixel toward white and paint under the pointer
    fn draw(&mut self) {
        let pointer = self.pointer;
        let width = self.width as usize;

        for (i, pixel) in self.pixels.chunks_exact_mut(4).enumerate() {
            let dx = pointer.x - (i % width) as f32;
            let dy = pointer.y - (i / width) as f32;

            if pointer.inside && dx * dx + dy * dy < PEN_RADIUS_SQ {
                // BGRA: red ink while pressed, black otherwise
                pixel[0] = 0;
                pixel[1] = 0;
                if !pointer.pressed {
                    pixel[2] = 0;
                }
            } else {
                for channel in &mut pixel[..3] {
                    *channel = channel.saturating_add(1);
                }
            }
        }
    }

    fn near_center(&self) -> bool {
        let dx = self.pointer.x - self.width as f32 / 2.0;
        let dy = self.pointer.y - self.height as f32 / 2.0;
        dx * dx + dy * dy < HANDLE_RADIUS_SQ
    }
}

struct Whiteboard {
    board: Rc<RefCell<Board>>,
    toplevel: Toplevel,
}

impl DisplayHandler for Whiteboard {
    fn pointer_enter(&mut self, _view: &View, x: f32, y: f32) {
        let mut board = self.board.borrow_mut();
        board.pointer.inside = true;
        board.pointer.x = x;
        board.pointer.y = y;
    }

    fn pointer_motion(&mut self, _time: u32, x: f32, y: f32) {
        let mut board = self.board.borrow_mut();
        board.pointer.x = x;
        board.pointer.y = y;
    }

    fn pointer_leave(&mut self, _view: &View) {
        let mut board = self.board.borrow_mut();
        board.pointer.inside = false;
        board.pointer.pressed = false;
    }

    fn pointer_button(&mut self, serial: u32, _time: u32, button: u32, state: ButtonState) {
        let near_center = {
            let mut board = self.board.borrow_mut();
            board.pointer.pressed = state == ButtonState::Pressed;
            board.near_center()
        };
        debug!("button {} {:?}", button, state);

        if state == ButtonState::Pressed && near_center {
            self.toplevel.start_move(serial);
        }
    }
}

/// Draw, then ask for the next frame and commit
fn next_frame(board: Rc<RefCell<Board>>, view: View) {
    {
        let mut board = board.borrow_mut();
        board.draw();
        if let Err(e) = view.set_texture(&board.pixels, board.width, board.height) {
            error!("Failed to update the board: {}", e);
            return;
        }
    }

    let next_view = view.clone();
    view.add_frame_callback(move |_time| next_frame(board, next_view));
    view.commit();
}

fn load_config(cli: &Cli) -> Result<SessionConfig> {
    let mut config = match &cli.config {
        Some(path) => SessionConfig::load(path)
            .with_context(|| format!("Failed to load configuration from {}", path))?,
        None => SessionConfig::default(),
    };
    config = config.with_env_overrides();
    if let Some(socket) = &cli.socket {
        config.socket = socket.clone();
    }
    Ok(config)
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    zsurface::logging::init(cli.debug);

    info!(
        "Starting zsurface-whiteboard {} (built {}, commit {})",
        zsurface::VERSION,
        env!("ZSURFACE_BUILD_DATE"),
        env!("ZSURFACE_GIT_COMMIT")
    );

    let config = load_config(&cli)?;
    let mut display = Display::connect(&config)
        .with_context(|| format!("Failed to connect to compositor socket {}", config.socket))?;

    let toplevel = display.create_toplevel()?;
    let board = Rc::new(RefCell::new(Board::new(cli.width, cli.height)));
    next_frame(Rc::clone(&board), toplevel.view());

    let mut whiteboard = Whiteboard { board, toplevel };
    loop {
        if let Err(e) = display.dispatch(&mut whiteboard) {
            error!("Display connection failed: {}", e);
            return Err(e.into());
        }
    }
}
