// Entry point: winit event loop driving the engine's frame phases.
//
// The event loop runs in Poll mode; each pass through `about_to_wait`
// runs one lane-0 frame phase (the other lanes rendezvous at the
// barriers inside it). Keyboard state is translated here and pushed into
// the engine's key table; the module only ever sees raw key queries.

mod cli;

use std::sync::Arc;

use winit::application::ApplicationHandler;
use winit::dpi::LogicalSize;
use winit::event::WindowEvent;
use winit::event_loop::{ActiveEventLoop, ControlFlow, EventLoop};
use winit::keyboard::{KeyCode, PhysicalKey};
use winit::window::{Window, WindowId};

use pyre_common::{keys::Key, lanes};
use pyre_engine::{api, Engine, EngineOptions};

struct PyreApp {
    opts: cli::Options,
    window: Option<Arc<Window>>,
    engine: Option<Engine>,
    /// True once the lanes have observed quit through a frame's barrier
    /// pair, so no release synchronization is needed at exit.
    clean_lane_exit: bool,
    exit_code: i32,
}

impl PyreApp {
    fn new(opts: cli::Options) -> Self {
        Self {
            opts,
            window: None,
            engine: None,
            clean_lane_exit: false,
            exit_code: 0,
        }
    }
}

impl ApplicationHandler for PyreApp {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }

        let attrs = Window::default_attributes()
            .with_title("pyre")
            .with_inner_size(LogicalSize::new(self.opts.width, self.opts.height));

        let window = match event_loop.create_window(attrs) {
            Ok(window) => Arc::new(window),
            Err(e) => {
                log::error!("window creation failed: {}", e);
                self.exit_code = 1;
                event_loop.exit();
                return;
            }
        };

        let engine_opts = EngineOptions {
            validation: self.opts.validation,
            module_path: None,
        };

        let engine = match Engine::init(&window, &engine_opts) {
            Ok(engine) => engine,
            Err(e) => {
                log::error!("engine init failed: {}", e);
                self.exit_code = 1;
                event_loop.exit();
                return;
            }
        };

        self.window = Some(window);
        self.engine = Some(engine);

        if self.opts.headless {
            // Single-threaded capture branch: no frame loop, no reload,
            // no input.
            let engine = self.engine.as_mut().unwrap();
            if let Err(e) = engine.run_headless(self.opts.frames, &self.opts.output_dir) {
                log::error!("headless capture failed: {}", e);
                self.exit_code = 1;
            }
            engine.cleanup();
            self.clean_lane_exit = true;
            event_loop.exit();
        }
    }

    fn window_event(&mut self, _event_loop: &ActiveEventLoop, _window_id: WindowId, event: WindowEvent) {
        match event {
            WindowEvent::CloseRequested => {
                // Observed by every lane after the next barrier pair; the
                // loop exits once engine.frame reports it.
                lanes::request_quit();
            }

            WindowEvent::KeyboardInput { event, .. } => {
                if let Some(key) = translate_key(event.physical_key) {
                    api::set_key(key.code(), event.state.is_pressed());
                }
            }

            WindowEvent::Resized(_) => {
                // The scheduler reads the framebuffer size each frame and
                // recreates the swapchain on demand.
            }

            _ => {}
        }
    }

    fn about_to_wait(&mut self, event_loop: &ActiveEventLoop) {
        if self.opts.headless || self.clean_lane_exit {
            // Once the lanes have left their loop, another barrier pair
            // would block forever.
            return;
        }

        let (Some(engine), Some(window)) = (self.engine.as_mut(), self.window.as_ref()) else {
            return;
        };

        if !engine.frame(window) {
            self.clean_lane_exit = true;
            event_loop.exit();
        }
    }

    fn exiting(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(engine) = self.engine.as_mut() {
            engine.cleanup();
        }
    }
}

/// Map winit physical keys onto the engine's key table.
fn translate_key(physical: PhysicalKey) -> Option<Key> {
    let PhysicalKey::Code(code) = physical else {
        return None;
    };

    let key = match code {
        KeyCode::KeyW => Key::W,
        KeyCode::KeyA => Key::A,
        KeyCode::KeyS => Key::S,
        KeyCode::KeyD => Key::D,
        KeyCode::KeyQ => Key::Q,
        KeyCode::KeyE => Key::E,
        KeyCode::ArrowUp => Key::Up,
        KeyCode::ArrowDown => Key::Down,
        KeyCode::ArrowLeft => Key::Left,
        KeyCode::ArrowRight => Key::Right,
        KeyCode::Space => Key::Space,
        KeyCode::ShiftLeft | KeyCode::ShiftRight => Key::Shift,
        KeyCode::Escape => Key::Escape,
        _ => return None,
    };
    Some(key)
}

fn main() {
    pretty_env_logger::init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let opts = cli::parse(&args);

    // Headless runs single-threaded; the windowed loop spins up the full
    // lane set with this thread as lane 0.
    if opts.headless {
        lanes::init(1);
    } else {
        lanes::init(lanes::MAX_LANES);
    }

    let event_loop = match EventLoop::new() {
        Ok(event_loop) => event_loop,
        Err(e) => {
            log::error!("event loop creation failed: {}", e);
            std::process::exit(1);
        }
    };
    event_loop.set_control_flow(ControlFlow::Poll);

    let mut app = PyreApp::new(opts);
    if let Err(e) = event_loop.run_app(&mut app) {
        log::error!("event loop error: {}", e);
        app.exit_code = 1;
    }

    // If the loop exited without a synced quit (init failure, headless),
    // the workers are still parked at a barrier; run one phase pair with
    // the quit flag raised so they leave, then join.
    if !app.clean_lane_exit && lanes::lane_count() > 1 {
        lanes::request_quit();
        lanes::lane_sync();
        lanes::lane_sync();
    }
    lanes::join();

    if let Some(engine) = app.engine.as_mut() {
        engine.cleanup();
    }

    let code = app.exit_code;
    drop(app);
    std::process::exit(code);
}
