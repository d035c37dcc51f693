use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{anyhow, Context, Result};
use renderer::{
    FrameInputs, RendererConfig, RendererHandle, SourceImage, TickOutcome, VsyncMode,
};
use rxconfig::PrescriptionConfig;
use tracing_subscriber::EnvFilter;
use winit::dpi::PhysicalSize;
use winit::event::{ElementState, Event, KeyEvent, WindowEvent};
use winit::event_loop::{ControlFlow, EventLoopBuilder, EventLoopWindowTarget};
use winit::window::{Window, WindowBuilder};

use crate::bindings::{resolve_fps, resolve_prescription, resolve_watch};
use crate::cli::Args;
use crate::controls::{command_for_key, Action, Controls};
use crate::paths::AppPaths;
use crate::source::{SourceEvent, SourceLoader};

#[derive(Debug, Clone, Copy)]
enum HostEvent {
    SourceReady,
}

pub fn run(args: Args) -> Result<()> {
    initialise_tracing();

    let paths = AppPaths::discover()?;
    tracing::debug!(config = %paths.config_dir().display(), "resolved seeright paths");
    let presets = load_presets(&paths, args.config.as_deref())?;
    let resolved = resolve_prescription(&args, presets.as_ref())?;

    let renderer_config = RendererConfig {
        target_size: args.size,
        power: args.power,
        vsync: if args.no_vsync {
            VsyncMode::Off
        } else {
            VsyncMode::On
        },
        target_fps: resolve_fps(&args, presets.as_ref()),
    };
    let watch = resolve_watch(&args, presets.as_ref());
    tracing::info!(
        prescription = %resolved.parameters,
        preset = ?resolved.preset,
        size = %renderer_config.target_size,
        "bootstrapping seeright preview"
    );

    let event_loop = EventLoopBuilder::<HostEvent>::with_user_event()
        .build()
        .map_err(|err| anyhow!("failed to create event loop: {err}"))?;
    let proxy = event_loop.create_proxy();

    let size = renderer_config.target_size;
    let window = WindowBuilder::new()
        .with_title("SeeRight")
        .with_inner_size(PhysicalSize::new(size.width, size.height))
        .with_resizable(false)
        .build(&event_loop)
        .map_err(|err| anyhow!("failed to create preview window: {err}"))?;
    let window = Arc::new(window);

    let loader = match args.image {
        Some(path) => Some(SourceLoader::spawn(path, watch, move || {
            let _ = proxy.send_event(HostEvent::SourceReady);
        })?),
        None => {
            tracing::info!("no --image given; rendering without a source picture");
            None
        }
    };

    let inputs = FrameInputs::new(resolved.parameters);
    let handle = renderer::start(window.clone(), &renderer_config, inputs.clone())
        .context("failed to start renderer")?;
    if handle.adapter_profile().is_software() {
        tracing::warn!(
            adapter = %handle.adapter_profile().name,
            "software rasterizer detected; consider --fps to limit the frame rate"
        );
    }

    let controls = Controls::new(resolved.parameters, presets, resolved.preset.as_deref());
    let mut host = Host {
        window,
        config: renderer_config,
        inputs,
        handle: Some(handle),
        controls,
        loader,
        latest_source: None,
        source_visible: true,
        shift: false,
    };

    event_loop
        .run(move |event, elwt| host.handle_event(event, elwt))
        .map_err(|err| anyhow!("window event loop error: {err}"))
}

fn initialise_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

fn load_presets(paths: &AppPaths, explicit: Option<&Path>) -> Result<Option<PrescriptionConfig>> {
    let Some(path) = paths.resolve_presets(explicit) else {
        tracing::debug!("no prescriptions file found; using built-in defaults");
        return Ok(None);
    };
    let config = PrescriptionConfig::from_path(&path)
        .with_context(|| format!("failed to load prescriptions from {}", path.display()))?;
    tracing::info!(
        path = %path.display(),
        presets = config.presets.len(),
        "loaded prescriptions file"
    );
    Ok(Some(config))
}

struct Host {
    window: Arc<Window>,
    config: RendererConfig,
    inputs: FrameInputs,
    handle: Option<RendererHandle>,
    controls: Controls,
    loader: Option<SourceLoader>,
    latest_source: Option<SourceImage>,
    source_visible: bool,
    shift: bool,
}

impl Host {
    fn handle_event(&mut self, event: Event<HostEvent>, elwt: &EventLoopWindowTarget<HostEvent>) {
        match event {
            Event::UserEvent(HostEvent::SourceReady) => self.drain_sources(),
            Event::WindowEvent { window_id, event } if window_id == self.window.id() => {
                match event {
                    WindowEvent::CloseRequested | WindowEvent::Destroyed => {
                        self.stop_renderer();
                        elwt.exit();
                    }
                    WindowEvent::ModifiersChanged(modifiers) => {
                        self.shift = modifiers.state().shift_key();
                    }
                    WindowEvent::KeyboardInput { event, .. } => self.handle_key(&event, elwt),
                    WindowEvent::ScaleFactorChanged {
                        mut inner_size_writer,
                        ..
                    } => {
                        let size = self.config.target_size;
                        let _ = inner_size_writer
                            .request_inner_size(PhysicalSize::new(size.width, size.height));
                    }
                    WindowEvent::RedrawRequested => self.render_frame(),
                    _ => {}
                }
            }
            Event::AboutToWait => {
                self.drain_sources();
                self.schedule(elwt);
            }
            Event::LoopExiting => self.stop_renderer(),
            _ => {}
        }
    }

    fn handle_key(&mut self, event: &KeyEvent, elwt: &EventLoopWindowTarget<HostEvent>) {
        if event.state != ElementState::Pressed {
            return;
        }
        let Some(command) = command_for_key(&event.logical_key, self.shift) else {
            return;
        };
        if event.repeat && !command.repeats() {
            return;
        }

        match self.controls.apply(command) {
            Action::Publish(parameters) => {
                self.inputs.publish_parameters(parameters);
                tracing::info!(prescription = %parameters, "prescription updated");
                self.window.request_redraw();
            }
            Action::ToggleSource => {
                self.source_visible = !self.source_visible;
                tracing::info!(visible = self.source_visible, "source picture toggled");
                self.publish_source();
            }
            Action::Restart => self.restart_renderer(),
            Action::Quit => {
                self.stop_renderer();
                elwt.exit();
            }
            Action::Ignored => {}
        }
    }

    fn drain_sources(&mut self) {
        let Some(loader) = self.loader.as_ref() else {
            return;
        };
        let events: Vec<SourceEvent> = loader.try_iter().collect();
        for event in events {
            match event {
                SourceEvent::Loaded { path, image } => {
                    tracing::info!(
                        path = %path.display(),
                        width = image.width(),
                        height = image.height(),
                        "source picture loaded"
                    );
                    self.latest_source = Some(image);
                    self.publish_source();
                }
                SourceEvent::Failed { path, error } => {
                    tracing::warn!(
                        path = %path.display(),
                        %error,
                        "failed to load source picture; keeping the previous one"
                    );
                }
            }
        }
    }

    fn publish_source(&self) {
        let source = self
            .latest_source
            .clone()
            .filter(|_| self.source_visible);
        self.inputs.publish_source(source);
        self.window.request_redraw();
    }

    fn render_frame(&mut self) {
        let Some(handle) = self.handle.as_mut() else {
            return;
        };
        let now = Instant::now();
        if !handle.ready_for_frame(now) {
            return;
        }
        if let TickOutcome::Stopped = handle.frame(now) {
            tracing::error!("renderer stopped; press R to restart");
        }
    }

    fn schedule(&self, elwt: &EventLoopWindowTarget<HostEvent>) {
        let Some(handle) = self.handle.as_ref().filter(|handle| handle.is_running()) else {
            tracing::trace!("scheduler: idle (renderer not running)");
            elwt.set_control_flow(ControlFlow::Wait);
            return;
        };

        let now = Instant::now();
        if handle.ready_for_frame(now) {
            tracing::trace!("scheduler: issuing redraw now");
            self.window.request_redraw();
            elwt.set_control_flow(ControlFlow::Wait);
        } else if let Some(deadline) = handle.next_deadline() {
            let ms = deadline.saturating_duration_since(now).as_millis();
            tracing::trace!(deadline_ms = ms, "scheduler: waiting until next frame");
            elwt.set_control_flow(ControlFlow::WaitUntil(deadline));
        } else {
            elwt.set_control_flow(ControlFlow::Wait);
        }
    }

    fn stop_renderer(&mut self) {
        if let Some(mut handle) = self.handle.take() {
            handle.stop();
        }
    }

    fn restart_renderer(&mut self) {
        self.stop_renderer();
        match renderer::start(self.window.clone(), &self.config, self.inputs.clone()) {
            Ok(handle) => {
                tracing::info!("renderer restarted");
                self.handle = Some(handle);
                self.window.request_redraw();
            }
            Err(err) => {
                tracing::error!(error = %err, "failed to restart renderer; press R to retry");
            }
        }
    }
}
