use eframe::egui;
use std::sync::Arc;
use tokio::sync::mpsc;

use nox_player::core::{PlayerConfig, Result};
use nox_player::playback::{event_channel, PlaybackSession, PlaybackState, PlayerEvent};
use nox_player::video::FrameSlot;

pub struct PlayerApp {
    session: Arc<PlaybackSession>,
    events: mpsc::UnboundedReceiver<PlayerEvent>,
    frames: Arc<FrameSlot>,
    texture: Option<egui::TextureHandle>,
    frame_size: [usize; 2],
    source: String,
    duration: f64,
    seek_position: f64,
    seeking: bool,
    volume: f32,
    state: PlaybackState,
    status_message: String,
}

impl PlayerApp {
    pub fn new(cc: &eframe::CreationContext<'_>, config: PlayerConfig, source: String, start: f64) -> Self {
        cc.egui_ctx.set_visuals(egui::Visuals::dark());

        let repaint_ctx = cc.egui_ctx.clone();
        let frames = Arc::new(FrameSlot::with_waker(move || repaint_ctx.request_repaint()));
        let (event_sink, events) = event_channel();
        let volume = config.volume;
        let session = Arc::new(PlaybackSession::new(config, event_sink, frames.clone()));

        let app = Self {
            session,
            events,
            frames,
            texture: None,
            frame_size: [0, 0],
            source: source.clone(),
            duration: 0.0,
            seek_position: start,
            seeking: false,
            volume,
            state: PlaybackState::Idle,
            status_message: format!("Opening {}", source),
        };

        app.run_in_background("play", move |session| session.play_from(&source, start));
        app
    }

    /// Session operations can block for seconds (resolution, teardown), so they never run on the UI thread.
    fn run_in_background<F>(&self, name: &'static str, op: F)
    where
        F: FnOnce(&PlaybackSession) -> Result<()> + Send + 'static,
    {
        let session = self.session.clone();
        let spawned = std::thread::Builder::new()
            .name(format!("nox-ui-{}", name))
            .spawn(move || {
                if let Err(e) = op(&session) {
                    log::warn!("{} failed: {}", name, e);
                }
            });
        if let Err(e) = spawned {
            log::error!("Failed to start {} operation: {}", name, e);
        }
    }

    fn process_events(&mut self) {
        while let Ok(event) = self.events.try_recv() {
            match event {
                PlayerEvent::DurationFound(duration) => {
                    self.duration = duration;
                    self.status_message.clear();
                }
                PlayerEvent::TimeUpdate(time) => {
                    if !self.seeking {
                        self.seek_position = time;
                    }
                }
                PlayerEvent::StateChanged(state) => {
                    self.state = state;
                    if state == PlaybackState::Starting {
                        self.status_message = "Loading...".to_string();
                    } else if state == PlaybackState::Playing {
                        self.status_message.clear();
                    }
                }
                PlayerEvent::Error(message) => {
                    log::error!("Playback error: {}", message);
                    self.status_message = message;
                }
                PlayerEvent::EndOfStream => {
                    self.status_message = "Finished".to_string();
                }
            }
        }
    }

    fn upload_latest_frame(&mut self, ctx: &egui::Context) {
        let frame = match self.frames.take() {
            Some(frame) => frame,
            None => return,
        };

        if !self.seeking {
            self.seek_position = frame.presentation_time;
        }

        let size = [frame.width as usize, frame.height as usize];
        let image = egui::ColorImage::from_rgba_unmultiplied(size, &frame.to_rgba());
        if self.frame_size == size {
            if let Some(texture) = &mut self.texture {
                texture.set(image, egui::TextureOptions::LINEAR);
                return;
            }
        }
        self.texture = Some(ctx.load_texture("video_frame", image, egui::TextureOptions::LINEAR));
        self.frame_size = size;
    }

    fn toggle_pause(&self) {
        match self.state {
            PlaybackState::Playing => self.run_in_background("pause", |session| session.pause()),
            PlaybackState::Paused => self.run_in_background("resume", |session| session.resume()),
            PlaybackState::Stopped | PlaybackState::Error => {
                let source = self.source.clone();
                self.run_in_background("play", move |session| session.play(&source));
            }
            PlaybackState::Idle | PlaybackState::Starting => {}
        }
    }

    fn show_controls(&mut self, ui: &mut egui::Ui) {
        ui.horizontal(|ui| {
            let label = if self.state == PlaybackState::Playing { "⏸" } else { "▶" };
            if ui.button(label).clicked() {
                self.toggle_pause();
            }
            if ui.button("⏹").clicked() {
                self.run_in_background("stop", |session| {
                    session.stop();
                    Ok(())
                });
            }

            ui.label(format!("{} / {}", format_time(self.seek_position), format_time(self.duration)));

            let max = if self.duration > 0.0 { self.duration } else { self.seek_position.max(1.0) };
            let slider_width = (ui.available_width() - 160.0).max(80.0);
            ui.spacing_mut().slider_width = slider_width;
            let response = ui.add(
                egui::Slider::new(&mut self.seek_position, 0.0..=max)
                    .show_value(false),
            );
            if response.drag_started() {
                self.seeking = true;
            }
            if response.drag_stopped() || (response.changed() && !response.dragged()) {
                self.seeking = false;
                let target = self.seek_position;
                self.run_in_background("seek", move |session| session.seek(target));
            }

            ui.label("🔊");
            ui.spacing_mut().slider_width = 80.0;
            if ui.add(egui::Slider::new(&mut self.volume, 0.0..=1.0).show_value(false)).changed() {
                // only touches the gain lock, safe on the UI thread
                self.volume = self.session.set_volume(self.volume);
            }
        });

        if !self.status_message.is_empty() {
            ui.label(&self.status_message);
        }
    }

    fn show_video(&self, ui: &mut egui::Ui) {
        let available = ui.available_rect_before_wrap();
        ui.painter().rect_filled(available, 0.0, egui::Color32::BLACK);

        if let Some(texture) = &self.texture {
            let rect = letterbox(available, self.frame_size);
            let uv = egui::Rect::from_min_max(egui::pos2(0.0, 0.0), egui::pos2(1.0, 1.0));
            ui.painter().image(texture.id(), rect, uv, egui::Color32::WHITE);
        } else if self.state == PlaybackState::Starting || self.state == PlaybackState::Idle {
            ui.centered_and_justified(|ui| {
                ui.spinner();
            });
        }
    }
}

impl eframe::App for PlayerApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        self.process_events();
        self.upload_latest_frame(ctx);

        if ctx.input(|i| i.key_pressed(egui::Key::Space)) {
            self.toggle_pause();
        }

        egui::TopBottomPanel::bottom("controls").show(ctx, |ui| {
            self.show_controls(ui);
        });

        egui::CentralPanel::default()
            .frame(egui::Frame::none())
            .show(ctx, |ui| {
                self.show_video(ui);
            });

        // frames wake the UI themselves; this keeps the clock label moving while paused or loading
        ctx.request_repaint_after(std::time::Duration::from_millis(250));
    }

    fn on_exit(&mut self, _gl: Option<&eframe::glow::Context>) {
        log::info!("Window closing, stopping playback");
        self.session.stop();
    }
}

/// Largest rect with the frame's aspect ratio centered inside `area`.
pub fn letterbox(area: egui::Rect, frame_size: [usize; 2]) -> egui::Rect {
    let [width, height] = frame_size;
    if width == 0 || height == 0 || area.width() <= 0.0 || area.height() <= 0.0 {
        return area;
    }
    let scale = (area.width() / width as f32).min(area.height() / height as f32);
    let size = egui::vec2(width as f32 * scale, height as f32 * scale);
    egui::Rect::from_center_size(area.center(), size)
}

pub fn format_time(seconds: f64) -> String {
    let total = if seconds.is_finite() && seconds > 0.0 { seconds as u64 } else { 0 };
    let (hours, mins, secs) = (total / 3600, (total % 3600) / 60, total % 60);
    if hours > 0 {
        format!("{}:{:02}:{:02}", hours, mins, secs)
    } else {
        format!("{}:{:02}", mins, secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_time() {
        assert_eq!(format_time(0.0), "0:00");
        assert_eq!(format_time(59.9), "0:59");
        assert_eq!(format_time(125.0), "2:05");
        assert_eq!(format_time(3725.0), "1:02:05");
        assert_eq!(format_time(-4.0), "0:00");
        assert_eq!(format_time(f64::NAN), "0:00");
    }

    #[test]
    fn test_letterbox_keeps_aspect_ratio() {
        let area = egui::Rect::from_min_size(egui::pos2(0.0, 0.0), egui::vec2(1000.0, 1000.0));
        let rect = letterbox(area, [1280, 720]);
        assert_eq!(rect.width(), 1000.0);
        assert!((rect.height() - 562.5).abs() < 1e-3);
        assert_eq!(rect.center(), area.center());

        let tall = letterbox(area, [720, 1280]);
        assert_eq!(tall.height(), 1000.0);
        assert!((tall.width() - 562.5).abs() < 1e-3);

        assert_eq!(letterbox(area, [0, 0]), area);
    }
}
