use std::fs;
use std::path::{Path, PathBuf};
use std::thread::{self, JoinHandle};
use std::time::{Duration, SystemTime};

use anyhow::{anyhow, Context, Result};
use crossbeam_channel::{select, tick, unbounded, Receiver, Sender};
use renderer::SourceImage;

#[derive(Debug)]
pub enum SourceEvent {
    Loaded { path: PathBuf, image: SourceImage },
    Failed { path: PathBuf, error: String },
}

/// Decodes the source picture off the event-loop thread and, when watching,
/// re-decodes it whenever the file changes.
pub struct SourceLoader {
    events: Receiver<SourceEvent>,
    shutdown: Option<Sender<()>>,
    join_handle: Option<JoinHandle<()>>,
}

impl SourceLoader {
    /// `notify` runs after every event so the host can wake its event loop.
    pub fn spawn<F>(path: PathBuf, watch: Option<Duration>, notify: F) -> Result<Self>
    where
        F: Fn() + Send + 'static,
    {
        let (event_tx, event_rx) = unbounded();
        let (shutdown_tx, shutdown_rx) = unbounded();
        let handle = thread::Builder::new()
            .name("seeright-loader".into())
            .spawn(move || run_loader(path, watch, event_tx, shutdown_rx, notify))
            .map_err(|err| anyhow!("failed to spawn loader thread: {err}"))?;

        Ok(Self {
            events: event_rx,
            shutdown: Some(shutdown_tx),
            join_handle: Some(handle),
        })
    }

    pub fn try_iter(&self) -> impl Iterator<Item = SourceEvent> + '_ {
        self.events.try_iter()
    }

    #[cfg(test)]
    fn recv_timeout(&self, timeout: Duration) -> Option<SourceEvent> {
        self.events.recv_timeout(timeout).ok()
    }
}

impl Drop for SourceLoader {
    fn drop(&mut self) {
        self.shutdown.take();
        if let Some(handle) = self.join_handle.take() {
            let _ = handle.join();
        }
    }
}

pub fn load_source(path: &Path) -> Result<SourceImage> {
    let image = image::open(path)
        .with_context(|| format!("failed to decode image at {}", path.display()))?;
    Ok(SourceImage::new(image))
}

type Stamp = Option<(SystemTime, u64)>;

fn file_stamp(path: &Path) -> Stamp {
    let metadata = fs::metadata(path).ok()?;
    Some((metadata.modified().ok()?, metadata.len()))
}

fn run_loader<F>(
    path: PathBuf,
    watch: Option<Duration>,
    events: Sender<SourceEvent>,
    shutdown: Receiver<()>,
    notify: F,
) where
    F: Fn(),
{
    let send = |event: SourceEvent| {
        if events.send(event).is_ok() {
            notify();
        }
    };

    let mut last_stamp = file_stamp(&path);
    send(decode(&path));

    let Some(interval) = watch else {
        return;
    };
    tracing::debug!(path = %path.display(), ?interval, "watching source image");

    let ticker = tick(interval);
    loop {
        select! {
            recv(shutdown) -> _ => break,
            recv(ticker) -> _ => {
                let stamp = file_stamp(&path);
                if stamp.is_some() && stamp != last_stamp {
                    last_stamp = stamp;
                    tracing::debug!(path = %path.display(), "source image changed on disk");
                    send(decode(&path));
                }
            }
        }
    }
}

fn decode(path: &Path) -> SourceEvent {
    match load_source(path) {
        Ok(image) => SourceEvent::Loaded {
            path: path.to_path_buf(),
            image,
        },
        Err(err) => SourceEvent::Failed {
            path: path.to_path_buf(),
            error: format!("{err:#}"),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgba, RgbaImage};
    use std::fs::File;
    use tempfile::TempDir;

    const WAIT: Duration = Duration::from_secs(5);

    fn write_png(path: &Path, width: u32, height: u32) {
        RgbaImage::from_pixel(width, height, Rgba([200, 10, 10, 255]))
            .save(path)
            .unwrap();
    }

    #[test]
    fn load_source_decodes_png() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("chart.png");
        write_png(&path, 5, 3);

        let source = load_source(&path).unwrap();
        assert_eq!((source.width(), source.height()), (5, 3));
    }

    #[test]
    fn loader_reports_missing_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("missing.png");
        let loader = SourceLoader::spawn(path.clone(), None, || {}).unwrap();

        match loader.recv_timeout(WAIT) {
            Some(SourceEvent::Failed { path: failed, error }) => {
                assert_eq!(failed, path);
                assert!(error.contains("missing.png"));
            }
            other => panic!("expected failure, got {other:?}"),
        }
    }

    #[test]
    fn watched_file_is_reloaded_after_change() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("chart.png");
        write_png(&path, 4, 4);

        let loader =
            SourceLoader::spawn(path.clone(), Some(Duration::from_millis(20)), || {}).unwrap();
        match loader.recv_timeout(WAIT) {
            Some(SourceEvent::Loaded { image, .. }) => assert_eq!(image.width(), 4),
            other => panic!("expected initial load, got {other:?}"),
        }

        write_png(&path, 8, 2);
        File::options()
            .write(true)
            .open(&path)
            .unwrap()
            .set_modified(SystemTime::now() + Duration::from_secs(60))
            .unwrap();

        match loader.recv_timeout(WAIT) {
            Some(SourceEvent::Loaded { image, .. }) => {
                assert_eq!((image.width(), image.height()), (8, 2));
            }
            other => panic!("expected reload, got {other:?}"),
        }
    }
}
