// Shader hot reload
//
// Watches the compiled SPIR-V directory. A change is reported once the
// files have been quiet for SETTLE_TIME, so a rebuild never reads a
// half-written module.

use anyhow::{Context, Result};
use notify::{recommended_watcher, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::PathBuf;
use std::sync::mpsc::{channel, Receiver};
use std::time::{Duration, Instant};

const SETTLE_TIME: Duration = Duration::from_millis(250);

pub fn is_shader_change(event: &Event) -> bool {
    matches!(event.kind, EventKind::Create(_) | EventKind::Modify(_))
        && event
            .paths
            .iter()
            .any(|path| path.extension().is_some_and(|ext| ext == "spv"))
}

/// Collapses a burst of change notifications into one report.
#[derive(Debug, Default)]
struct Debouncer {
    last_change: Option<Instant>,
}

impl Debouncer {
    fn observe(&mut self, changed: bool, now: Instant) -> bool {
        if changed {
            self.last_change = Some(now);
            return false;
        }
        match self.last_change {
            Some(at) if now.duration_since(at) >= SETTLE_TIME => {
                self.last_change = None;
                true
            }
            _ => false,
        }
    }
}

pub struct ShaderWatcher {
    _watcher: RecommendedWatcher,
    events: Receiver<Event>,
    debouncer: Debouncer,
}

impl ShaderWatcher {
    pub fn new(directories: &[PathBuf]) -> Result<Self> {
        let (sender, events) = channel();
        let mut watcher = recommended_watcher(move |result: notify::Result<Event>| match result {
            Ok(event) if is_shader_change(&event) => {
                // Receiver gone means the app is shutting down
                let _ = sender.send(event);
            }
            Ok(_) => {}
            Err(e) => log::warn!("Shader watcher error: {}", e),
        })
        .context("Failed to create shader watcher")?;

        for directory in directories {
            watcher
                .watch(directory, RecursiveMode::NonRecursive)
                .with_context(|| format!("Failed to watch {}", directory.display()))?;
            log::info!("Watching {} for shader changes", directory.display());
        }

        Ok(Self {
            _watcher: watcher,
            events,
            debouncer: Debouncer::default(),
        })
    }

    /// True once per settled burst of shader changes.
    pub fn poll_changed(&mut self) -> bool {
        let mut changed = false;
        while let Ok(event) = self.events.try_recv() {
            log::debug!("Shader changed: {:?}", event.paths);
            changed = true;
        }
        self.debouncer.observe(changed, Instant::now())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{CreateKind, DataChange, ModifyKind, RemoveKind};

    fn event(kind: EventKind, path: &str) -> Event {
        Event::new(kind).add_path(PathBuf::from(path))
    }

    #[test]
    fn test_spirv_modification_counts() {
        let e = event(
            EventKind::Modify(ModifyKind::Data(DataChange::Content)),
            "shaders/mesh.frag.spv",
        );
        assert!(is_shader_change(&e));
        assert!(is_shader_change(&event(EventKind::Create(CreateKind::File), "shaders/mesh.vert.spv")));
    }

    #[test]
    fn test_sources_and_removals_are_ignored() {
        let source = event(EventKind::Modify(ModifyKind::Any), "shaders/mesh.frag");
        assert!(!is_shader_change(&source));
        let removed = event(EventKind::Remove(RemoveKind::File), "shaders/mesh.frag.spv");
        assert!(!is_shader_change(&removed));
    }

    #[test]
    fn test_burst_reports_once_after_settling() {
        let start = Instant::now();
        let mut debouncer = Debouncer::default();

        assert!(!debouncer.observe(true, start));
        assert!(!debouncer.observe(true, start + Duration::from_millis(100)));
        assert!(!debouncer.observe(false, start + Duration::from_millis(200)));
        assert!(debouncer.observe(false, start + Duration::from_millis(400)));
        assert!(!debouncer.observe(false, start + Duration::from_millis(900)));
    }

    #[test]
    fn test_quiet_debouncer_never_reports() {
        let mut debouncer = Debouncer::default();
        assert!(!debouncer.observe(false, Instant::now()));
    }
}
