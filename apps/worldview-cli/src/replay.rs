//! Feeding a captured session through a viewer.

use std::fs::File;
use std::io::BufReader;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context;
use glam::{DVec3, Vec3};
use serde::Serialize;
use worldview_client::{Viewer, ViewerConfig, ViewerStats};
use worldview_protocol::CaptureReader;
use worldview_registry::RegistrySummary;
use worldview_render::RecordingSink;

use crate::source::DirSource;

/// Camera eye height above the path.
const EYE_HEIGHT: f64 = 1.8;

#[derive(Debug, Clone)]
pub struct ReplayOptions {
    pub capture: PathBuf,
    pub resources: PathBuf,
    /// Frames run after each delivery.
    pub frames_per_chunk: usize,
    /// Camera travel along +x per frame while the capture plays.
    pub speed: f64,
    /// Upper bound on frames spent waiting for loads once the capture ends.
    pub settle_frames: usize,
}

#[derive(Debug, Serialize)]
pub struct ReplayReport {
    pub chunks: usize,
    pub bytes_received: usize,
    pub bytes_sent: usize,
    pub settled: bool,
    pub registry: RegistrySummary,
    pub viewer: ViewerStats,
    #[serde(skip)]
    pub scene: String,
}

struct Session {
    viewer: Viewer<RecordingSink>,
    camera: DVec3,
    bytes_sent: usize,
}

impl Session {
    fn step(&mut self, travel: f64) -> anyhow::Result<()> {
        self.camera.x += travel;
        self.viewer.set_camera(self.camera, Vec3::ZERO);
        self.viewer.frame(Instant::now())?;
        self.flush();
        Ok(())
    }

    /// Stand-in for the transport: count what would have been sent.
    fn flush(&mut self) {
        self.bytes_sent += self
            .viewer
            .take_outbound()
            .iter()
            .map(Vec::len)
            .sum::<usize>();
    }
}

pub fn replay(config: ViewerConfig, opts: &ReplayOptions) -> anyhow::Result<ReplayReport> {
    let source = Arc::new(DirSource::new(&opts.resources));
    let viewer = Viewer::new(config, source, RecordingSink::new())?;
    let mut session = Session {
        viewer,
        camera: DVec3::new(0.0, 0.0, EYE_HEIGHT),
        bytes_sent: 0,
    };
    session.viewer.set_camera(session.camera, Vec3::ZERO);
    session.viewer.connect();
    session.flush();

    let file = File::open(&opts.capture)
        .with_context(|| format!("failed to open capture {}", opts.capture.display()))?;
    let mut reader = CaptureReader::new(BufReader::new(file))
        .with_context(|| format!("reading {}", opts.capture.display()))?;

    let mut chunks = 0;
    let mut bytes_received = 0;
    while let Some(data) = reader.next_chunk()? {
        chunks += 1;
        bytes_received += data.len();
        let decoded = session
            .viewer
            .on_transport_data(&data)
            .with_context(|| format!("decoding delivery {chunks}"))?;
        tracing::debug!(chunk = chunks, decoded, "delivered");
        for _ in 0..opts.frames_per_chunk {
            session.step(opts.speed)?;
        }
    }

    let mut settled = session.viewer.is_idle();
    for _ in 0..opts.settle_frames {
        if settled {
            break;
        }
        std::thread::sleep(Duration::from_millis(1));
        session.step(0.0)?;
        settled = session.viewer.is_idle();
    }
    if !settled {
        tracing::warn!(
            pipeline = ?session.viewer.pipeline_stats(),
            "loads still pending after settle frames"
        );
    }

    Ok(ReplayReport {
        chunks,
        bytes_received,
        bytes_sent: session.bytes_sent,
        settled,
        registry: session.viewer.registry().summary(),
        viewer: session.viewer.stats(),
        scene: session.viewer.sink().describe(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::synth::{SynthOptions, synthesize};

    #[test]
    fn synthesized_session_replays_and_settles() {
        let dir = tempfile::tempdir().unwrap();
        let summary = synthesize(
            dir.path(),
            &SynthOptions {
                objects: 120,
                models: 4,
                avatars: 2,
                ..SynthOptions::default()
            },
        )
        .unwrap();

        let mut config = ViewerConfig::default();
        config.download.fetch_threads = 2;
        config.build.workers = 1;
        let report = replay(
            config,
            &ReplayOptions {
                capture: summary.capture,
                resources: summary.resources,
                frames_per_chunk: 2,
                speed: 0.0,
                settle_frames: 5000,
            },
        )
        .unwrap();

        assert!(report.settled);
        assert_eq!(report.chunks, summary.chunks);
        assert_eq!(report.registry.objects, summary.final_objects);
        assert_eq!(report.registry.avatars, 3);
        assert_eq!(report.registry.parcels, 1);
        assert_eq!(report.viewer.lifecycle_errors, 0);
        assert_eq!(report.viewer.load_failures, 0);
        assert!(report.viewer.meshes_cached > 0);
        assert!(report.viewer.textures_cached > 0);
        assert!(report.bytes_sent > 0);
        assert!(report.scene.contains("attached"));
    }
}
