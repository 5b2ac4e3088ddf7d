// Copyright (C) 2026 Michael Wilson <mike@mdwn.dev>
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//
//! The process-wide audio context: the backend, the voice pool and the
//! streaming engine. Constructed explicitly once at startup and torn down
//! by an explicit [`AudioContext::shutdown`] call; there is no lazy
//! accessor and no destructor-driven teardown.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crossbeam_channel::Receiver;
use tracing::info;

use crate::backend::VoiceBackend;
use crate::config::RuntimeConfig;
use crate::error::AudioError;
use crate::streaming::{StreamEvent, Streamer};
use crate::voice::VoiceRouter;

pub struct AudioContext {
    router: Arc<VoiceRouter>,
    streamer: Streamer,
    events: Receiver<StreamEvent>,
    shut_down: AtomicBool,
}

impl AudioContext {
    /// Initializes the audio context. The hardware probe happens here,
    /// exactly once: if the backend reports no usable hardware this fails
    /// with `NoAudioHardware` and nothing ever retries it.
    pub fn init(
        backend: Box<dyn VoiceBackend>,
        config: &RuntimeConfig,
    ) -> Result<Arc<AudioContext>, AudioError> {
        if !backend.is_available() {
            return Err(AudioError::NoAudioHardware);
        }

        let capacity = config.voice_capacity.min(backend.max_voices());
        info!(
            backend = %backend,
            voices = capacity,
            "initializing audio context"
        );

        let router = Arc::new(VoiceRouter::new(backend, capacity));
        let (events_tx, events_rx) = crossbeam_channel::unbounded();
        let streamer = Streamer::new(
            router.clone(),
            events_tx,
            config.stream_tick(),
            config.stream_ring,
            config.stream_chunk_frames,
        );
        streamer.spawn();

        Ok(Arc::new(AudioContext {
            router,
            streamer,
            events: events_rx,
            shut_down: AtomicBool::new(false),
        }))
    }

    /// Tears the context down: stops the streaming thread and marks the
    /// context unusable. Idempotent.
    pub fn shutdown(&self) {
        if self
            .shut_down
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return;
        }
        info!("shutting down audio context");
        self.streamer.stop();
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::SeqCst)
    }

    /// The cached count of free voices; refreshed once per engine update.
    pub fn voices_available(&self) -> usize {
        self.router.pool().available_hint()
    }

    pub fn voice_capacity(&self) -> usize {
        self.router.pool().capacity()
    }

    pub(crate) fn router(&self) -> &VoiceRouter {
        &self.router
    }

    pub(crate) fn streamer(&self) -> &Streamer {
        &self.streamer
    }

    /// Completion events queued by the streaming thread since the last
    /// drain. Consumed by the engine pump on the caller thread.
    pub(crate) fn drain_stream_events(&self) -> Vec<StreamEvent> {
        self.events.try_iter().collect()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::backend::mock;

    #[test]
    fn test_init_and_shutdown() {
        let context =
            AudioContext::init(Box::new(mock::Backend::new(8)), &RuntimeConfig::default())
                .unwrap();
        assert!(!context.is_shut_down());
        assert_eq!(context.voice_capacity(), 8);
        assert_eq!(context.voices_available(), 8);

        context.shutdown();
        assert!(context.is_shut_down());
        // Idempotent.
        context.shutdown();
    }

    #[test]
    fn test_unavailable_hardware_fails_once() {
        let result = AudioContext::init(
            Box::new(mock::Backend::unavailable()),
            &RuntimeConfig::default(),
        );
        assert!(matches!(result, Err(AudioError::NoAudioHardware)));
    }

    #[test]
    fn test_capacity_clamped_to_hardware_ceiling() {
        let config = RuntimeConfig {
            voice_capacity: 256,
            ..RuntimeConfig::default()
        };
        let context = AudioContext::init(Box::new(mock::Backend::new(32)), &config).unwrap();
        assert_eq!(context.voice_capacity(), 32);
        context.shutdown();
    }
}
