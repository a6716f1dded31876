//! Voice-activity gate
//!
//! Sessions subject to gating may not be rebroadcast until the classifier
//! has confirmed speech. Until then every Opus packet is queued in its
//! original form while its decoded PCM feeds the classifier in fixed-size
//! batches. On confirmation the queue is drained through the normal
//! talker path; if the sample budget runs out first the session is
//! disconnected and nothing is released.
//!
//! Classifier faults are contained: a failing window counts as "no voice
//! yet" and gating continues until the budget is exhausted.

use std::collections::{HashMap, HashSet, VecDeque};

use bytes::Bytes;
use opus::{Channels, Decoder};

use crate::error::Result;

/// Opaque speech classifier over fixed-size sample windows.
///
/// Implementations carry recurrent state; [`reset`](VoiceClassifier::reset)
/// is called at the start of each gating pass.
pub trait VoiceClassifier: Send {
    fn reset(&mut self);

    /// Whether the window contains speech
    fn process(&mut self, window: &[f32]) -> Result<bool>;
}

/// Gate tuning, straight from the `VAD_SETTINGS` configuration section
#[derive(Debug, Clone)]
pub struct GateConfig {
    pub sample_rate: u32,
    pub window_size_samples: usize,
    /// Samples consumed per gate step
    pub buffer_size: usize,
    /// Samples processed before the gate gives up
    pub gate_sample_size: usize,
    /// Length of the zeroed region at the start of each batch, guarding
    /// against carrier-onset transients fooling the model
    pub start_silence_ms: u32,
}

/// Samples per Opus packet at the gate's decode rate
const FRAME_SIZE: usize = 320;

/// Outcome of feeding one audio packet through the gate
#[derive(Debug, PartialEq)]
pub enum GateVerdict {
    /// Still undecided; the packet was queued and nothing may be sent
    Buffered,
    /// Speech confirmed; rebroadcast these queued packets in order
    Released(Vec<Bytes>),
    /// Budget exhausted without speech; disconnect the session
    Denied,
}

/// Per-session gate state
struct GateState {
    decoder: Decoder,
    pre_voice: VecDeque<Bytes>,
    pcm: Vec<f32>,
    processed: usize,
}

impl GateState {
    fn new(sample_rate: u32) -> Result<Self> {
        let decoder = Decoder::new(sample_rate, Channels::Mono)
            .map_err(|e| crate::error::Error::Classifier(format!("opus decoder: {e}")))?;
        Ok(Self {
            decoder,
            pre_voice: VecDeque::new(),
            pcm: Vec::new(),
            processed: 0,
        })
    }
}

/// All gate state for the server plus the shared classifier
pub struct GateBank {
    cfg: GateConfig,
    callsigns: HashSet<String>,
    classifier: Box<dyn VoiceClassifier>,
    gates: HashMap<u16, GateState>,
}

impl GateBank {
    pub fn new(
        cfg: GateConfig,
        callsigns: HashSet<String>,
        classifier: Box<dyn VoiceClassifier>,
    ) -> Self {
        Self {
            cfg,
            callsigns,
            classifier,
            gates: HashMap::new(),
        }
    }

    /// Whether audio from this callsign passes through the gate at all
    pub fn applies_to(&self, callsign: &str) -> bool {
        self.callsigns.contains(callsign)
    }

    /// Drop all gate state for a session. Called on talker transitions
    /// and on disconnect.
    pub fn reset(&mut self, client_id: u16) {
        self.gates.remove(&client_id);
    }

    /// Feed one Opus packet for an undecided session
    pub fn ingest(&mut self, client_id: u16, payload: Bytes) -> Result<GateVerdict> {
        let max_queued = (self.cfg.gate_sample_size / FRAME_SIZE).max(1);
        let gate = match self.gates.entry(client_id) {
            std::collections::hash_map::Entry::Occupied(e) => e.into_mut(),
            std::collections::hash_map::Entry::Vacant(e) => {
                e.insert(GateState::new(self.cfg.sample_rate)?)
            }
        };

        gate.pre_voice.push_back(payload.clone());
        if gate.pre_voice.len() > max_queued {
            gate.pre_voice.pop_front();
        }

        let mut decoded = [0i16; FRAME_SIZE * 6];
        let samples = match gate.decoder.decode(&payload, &mut decoded, false) {
            Ok(n) => n,
            Err(e) => {
                tracing::warn!(client_id, error = %e, "dropping undecodable audio packet");
                return Ok(GateVerdict::Buffered);
            }
        };
        gate.pcm
            .extend(decoded[..samples].iter().map(|&s| f32::from(s) / 32768.0));

        let silence_samples =
            (self.cfg.sample_rate as usize * self.cfg.start_silence_ms as usize) / 1000;

        let mut voice = false;
        while gate.pcm.len() >= self.cfg.buffer_size
            && gate.processed < self.cfg.gate_sample_size
            && !voice
        {
            let mut batch: Vec<f32> = gate.pcm[..self.cfg.buffer_size].to_vec();
            let zeroed = silence_samples.min(batch.len());
            batch[..zeroed].fill(0.0);

            voice = Self::classify_batch(
                self.classifier.as_mut(),
                &batch,
                self.cfg.window_size_samples,
            );
            gate.processed += self.cfg.buffer_size;
            gate.pcm.drain(..self.cfg.buffer_size);
        }

        if voice {
            let released = gate.pre_voice.drain(..).collect();
            self.gates.remove(&client_id);
            return Ok(GateVerdict::Released(released));
        }
        if gate.processed >= self.cfg.gate_sample_size {
            self.gates.remove(&client_id);
            return Ok(GateVerdict::Denied);
        }
        Ok(GateVerdict::Buffered)
    }

    fn classify_batch(
        classifier: &mut dyn VoiceClassifier,
        batch: &[f32],
        window_size: usize,
    ) -> bool {
        classifier.reset();
        for window in batch.chunks_exact(window_size) {
            match classifier.process(window) {
                Ok(true) => return true,
                Ok(false) => {}
                Err(e) => {
                    // Fail closed: an unusable classifier result never
                    // opens the gate.
                    tracing::warn!(error = %e, "voice classifier failed on window");
                }
            }
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use opus::{Application, Encoder};

    /// Classifier scripted to report voice starting at a given window index
    struct ScriptedClassifier {
        windows_seen: usize,
        voice_from_window: Option<usize>,
    }

    impl VoiceClassifier for ScriptedClassifier {
        fn reset(&mut self) {}

        fn process(&mut self, _window: &[f32]) -> Result<bool> {
            let idx = self.windows_seen;
            self.windows_seen += 1;
            Ok(self.voice_from_window.is_some_and(|from| idx >= from))
        }
    }

    fn config() -> GateConfig {
        GateConfig {
            sample_rate: 16000,
            window_size_samples: 320,
            buffer_size: 640,
            gate_sample_size: 3200,
            start_silence_ms: 0,
        }
    }

    fn bank(voice_from_window: Option<usize>) -> GateBank {
        GateBank::new(
            config(),
            HashSet::from(["NOISE".to_string()]),
            Box::new(ScriptedClassifier {
                windows_seen: 0,
                voice_from_window,
            }),
        )
    }

    fn opus_packets(count: usize) -> Vec<Bytes> {
        let mut encoder = Encoder::new(16000, Channels::Mono, Application::Voip).unwrap();
        let tone: Vec<i16> = (0..FRAME_SIZE)
            .map(|i| ((i as f32 * 0.2).sin() * 8000.0) as i16)
            .collect();
        (0..count)
            .map(|_| Bytes::from(encoder.encode_vec(&tone, 4000).unwrap()))
            .collect()
    }

    #[test]
    fn applies_only_to_listed_callsigns() {
        let bank = bank(None);
        assert!(bank.applies_to("NOISE"));
        assert!(!bank.applies_to("SM0XYZ"));
    }

    #[test]
    fn voice_releases_all_queued_packets_in_order() {
        let mut bank = bank(Some(0));
        let packets = opus_packets(2);

        // First packet only fills half a batch, so nothing is decided yet
        assert_eq!(
            bank.ingest(7, packets[0].clone()).unwrap(),
            GateVerdict::Buffered
        );

        // Second packet completes the batch and the classifier fires
        match bank.ingest(7, packets[1].clone()).unwrap() {
            GateVerdict::Released(released) => {
                assert_eq!(released, packets);
            }
            other => panic!("expected release, got {other:?}"),
        }
    }

    #[test]
    fn silent_carrier_is_denied_after_budget() {
        let mut bank = bank(None);
        // Budget is 3200 samples = 10 packets of 320
        let packets = opus_packets(12);
        let mut verdicts = Vec::new();
        for packet in &packets {
            let verdict = bank.ingest(7, packet.clone()).unwrap();
            let done = verdict == GateVerdict::Denied;
            verdicts.push(verdict);
            if done {
                break;
            }
        }
        assert_eq!(verdicts.last(), Some(&GateVerdict::Denied));
        assert!(verdicts
            .iter()
            .all(|v| matches!(v, GateVerdict::Buffered | GateVerdict::Denied)));
        // Denial clears the gate
        assert!(bank.gates.is_empty());
    }

    #[test]
    fn reset_discards_progress() {
        let mut bank = bank(None);
        let packets = opus_packets(4);
        for packet in &packets {
            bank.ingest(7, packet.clone()).unwrap();
        }
        assert!(!bank.gates.is_empty());
        bank.reset(7);
        assert!(bank.gates.is_empty());
    }

    #[test]
    fn pre_voice_queue_is_bounded() {
        // A classifier that never fires with a budget the loop cannot
        // reach because each packet only carries 320 samples while the
        // batch needs 640: feed many packets without ever classifying.
        let mut bank = GateBank::new(
            GateConfig {
                buffer_size: 1_000_000,
                ..config()
            },
            HashSet::new(),
            Box::new(ScriptedClassifier {
                windows_seen: 0,
                voice_from_window: None,
            }),
        );
        let packets = opus_packets(1);
        for _ in 0..100 {
            bank.ingest(7, packets[0].clone()).unwrap();
        }
        let max_queued = config().gate_sample_size / FRAME_SIZE;
        assert!(bank.gates[&7].pre_voice.len() <= max_queued);
    }

    #[test]
    fn classifier_error_keeps_gating() {
        struct FailingClassifier;
        impl VoiceClassifier for FailingClassifier {
            fn reset(&mut self) {}
            fn process(&mut self, _window: &[f32]) -> Result<bool> {
                Err(crate::error::Error::Classifier("model exploded".into()))
            }
        }

        let mut bank = GateBank::new(config(), HashSet::new(), Box::new(FailingClassifier));
        let packets = opus_packets(12);
        let mut last = GateVerdict::Buffered;
        for packet in &packets {
            last = bank.ingest(7, packet.clone()).unwrap();
            if last == GateVerdict::Denied {
                break;
            }
        }
        // Fail-closed: errors never release audio, the budget still runs out
        assert_eq!(last, GateVerdict::Denied);
    }
}
