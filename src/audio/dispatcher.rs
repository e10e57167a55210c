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

//! Drives every engine once per host render callback.
//!
//! Each callback first drains queued MIDI into the engines, then renders
//! engine `i` into bus `i`, converting from the native 32 kHz 16-bit stereo
//! to the host format. Nothing here blocks; failures silence the bus.

use crossbeam_channel::{Sender, TrySendError};
use tracing::{debug, info, warn};

use super::{
    BusOutput, FormatConverter, NativeProducer, RenderBuffer, RenderError, TargetFormat,
};
use crate::engine::{Engine, EngineSet};
use crate::midi::{EngineEvent, EventReceiver};
use crate::timbre::{self, ReplyMessage, TimbreAddress};

/// Outcome of a render callback. Every variant leaves valid output in every bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderStatus {
    /// Every bus with an engine rendered.
    Rendered,
    /// No engines are loaded; every bus is silent.
    Silence,
    /// Some buses failed and were silenced.
    Degraded { failed_buses: usize },
}

/// One host output bus and the engine that feeds it.
pub struct Bus {
    engine: Option<Box<dyn Engine>>,
    converter: FormatConverter,
    render_buffer: RenderBuffer,
    output: BusOutput,
}

impl Bus {
    pub fn has_engine(&self) -> bool {
        self.engine.is_some()
    }

    pub fn output(&self) -> &BusOutput {
        &self.output
    }
}

/// Renders one bus's engine into its render buffer on demand.
struct BusProducer<'a> {
    engine: &'a mut Box<dyn Engine>,
    buffer: &'a mut RenderBuffer,
    bus: usize,
}

impl NativeProducer for BusProducer<'_> {
    fn produce(&mut self, frames: usize) -> Result<&[i16], RenderError> {
        let samples = self.buffer.prepare(frames, self.bus)?;
        self.engine.render(samples, self.bus);
        Ok(self.buffer.samples())
    }
}

pub struct RenderDispatcher {
    buses: Vec<Bus>,
    format: TargetFormat,
    events: Option<EventReceiver>,
    replies: Option<Sender<ReplyMessage>>,
}

impl RenderDispatcher {
    /// Creates a dispatcher with `bus_count` host buses. Engine `i` feeds bus `i`;
    /// engines without a bus are closed.
    pub fn new(
        engines: EngineSet,
        bus_count: usize,
        format: TargetFormat,
        max_frames: usize,
    ) -> Result<RenderDispatcher, RenderError> {
        let mut engines = engines.into_engines();
        if engines.len() > bus_count {
            warn!(
                engines = engines.len(),
                buses = bus_count,
                "More engines than buses, closing the extra engines."
            );
            engines.truncate(bus_count);
        }

        let mut engines = engines.into_iter();
        let buses = (0..bus_count)
            .map(|_| {
                Ok(Bus {
                    engine: engines.next(),
                    converter: FormatConverter::new(format.clone(), max_frames)?,
                    render_buffer: RenderBuffer::with_capacity(max_frames),
                    output: BusOutput::with_capacity(max_frames, &format),
                })
            })
            .collect::<Result<Vec<Bus>, RenderError>>()?;

        info!(
            buses = buses.len(),
            engines = buses.iter().filter(|bus| bus.has_engine()).count(),
            format = %format,
            "Render dispatcher ready."
        );

        Ok(RenderDispatcher {
            buses,
            format,
            events: None,
            replies: None,
        })
    }

    /// Attaches the queue MIDI input arrives on.
    pub fn with_events(mut self, events: EventReceiver) -> RenderDispatcher {
        self.events = Some(events);
        self
    }

    /// Attaches the queue timbre replies are sent to.
    pub fn with_replies(mut self, replies: Sender<ReplyMessage>) -> RenderDispatcher {
        self.replies = Some(replies);
        self
    }

    /// Drops the reply sender so the reply worker can finish.
    pub fn detach_replies(&mut self) {
        self.replies = None;
    }

    pub fn format(&self) -> &TargetFormat {
        &self.format
    }

    pub fn bus_count(&self) -> usize {
        self.buses.len()
    }

    pub fn engine_count(&self) -> usize {
        self.buses.iter().filter(|bus| bus.has_engine()).count()
    }

    pub fn output(&self, bus: usize) -> Option<&BusOutput> {
        self.buses.get(bus).map(Bus::output)
    }

    pub fn buses(&self) -> &[Bus] {
        &self.buses
    }

    /// The engine timbre queries and state exports are answered from.
    pub fn primary_engine(&self) -> Option<&dyn Engine> {
        self.buses
            .first()
            .and_then(|bus| bus.engine.as_deref())
    }

    pub fn broadcast_short_message(&mut self, message: u32) {
        for engine in self.buses.iter_mut().filter_map(|bus| bus.engine.as_mut()) {
            engine.play_short_message(message);
        }
    }

    pub fn broadcast_sysex(&mut self, sysex: &[u8]) {
        for engine in self.buses.iter_mut().filter_map(|bus| bus.engine.as_mut()) {
            engine.play_sysex(sysex);
        }
    }

    /// Applies every queued MIDI event. Timbre queries are answered from the
    /// primary engine after the events queued before them.
    pub fn drain_events(&mut self) {
        let Some(events) = self.events.take() else {
            return;
        };

        while let Some(event) = events.try_recv() {
            match event {
                EngineEvent::Short(message) => self.broadcast_short_message(message),
                EngineEvent::Sysex(message) => self.broadcast_sysex(message.as_bytes()),
                EngineEvent::TimbreQuery(address) => {
                    answer_query(self.primary_engine(), self.replies.as_ref(), address)
                }
            }
        }
        self.events = Some(events);
    }

    /// Renders `frames` frames into every bus.
    pub fn render(&mut self, frames: usize) -> RenderStatus {
        self.drain_events();

        let RenderDispatcher { buses, format, .. } = self;
        let mut engines = 0;
        let mut failed_buses = 0;

        for (index, bus) in buses.iter_mut().enumerate() {
            if let Err(e) = bus.output.prepare(frames, format, index) {
                warn!(err = %e, bus = index, "Unable to size bus output.");
                failed_buses += 1;
                continue;
            }

            let Some(engine) = bus.engine.as_mut() else {
                continue;
            };
            engines += 1;

            let mut producer = BusProducer {
                engine,
                buffer: &mut bus.render_buffer,
                bus: index,
            };
            if let Err(e) = bus
                .converter
                .convert(&mut producer, bus.output.as_bytes_mut())
            {
                warn!(err = %e, bus = index, "Render failed, silencing bus.");
                bus.output.silence();
                failed_buses += 1;
            }
        }

        if failed_buses > 0 {
            RenderStatus::Degraded { failed_buses }
        } else if engines == 0 {
            RenderStatus::Silence
        } else {
            RenderStatus::Rendered
        }
    }
}

fn answer_query(
    primary: Option<&dyn Engine>,
    replies: Option<&Sender<ReplyMessage>>,
    address: TimbreAddress,
) {
    if address.slot().is_none() {
        warn!(address = %address, "Ignoring query for an unknown timbre address.");
        return;
    }
    let (Some(engine), Some(replies)) = (primary, replies) else {
        debug!(address = %address, "No engine or reply queue, ignoring timbre query.");
        return;
    };

    match replies.try_send(timbre::build_reply(engine, address)) {
        Ok(()) => {}
        Err(TrySendError::Full(_)) => {
            warn!(address = %address, "Reply queue full, dropping timbre reply.")
        }
        Err(TrySendError::Disconnected(_)) => {
            debug!(address = %address, "Reply queue closed.")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::SampleFormat;
    use crate::engine::{mock, EngineSettings};
    use crate::midi::{self, queue, MessageSink, Packet, Reassembler};
    use crate::timbre::{build_reply, TIMBRE_SLOTS};

    fn mock_engines(count: usize) -> EngineSet {
        EngineSet::from_engines(
            (0..count)
                .map(|_| {
                    let engine: Box<dyn Engine> =
                        Box::new(mock::Engine::new(EngineSettings::default()));
                    engine
                })
                .collect(),
        )
    }

    fn native_int16() -> TargetFormat {
        TargetFormat::new(32000, SampleFormat::Int, 16).unwrap()
    }

    #[test]
    fn test_silence_without_engines() {
        let mut dispatcher =
            RenderDispatcher::new(EngineSet::empty(), 2, TargetFormat::float(44100), 512)
                .unwrap();

        assert_eq!(dispatcher.render(128), RenderStatus::Silence);
        for bus in 0..2 {
            let output = dispatcher.output(bus).unwrap();
            assert_eq!(output.len(), 128 * 2 * 4);
            assert!(output.as_bytes().iter().all(|byte| *byte == 0));
        }
    }

    #[test]
    fn test_output_sized_per_format() {
        let format = TargetFormat::new(48000, SampleFormat::Int, 24).unwrap();
        let mut dispatcher = RenderDispatcher::new(mock_engines(1), 1, format, 256).unwrap();
        assert_eq!(dispatcher.render(100), RenderStatus::Rendered);
        assert_eq!(dispatcher.output(0).unwrap().len(), 100 * 2 * 3);
    }

    #[test]
    fn test_bus_without_engine_is_silent() {
        let mut dispatcher = RenderDispatcher::new(mock_engines(1), 3, native_int16(), 256).unwrap();
        assert_eq!(dispatcher.engine_count(), 1);

        // Note on for part 1 (bus 0) and part 2 (bus 1).
        dispatcher.broadcast_short_message(0x00_7F_45_91);
        dispatcher.broadcast_short_message(0x00_7F_45_92);
        assert_eq!(dispatcher.render(256), RenderStatus::Rendered);

        assert!(dispatcher.output(0).unwrap().as_bytes().iter().any(|b| *b != 0));
        for bus in 1..3 {
            assert!(dispatcher
                .output(bus)
                .unwrap()
                .as_bytes()
                .iter()
                .all(|b| *b == 0));
        }
    }

    #[test]
    fn test_extra_engines_closed() {
        let dispatcher = RenderDispatcher::new(mock_engines(4), 2, native_int16(), 64).unwrap();
        assert_eq!(dispatcher.bus_count(), 2);
        assert_eq!(dispatcher.engine_count(), 2);
    }

    #[test]
    fn test_engine_renders_its_own_bus() {
        let mut dispatcher = RenderDispatcher::new(mock_engines(2), 2, native_int16(), 256).unwrap();
        // Part 2 listens on channel 3 and only bus 1 renders it.
        dispatcher.broadcast_short_message(0x00_7F_45_92);
        dispatcher.render(256);

        assert!(dispatcher.output(0).unwrap().as_bytes().iter().all(|b| *b == 0));
        assert!(dispatcher.output(1).unwrap().as_bytes().iter().any(|b| *b != 0));
    }

    #[test]
    fn test_resampled_output() {
        let mut dispatcher =
            RenderDispatcher::new(mock_engines(1), 1, TargetFormat::float(48000), 512).unwrap();
        dispatcher.broadcast_short_message(0x00_7F_45_91);
        for _ in 0..4 {
            assert_eq!(dispatcher.render(512), RenderStatus::Rendered);
        }
        let output = dispatcher.output(0).unwrap();
        assert_eq!(output.len(), 512 * 2 * 4);
        assert!(output.float_samples().any(|sample| sample.abs() > 0.01));
        assert!(output.float_samples().all(|sample| sample.abs() <= 1.0));
    }

    #[test]
    fn test_queued_events_reach_every_engine() {
        let (mut sender, receiver) = queue::channel(16);
        let mut dispatcher = RenderDispatcher::new(mock_engines(3), 3, native_int16(), 128)
            .unwrap()
            .with_events(receiver);

        // DT1 renaming timbre 1.
        let body = [0x04, 0x00, 0x00, b'P', b'i', b'a', b'n', b'o'];
        let checksum = dispatcher.primary_engine().unwrap().checksum(&body, 0);
        let mut dt1 = vec![0xF0, 0x41, 0x10, 0x16, 0x12];
        dt1.extend_from_slice(&body);
        dt1.extend_from_slice(&[checksum, 0xF7]);
        sender.sysex(&dt1);

        dispatcher.render(64);
        assert!(receiver_is_drained(&dispatcher));
        for bus in dispatcher.buses() {
            let mut name = [0u8; 5];
            bus.engine.as_ref().unwrap().read_memory(0x04_00_00, &mut name);
            assert_eq!(&name, b"Piano");
        }
    }

    #[test]
    fn test_events_drained_on_every_render() {
        let (mut sender, receiver) = queue::channel(16);
        let mut dispatcher = RenderDispatcher::new(mock_engines(2), 2, native_int16(), 128)
            .unwrap()
            .with_events(receiver);

        // Note on for part 2, which only bus 1 renders.
        sender.short_message(0x00_7F_45_92);
        dispatcher.render(64);
        assert!(dispatcher.output(1).unwrap().as_bytes().iter().any(|b| *b != 0));

        let body = [0x04, 0x01, 0x76, b'O', b'r', b'g', b'a', b'n'];
        let checksum = dispatcher.primary_engine().unwrap().checksum(&body, 0);
        let mut dt1 = vec![0xF0, 0x41, 0x10, 0x16, 0x12];
        dt1.extend_from_slice(&body);
        dt1.extend_from_slice(&[checksum, 0xF7]);
        sender.sysex(&dt1);

        dispatcher.render(64);
        assert!(receiver_is_drained(&dispatcher));
        assert!(dispatcher.events.is_some());
        for bus in dispatcher.buses() {
            let mut name = [0u8; 5];
            bus.engine.as_ref().unwrap().read_memory(0x04_01_76, &mut name);
            assert_eq!(&name, b"Organ");
        }
    }

    fn receiver_is_drained(dispatcher: &RenderDispatcher) -> bool {
        dispatcher.events.as_ref().map_or(true, |events| events.is_empty())
    }

    #[test]
    fn test_query_answered_from_primary_engine() {
        let (sender, receiver) = queue::channel(16);
        let (reply_tx, reply_rx) = crossbeam_channel::bounded(4);
        let mut dispatcher = RenderDispatcher::new(mock_engines(2), 2, native_int16(), 128)
            .unwrap()
            .with_events(receiver)
            .with_replies(reply_tx);

        let mut intake = midi::Intake::new(sender);
        let query = [0xF0, 0x41, 0x10, 0x16, 0x11, 0x04, 0x03, 0x6C, 0xF7];
        intake.receive_all(&[Packet::new(0, &query[..3]), Packet::new(1, &query[3..])]);

        assert!(reply_rx.try_recv().is_err());
        dispatcher.render(64);

        let reply = reply_rx.try_recv().unwrap();
        let expected = build_reply(
            dispatcher.primary_engine().unwrap(),
            TimbreAddress::new(0x03, 0x6C),
        );
        assert_eq!(reply, expected);
        assert!(reply_rx.try_recv().is_err());
    }

    #[test]
    fn test_unknown_address_ignored() {
        let (mut sender, receiver) = queue::channel(16);
        let (reply_tx, reply_rx) = crossbeam_channel::bounded(4);
        let mut dispatcher = RenderDispatcher::new(mock_engines(1), 1, native_int16(), 128)
            .unwrap()
            .with_events(receiver)
            .with_replies(reply_tx);

        let mut reassembler = Reassembler::new();
        reassembler.intake(
            &[Packet::new(
                0,
                &[0xF0, 0x41, 0x10, 0x16, 0x11, 0x04, 0x00, 0x01, 0xF7],
            )],
            &mut sender,
        );
        dispatcher.render(64);
        assert!(reply_rx.try_recv().is_err());
    }

    #[test]
    fn test_full_reply_queue_does_not_block() {
        let (mut sender, receiver) = queue::channel(16);
        let (reply_tx, reply_rx) = crossbeam_channel::bounded(1);
        let mut dispatcher = RenderDispatcher::new(mock_engines(1), 1, native_int16(), 128)
            .unwrap()
            .with_events(receiver)
            .with_replies(reply_tx);

        for slot in TIMBRE_SLOTS.iter() {
            sender.timbre_query(slot.address);
        }
        assert_eq!(dispatcher.render(64), RenderStatus::Rendered);
        assert_eq!(reply_rx.len(), 1);
        assert_eq!(reply_rx.try_recv().unwrap().address(), TIMBRE_SLOTS[0].address);
    }
}
