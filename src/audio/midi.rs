//! Hardware/virtual MIDI port as a playback destination
//!
//! The midir connection lives on its own thread; the queue side only pushes
//! messages into a channel, so the playback thread never blocks on the OS
//! MIDI driver.

use anyhow::{anyhow, Result};
use crossbeam_channel::{bounded, unbounded, Receiver, Sender};
use midir::{MidiOutput, MidiOutputConnection};
use seqplay_core::types::midi_message::CC_ALL_NOTES_OFF;
use seqplay_core::types::{MidiMessage, MidiQueue, TimedMidiMessage};
use std::thread::{self, JoinHandle};
use std::time::Duration;

const CLIENT_NAME: &str = "seqplay";
const LIST_ATTEMPTS: usize = 3;
const LIST_RETRY_DELAY: Duration = Duration::from_millis(100);

/// Commands for the port thread
#[derive(Debug)]
enum PortCommand {
    Send(TimedMidiMessage),
    Shutdown,
}

/// Owns the midir connection on the port thread
struct PortOutput {
    connection: MidiOutputConnection,
    port_name: String,
}

impl PortOutput {
    /// Connect to the first port whose name contains `port_name`
    fn connect(port_name: &str) -> Result<Self> {
        let midi_out = MidiOutput::new(CLIENT_NAME)?;
        let ports = midi_out.ports();

        let port = ports
            .iter()
            .find(|p| {
                midi_out
                    .port_name(p)
                    .map(|name| name.contains(port_name))
                    .unwrap_or(false)
            })
            .ok_or_else(|| anyhow!("MIDI port '{}' not found", port_name))?;

        let actual_name = midi_out.port_name(port)?;
        let connection = midi_out
            .connect(port, "seqplay-out")
            .map_err(|e| anyhow!("{}", e))?;

        Ok(Self {
            connection,
            port_name: actual_name,
        })
    }

    fn run(&mut self, command_rx: Receiver<PortCommand>) {
        while let Ok(cmd) = command_rx.recv() {
            match cmd {
                PortCommand::Send(timed) => {
                    // Tempo meta events have no wire form
                    let Some(bytes) = timed.message.to_bytes() else {
                        continue;
                    };
                    if let Err(e) = self.connection.send(&bytes) {
                        log::warn!(target: "midi", "send to '{}' failed: {}", self.port_name, e);
                    }
                }
                PortCommand::Shutdown => {
                    // All Notes Off on every channel before closing
                    for channel in 1..=16u8 {
                        if let Some(bytes) =
                            MidiMessage::control_change(channel, CC_ALL_NOTES_OFF, 0).to_bytes()
                        {
                            let _ = self.connection.send(&bytes);
                        }
                    }
                    break;
                }
            }
        }
    }
}

/// A MIDI output port usable as a [`Destination`](seqplay_core::Destination)
pub struct MidiPortQueue {
    port_name: String,
    command_tx: Sender<PortCommand>,
    thread: Option<JoinHandle<()>>,
}

impl MidiPortQueue {
    /// Connect to an output port by name (partial match supported)
    pub fn connect(port_name: &str) -> Result<Self> {
        let (command_tx, command_rx) = unbounded();
        let (ready_tx, ready_rx) = bounded::<std::result::Result<String, String>>(1);
        let wanted = port_name.to_string();

        let thread = thread::Builder::new()
            .name("seqplay-midi-out".to_string())
            .spawn(move || match PortOutput::connect(&wanted) {
                Ok(mut output) => {
                    let _ = ready_tx.send(Ok(output.port_name.clone()));
                    output.run(command_rx);
                }
                Err(e) => {
                    let _ = ready_tx.send(Err(e.to_string()));
                }
            })?;

        let connected = ready_rx
            .recv()
            .map_err(|e| anyhow!("MIDI output thread exited early: {}", e))?;

        match connected {
            Ok(actual_name) => {
                log::debug!(target: "midi", "connected to '{}'", actual_name);
                Ok(Self {
                    port_name: actual_name,
                    command_tx,
                    thread: Some(thread),
                })
            }
            Err(e) => {
                let _ = thread.join();
                Err(anyhow!(e))
            }
        }
    }

    /// Names of the output ports the backend currently exposes, for
    /// picking a `connect` target. Opening the client right after another
    /// one was closed can fail, so a few attempts are made.
    pub fn list_ports() -> Result<Vec<String>> {
        let mut last_err = None;
        for attempt in 0..LIST_ATTEMPTS {
            if attempt > 0 {
                thread::sleep(LIST_RETRY_DELAY);
            }
            match MidiOutput::new(CLIENT_NAME) {
                Ok(midi_out) => {
                    return Ok(midi_out
                        .ports()
                        .iter()
                        .filter_map(|p| midi_out.port_name(p).ok())
                        .collect());
                }
                Err(e) => {
                    log::debug!(target: "midi", "port listing attempt {} failed: {}", attempt + 1, e);
                    last_err = Some(e);
                }
            }
        }
        Err(anyhow!(
            "could not open a MIDI client to list ports ({} attempts): {:?}",
            LIST_ATTEMPTS,
            last_err
        ))
    }

    pub fn port_name(&self) -> &str {
        &self.port_name
    }
}

impl MidiQueue for MidiPortQueue {
    fn add_message_to_queue(&self, message: TimedMidiMessage) {
        if self.command_tx.send(PortCommand::Send(message)).is_err() {
            log::warn!(target: "midi", "port thread for '{}' is gone", self.port_name);
        }
    }

    fn name(&self) -> &str {
        &self.port_name
    }
}

impl Drop for MidiPortQueue {
    fn drop(&mut self) {
        let _ = self.command_tx.send(PortCommand::Shutdown);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}
