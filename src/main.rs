//! seqplay demo: loop a short built-in groove to a MIDI port or the console

use anyhow::{anyhow, Result};
use colored::*;
use crossbeam_channel::select;
use seqplay::{
    Destination, MessageCollector, MidiMessage, MidiPortQueue, PlaybackCache, TimedMidiMessage,
    Transport, TransportEvent, TransportSettings,
};
use std::time::{Duration, Instant};

const LOOP_BEATS: f32 = 8.0;

fn main() -> Result<()> {
    env_logger::init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    match args.first().map(String::as_str) {
        Some("devices") => cmd_devices(),
        Some("play") => cmd_play(&args[1..]),
        Some("monitor") => cmd_monitor(&args[1..]),
        _ => {
            print_usage();
            Ok(())
        }
    }
}

fn print_usage() {
    println!("{}", "seqplay".bold());
    println!("  {}                          list MIDI output ports", "devices".green());
    println!(
        "  {} <port> [seconds] [bpm]      loop the demo groove to a port",
        "play".green()
    );
    println!(
        "  {} [seconds] [bpm]          print the demo groove as it plays",
        "monitor".green()
    );
}

fn cmd_devices() -> Result<()> {
    let ports = MidiPortQueue::list_ports()?;
    if ports.is_empty() {
        println!(
            "{}",
            "No MIDI output ports found. Make sure a MIDI device or virtual port is connected."
                .yellow()
        );
    } else {
        println!("{}", "Available MIDI Output Ports:".bold());
        for (i, port) in ports.iter().enumerate() {
            println!("  {}. {}", i + 1, port.cyan());
        }
    }
    Ok(())
}

fn cmd_play(args: &[String]) -> Result<()> {
    let port = args
        .first()
        .ok_or_else(|| anyhow!("Usage: seqplay play <port> [seconds] [bpm]"))?;
    let seconds = parse_arg(args.get(1), 8.0)?;
    let bpm = parse_arg(args.get(2), 120.0)?;

    let output = Destination::new(MidiPortQueue::connect(port)?);
    println!("Connected to MIDI port: {}", output.name().green());

    let transport = Transport::new(
        demo_groove(&output, &output),
        TransportSettings::default().with_bpm(bpm),
    );
    transport.start_playback_looped(0.0, LOOP_BEATS)?;
    std::thread::sleep(Duration::from_secs_f64(seconds));
    transport.stop_playback();

    println!("{}", "Stopped.".dimmed());
    Ok(())
}

fn cmd_monitor(args: &[String]) -> Result<()> {
    let seconds = parse_arg(args.first(), 4.0)?;
    let bpm = parse_arg(args.get(1), 120.0)?;

    let keys = MessageCollector::new_shared("keys");
    let drums = MessageCollector::new_shared("drums");
    let transport = Transport::new(
        demo_groove(
            &Destination::from_arc(keys.clone()),
            &Destination::from_arc(drums.clone()),
        ),
        TransportSettings::default().with_bpm(bpm),
    );

    let events = transport.subscribe();
    let keys_rx = keys.receiver();
    let drums_rx = drums.receiver();

    transport.start_playback_looped(0.0, LOOP_BEATS)?;

    let deadline = Instant::now() + Duration::from_secs_f64(seconds);
    while Instant::now() < deadline {
        select! {
            recv(keys_rx) -> msg => if let Ok(msg) = msg { print_message("keys", &msg) },
            recv(drums_rx) -> msg => if let Ok(msg) = msg { print_message("drums", &msg) },
            recv(events) -> event => if let Ok(event) = event { print_event(&event) },
            default(Duration::from_millis(50)) => {}
        }
    }

    transport.stop_playback();

    // Whatever the stop flushed
    for msg in keys.drain() {
        print_message("keys", &msg);
    }
    for msg in drums.drain() {
        print_message("drums", &msg);
    }
    for event in events.try_iter() {
        print_event(&event);
    }
    Ok(())
}

fn parse_arg(arg: Option<&String>, default: f64) -> Result<f64> {
    match arg {
        Some(value) => value
            .parse()
            .map_err(|_| anyhow!("Expected a number, got '{}'", value)),
        None => Ok(default),
    }
}

fn print_message(track: &str, msg: &TimedMidiMessage) {
    println!(
        "{:>10.3}s  {:<6} {:?}",
        msg.timestamp_secs,
        track.cyan(),
        msg.message
    );
}

fn print_event(event: &TransportEvent) {
    let text = match event {
        TransportEvent::Seek {
            beat,
            current_time_ms,
            total_time_ms,
        } => format!(
            "seek {:.2} ({:.0}/{:.0} ms)",
            beat, current_time_ms, total_time_ms
        ),
        TransportEvent::TempoChanged { ms_per_quarter } => {
            format!("tempo {:.1} BPM", 60_000.0 / ms_per_quarter)
        }
        TransportEvent::Play => "play".to_string(),
        TransportEvent::Stop => "stop".to_string(),
    };
    println!("{:>12}  {}", "transport".dimmed(), text.yellow());
}

/// Two bars: an arpeggiated Cmaj7 on channel 1, kick and hats on channel 10
fn demo_groove(keys: &Destination, drums: &Destination) -> PlaybackCache {
    const ARPEGGIO: [u8; 4] = [60, 64, 67, 71];
    const KICK: u8 = 36;
    const HAT: u8 = 42;

    let eighths = (0..(LOOP_BEATS * 2.0) as usize).map(|i| i as f32 * 0.5);

    let arpeggio = eighths.clone().flat_map(|beat| {
        let key = ARPEGGIO[(beat * 2.0) as usize % ARPEGGIO.len()];
        [
            (beat, MidiMessage::note_on(1, key, 90)),
            (beat + 0.45, MidiMessage::note_off(1, key)),
        ]
    });

    let drum_hits = eighths.flat_map(|beat| {
        let key = if beat.fract() == 0.0 { KICK } else { HAT };
        [
            (beat, MidiMessage::note_on(10, key, 110)),
            (beat + 0.1, MidiMessage::note_off(10, key)),
        ]
    });

    PlaybackCache::builder()
        .add_sequence(keys, arpeggio)
        .add_sequence(drums, drum_hits)
        .build()
}
