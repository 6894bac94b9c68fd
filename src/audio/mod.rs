pub mod collector;
pub mod midi;
pub mod player;
pub mod transport;

pub use collector::MessageCollector;
pub use midi::MidiPortQueue;
pub use player::{Player, PlayerState, RunOutcome, StopHandle};
pub use transport::{Transport, TransportContext, TransportEvent};
