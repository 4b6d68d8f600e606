//! standalone session participant
//!
//! Accepts a Network MIDI session and prints the received MIDI bytes.
//! Port and name come from settings.json, overridable on the command line.
use clap::Parser;
use log::LevelFilter;
use simplelog::{ColorChoice, TermLogger, TerminalMode};

use rtpmidi_rust::common::box_error::BoxError;
use rtpmidi_rust::common::config::Config;
use rtpmidi_rust::common::sync_timer::TickClock;
use rtpmidi_rust::session::participant::{
    Participant, DEFAULT_CONTROL_PORT, DEFAULT_SESSION_NAME,
};
use rtpmidi_rust::session::{MidiSink, ThreadRngEntropy};

#[derive(Parser)]
#[command(about = "AppleMIDI session participant")]
struct Args {
    /// control port (data port is control + 1)
    #[arg(short, long)]
    port: Option<u16>,
    /// session name offered to the initiator
    #[arg(short, long)]
    name: Option<String>,
}

struct ConsoleSink;

impl MidiSink for ConsoleSink {
    fn deliver(&mut self, bytes: &[u8]) -> Result<(), BoxError> {
        let dump: Vec<String> = bytes.iter().map(|b| format!("{:02X}", b)).collect();
        println!("midi: {}", dump.join(" "));
        Ok(())
    }
}

fn main() -> Result<(), BoxError> {
    TermLogger::init(
        LevelFilter::Info,
        simplelog::Config::default(),
        TerminalMode::Mixed,
        ColorChoice::Auto,
    )?;

    let mut config = Config::build();
    config.load_from_file()?;
    let port = config.get_u32_value("control_port", DEFAULT_CONTROL_PORT as u32) as u16;
    let name = String::from(config.get_value("session_name", DEFAULT_SESSION_NAME));

    let args = Args::parse();
    let port = args.port.unwrap_or(port);
    let name = args.name.unwrap_or(name);

    let mut participant = Participant::build(
        port,
        &name,
        Box::new(ConsoleSink),
        Box::new(ThreadRngEntropy),
        Box::new(TickClock::new()),
    )?;
    participant.run()
}
