//! PUSpecial main entry point
//!
//! Loads the configuration, then hosts the command interpreter over UDP.

use std::env;
use std::process;
use std::sync::mpsc;

use log::{error, info, warn};
use pusspecial_lib::config::constants::DEFAULT_CONFIG_PATH;
use pusspecial_lib::{load_config, CommandInterpreter, Listener, Message, MonotonicClock, Ticker, UdpSink};

fn main() {
    // Initialize logging
    env_logger::init();

    // Get config file path from command line or use default
    let config_path = env::args()
        .nth(1)
        .unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());

    info!("PUSpecial starting, configuration from {}", config_path);

    let (config, stores) = match load_config(&config_path) {
        Ok(config) => config,
        Err(e) => {
            error!("Error loading configuration: {}", e);
            process::exit(1);
        }
    };

    let sink = match UdpSink::new(config.downlink_addr, config.playback_addrs.clone()) {
        Ok(sink) => sink,
        Err(e) => {
            error!("Error opening downlink socket: {}", e);
            process::exit(1);
        }
    };

    let mut ci = match CommandInterpreter::new(config.clone(), stores, sink, MonotonicClock::new()) {
        Ok(ci) => ci,
        Err(e) => {
            error!("Error creating command interpreter: {}", e);
            process::exit(1);
        }
    };

    let (tx, rx) = mpsc::channel();

    let mut listeners = Vec::new();
    match Listener::spawn(config.listen_addr, tx.clone(), Message::Telecommand) {
        Ok(listener) => listeners.push(listener),
        Err(e) => {
            error!("Error listening for telecommands on {}: {}", config.listen_addr, e);
            process::exit(1);
        }
    }
    if let Some(addr) = config.store_listen_addr {
        match Listener::spawn(addr, tx.clone(), Message::Store) {
            Ok(listener) => listeners.push(listener),
            Err(e) => {
                error!("Error listening for packets to store on {}: {}", addr, e);
                process::exit(1);
            }
        }
    }

    let period = config.tick_period();
    info!("Retrieval tick every {:?}", period);
    let ticker = Ticker::start(period, tx.clone());

    let shutdown = tx.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        let _ = shutdown.send(Message::Shutdown);
    }) {
        warn!("Cannot install interrupt handler: {}", e);
    }
    drop(tx);

    ci.run(rx);

    if let Some(ticker) = ticker {
        ticker.stop();
    }
    for mut listener in listeners {
        let received = listener.stop();
        info!("Listener on {} received {} datagrams", listener.local_addr(), received);
    }

    info!("PUSpecial shutdown complete");
}
