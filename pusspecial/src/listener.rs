//! UDP listener threads
//!
//! A listener receives datagrams on one socket and posts each one to the
//! command interpreter's queue. It never interprets the bytes.

use std::io::ErrorKind;
use std::net::{SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Sender;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use log::{debug, error, info};
use puslibgs::PusResult;

use crate::ci::Message;
use crate::config::constants::{LISTEN_POLL_INTERVAL, MAX_PACKET_SIZE};

/// Listener thread state
pub struct Listener {
    local_addr: SocketAddr,
    running: Arc<AtomicBool>,
    thread_handle: Option<JoinHandle<u64>>,
}

impl Listener {
    /// Bind `addr` and start posting datagrams, each wrapped by `wrap`
    pub fn spawn(addr: SocketAddr, tx: Sender<Message>, wrap: fn(Vec<u8>) -> Message) -> PusResult<Self> {
        let socket = UdpSocket::bind(addr)?;
        socket.set_read_timeout(Some(LISTEN_POLL_INTERVAL))?;
        let local_addr = socket.local_addr()?;
        info!("Listening on {}", local_addr);

        let running = Arc::new(AtomicBool::new(true));
        let thread_running = running.clone();

        let handle = thread::spawn(move || {
            let mut received = 0u64;
            let mut buffer = vec![0u8; MAX_PACKET_SIZE];

            while thread_running.load(Ordering::SeqCst) {
                match socket.recv_from(&mut buffer) {
                    Ok((size, from)) => {
                        debug!("{} bytes from {}", size, from);
                        received += 1;
                        if tx.send(wrap(buffer[..size].to_vec())).is_err() {
                            break;
                        }
                    }
                    Err(ref e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {
                        continue;
                    }
                    Err(e) => {
                        error!("Receive on {} failed: {}", local_addr, e);
                        break;
                    }
                }
            }

            received
        });

        Ok(Self {
            local_addr,
            running,
            thread_handle: Some(handle),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stop the thread and return the number of datagrams it received
    pub fn stop(&mut self) -> u64 {
        self.running.store(false, Ordering::SeqCst);
        self.thread_handle
            .take()
            .and_then(|handle| handle.join().ok())
            .unwrap_or(0)
    }
}

impl Drop for Listener {
    fn drop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
    }
}
