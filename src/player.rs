//! Connection supervisor
//!
//! Runs the control client inside a reconnect loop with exponential
//! backoff (2 s doubling to a 30 s cap, reset on success). On shutdown the
//! audio worker stops first, then the control client, then the sink.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crate::audio::pipeline::StreamEngine;
use crate::audio::sink::Sink;
use crate::config::Config;
use crate::constants::{BACKOFF_INITIAL, BACKOFF_MAX};
use crate::error::{Error, Result};
use crate::protocol::client::SlimprotoClient;
use crate::protocol::discovery;

/// Top-level player: supervises the control session and the pipeline
pub struct Player {
    config: Config,
    sink: Arc<dyn Sink>,
    running: Arc<AtomicBool>,
}

impl Player {
    pub fn new(config: Config, sink: Arc<dyn Sink>) -> Self {
        Self {
            config,
            sink,
            running: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Flag checked by the supervisor loop; flip from a signal handler to
    /// shut down
    pub fn running_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.running)
    }

    /// Run until `running` is cleared. Sink enable failure is fatal and
    /// propagates; connection failures retry with backoff.
    pub fn run(&self) -> Result<()> {
        self.sink.enable(&self.config.sink).map_err(Error::Sink)?;

        let mut backoff = BACKOFF_INITIAL;

        while self.running.load(Ordering::Acquire) {
            let server = match self.resolve_server() {
                Ok(s) => s,
                Err(e) => {
                    tracing::warn!("{}", e);
                    self.sleep_interruptible(backoff);
                    backoff = (backoff * 2).min(BACKOFF_MAX);
                    continue;
                }
            };

            match SlimprotoClient::connect(&server, self.config.port, &self.config) {
                Ok(client) => {
                    backoff = BACKOFF_INITIAL;
                    let client = Arc::new(client);
                    let engine = Arc::new(StreamEngine::new(
                        Arc::clone(&client),
                        Arc::clone(&self.sink),
                        self.config.dsd_enabled,
                    ));

                    let stream_engine = Arc::clone(&engine);
                    client.on_stream(Box::new(move |cmd, http_request| {
                        stream_engine.handle_command(cmd, http_request);
                    }));
                    client.on_volume(Box::new(|gain_left, gain_right| {
                        // Bit-perfect policy: the server's gain is logged by
                        // the client and dropped here
                        let _ = (gain_left, gain_right);
                    }));

                    // Receive loop blocks until disconnect; a shutdown
                    // request unblocks it through the socket
                    let loop_client = Arc::clone(&client);
                    let shutdown_watch = Arc::clone(&self.running);
                    let watcher = thread::Builder::new()
                        .name("shutdown-watch".to_string())
                        .spawn(move || {
                            while shutdown_watch.load(Ordering::Acquire)
                                && loop_client.is_connected()
                            {
                                thread::sleep(Duration::from_millis(100));
                            }
                            loop_client.stop();
                        });

                    client.run();

                    engine.shutdown();
                    client.disconnect();
                    if let Ok(w) = watcher {
                        let _ = w.join();
                    }

                    if !self.running.load(Ordering::Acquire) {
                        break;
                    }
                    tracing::info!("Control session ended; reconnecting");
                }
                Err(e) => {
                    tracing::warn!("Connection failed: {}", e);
                }
            }

            if !self.running.load(Ordering::Acquire) {
                break;
            }
            tracing::info!("Retrying in {:?}", backoff);
            self.sleep_interruptible(backoff);
            backoff = (backoff * 2).min(BACKOFF_MAX);
        }

        // Ordered shutdown: worker already stopped with its session; now
        // the sink
        self.sink.close();
        self.sink.disable();
        tracing::info!("Player stopped");
        Ok(())
    }

    fn resolve_server(&self) -> Result<String> {
        match &self.config.server {
            Some(server) => Ok(server.clone()),
            None => {
                let ip = discovery::discover().map_err(Error::Discovery)?;
                Ok(ip.to_string())
            }
        }
    }

    /// Sleep in short slices so shutdown never waits out a full backoff
    fn sleep_interruptible(&self, total: Duration) {
        let mut remaining = total;
        while remaining > Duration::ZERO && self.running.load(Ordering::Acquire) {
            let slice = remaining.min(Duration::from_millis(100));
            thread::sleep(slice);
            remaining = remaining.saturating_sub(slice);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_to_cap() {
        let mut backoff = BACKOFF_INITIAL;
        let mut observed = Vec::new();
        for _ in 0..7 {
            observed.push(backoff.as_secs());
            backoff = (backoff * 2).min(BACKOFF_MAX);
        }
        assert_eq!(observed, vec![2, 4, 8, 16, 30, 30, 30]);
    }
}
