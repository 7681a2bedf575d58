//! Engine configuration.

use std::time::Duration;

/// Configuration shared by every connection of a host.
#[derive(Clone, Debug)]
pub struct Config {
    // Framing
    /// Largest accepted payload of a single frame.
    pub max_frame_size: usize,
    /// Largest accepted reassembled message.
    pub max_message_size: usize,
    /// Reject Text messages that are not valid UTF-8.
    pub check_utf8: bool,

    // Handshake
    /// Largest accepted HTTP upgrade request, headers included.
    pub max_handshake_size: usize,

    // Heartbeat settings
    /// Delay between connection open and the first ping.
    pub initial_ping_delay: Duration,
    /// Delay between a pong and the next ping.
    pub ping_interval: Duration,
    /// Maximum time to wait for a pong after a ping.
    pub pong_timeout: Duration,

    // Host
    /// Initial capacity of each connection's inbound buffer.
    pub read_buffer_size: usize,
    /// Queued outbound bytes above which the host stops reading and stops
    /// taking frames from the responder queue.
    pub max_outbound_size: usize,
    /// Frames a [`Responder`](crate::server::Responder) can queue before
    /// `send` fails with `WouldBlock`.
    pub responder_capacity: usize,
    /// Time allowed for the last flush after a connection closed.
    pub close_timeout: Duration,
    /// Interval of the diagnostics tick.
    pub tick_interval: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_frame_size: 1024 * 1024,        // 1 MiB
            max_message_size: 16 * 1024 * 1024, // 16 MiB
            check_utf8: false,
            max_handshake_size: 8 * 1024,
            initial_ping_delay: Duration::from_secs(10),
            ping_interval: Duration::from_secs(30),
            pong_timeout: Duration::from_secs(30),
            read_buffer_size: 4096,
            max_outbound_size: 4 * 1024 * 1024, // 4 MiB
            responder_capacity: 1024,
            close_timeout: Duration::from_secs(5),
            tick_interval: Duration::from_secs(60),
        }
    }
}

impl Config {
    /// Set the maximum frame payload size.
    #[must_use]
    pub fn max_frame_size(mut self, size: usize) -> Self {
        self.max_frame_size = size;
        self
    }

    /// Set the maximum reassembled message size.
    #[must_use]
    pub fn max_message_size(mut self, size: usize) -> Self {
        self.max_message_size = size;
        self
    }

    /// Enable UTF-8 validation of Text messages.
    #[must_use]
    pub fn check_utf8(mut self, check: bool) -> Self {
        self.check_utf8 = check;
        self
    }

    /// Set the maximum handshake request size.
    #[must_use]
    pub fn max_handshake_size(mut self, size: usize) -> Self {
        self.max_handshake_size = size;
        self
    }

    /// Set the delay before the first ping.
    #[must_use]
    pub fn initial_ping_delay(mut self, delay: Duration) -> Self {
        self.initial_ping_delay = delay;
        self
    }

    /// Set the ping interval.
    #[must_use]
    pub fn ping_interval(mut self, interval: Duration) -> Self {
        self.ping_interval = interval;
        self
    }

    /// Set the pong timeout.
    #[must_use]
    pub fn pong_timeout(mut self, timeout: Duration) -> Self {
        self.pong_timeout = timeout;
        self
    }

    /// Set the initial inbound buffer capacity.
    #[must_use]
    pub fn read_buffer_size(mut self, size: usize) -> Self {
        self.read_buffer_size = size;
        self
    }

    /// Set the outbound high-water mark.
    #[must_use]
    pub fn max_outbound_size(mut self, size: usize) -> Self {
        self.max_outbound_size = size;
        self
    }

    /// Set the responder queue capacity.
    #[must_use]
    pub fn responder_capacity(mut self, capacity: usize) -> Self {
        self.responder_capacity = capacity;
        self
    }

    /// Set the final flush timeout.
    #[must_use]
    pub fn close_timeout(mut self, timeout: Duration) -> Self {
        self.close_timeout = timeout;
        self
    }

    /// Set the diagnostics tick interval.
    #[must_use]
    pub fn tick_interval(mut self, interval: Duration) -> Self {
        self.tick_interval = interval;
        self
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), String> {
        if self.max_frame_size == 0 {
            return Err("Max frame size must be > 0".to_string());
        }
        if self.max_message_size < self.max_frame_size {
            return Err("Max message size must be >= max frame size".to_string());
        }
        if self.max_handshake_size < 16 {
            return Err("Max handshake size must be >= 16".to_string());
        }
        if self.initial_ping_delay.is_zero() {
            return Err("Initial ping delay must be > 0".to_string());
        }
        if self.ping_interval.is_zero() {
            return Err("Ping interval must be > 0".to_string());
        }
        if self.pong_timeout.is_zero() {
            return Err("Pong timeout must be > 0".to_string());
        }
        if self.read_buffer_size == 0 {
            return Err("Read buffer size must be > 0".to_string());
        }
        if self.max_outbound_size == 0 {
            return Err("Max outbound size must be > 0".to_string());
        }
        if self.responder_capacity == 0 {
            return Err("Responder capacity must be > 0".to_string());
        }
        if self.tick_interval.is_zero() {
            return Err("Tick interval must be > 0".to_string());
        }
        Ok(())
    }
}
