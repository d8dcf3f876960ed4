//! Shared constants for protocol, pipeline and sink tuning

use std::time::Duration;

/// Slimproto control port (TCP) and discovery port (UDP)
pub const SLIMPROTO_PORT: u16 = 3483;

/// Default HTTP streaming port on the server
pub const DEFAULT_HTTP_PORT: u16 = 9000;

/// Default player name, also used for MAC derivation
pub const DEFAULT_PLAYER_NAME: &str = "slimplay";

/// Maximum sample rate advertised in HELO capabilities by default
pub const DEFAULT_MAX_SAMPLE_RATE: u32 = 768_000;

/// Cap on HTTP response header size
pub const HTTP_HEADER_LIMIT: usize = 16 * 1024;

/// Receive-buffer size requested for the HTTP streaming socket
pub const HTTP_RECV_BUFFER: usize = 256 * 1024;

/// Readiness timeout for HTTP reads inside the pipeline loop
pub const HTTP_READ_TIMEOUT: Duration = Duration::from_millis(2);

/// How long the pipeline waits for sink space before re-checking
pub const SINK_WAIT_TIMEOUT: Duration = Duration::from_millis(5);

/// Poll interval while the sink is paused
pub const PAUSED_POLL: Duration = Duration::from_millis(100);

/// Deadline for a previous pipeline worker to acknowledge cancellation
pub const WORKER_JOIN_TIMEOUT: Duration = Duration::from_millis(500);

/// Decoded material accumulated before the sink is opened
pub const PREBUFFER_MS: u64 = 500;

/// Maximum PCM frames pushed to the sink per iteration
pub const PCM_PUSH_FRAMES: usize = 1024;

/// Maximum planar DSD bytes pushed to the sink per iteration.
/// Must stay below the free room guaranteed when sink fill <= 0.95.
pub const DSD_PUSH_BYTES: usize = 16 * 1024;

/// Sink fill ratio above which the pipeline stops pushing
pub const SINK_FULL_LEVEL: f32 = 0.95;

/// Decode-cache read-cursor threshold that triggers compaction
pub const CACHE_COMPACT_SAMPLES: usize = 100_000;

/// Upper bound on buffered decoded samples before HTTP reads pause
pub const CACHE_MAX_SAMPLES: usize = 1 << 20;

/// Upper bound on buffered raw DSD bytes before HTTP reads pause
pub const DSD_BUFFER_MAX: usize = 1 << 20;

/// Consumed-input threshold that triggers decoder input compaction
pub const INPUT_COMPACT_BYTES: usize = 32 * 1024;

/// Minimum bytes buffered before the Ogg probe is attempted
pub const OGG_PROBE_MIN_BYTES: usize = 4096;

/// Reconnect backoff bounds for the connection supervisor
pub const BACKOFF_INITIAL: Duration = Duration::from_secs(2);
pub const BACKOFF_MAX: Duration = Duration::from_secs(30);

/// Discovery broadcast retry count and per-try timeout
pub const DISCOVERY_TRIES: u32 = 3;
pub const DISCOVERY_TIMEOUT: Duration = Duration::from_secs(5);

/// Sink ring capacity, expressed as seconds of audio
pub const SINK_BUFFER_SECS: f32 = 2.0;
