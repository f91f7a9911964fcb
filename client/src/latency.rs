//! Four-timestamp latency breakdown.
//!
//! Separates network delay from remote processing without synchronized
//! clocks, assuming the uplink and downlink delays are symmetric.

use serde::Serialize;

/// The timing breakdown of one round trip, in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LatencyMetrics {
    /// Clock skew, server minus client.
    pub offset: f64,
    /// Round trip time with the server's processing removed.
    pub rtt: f64,
    /// Time the server spent between receiving and answering.
    pub server_proc_ms: f64,
}

/// Estimates the latency breakdown of a round trip.
///
/// # Arguments
/// * `t0` - Client sent the request (client clock).
/// * `t1` - Server received the request (server clock).
/// * `t2` - Server sent the response (server clock).
/// * `t3` - Client received the response (client clock).
///
/// # Returns
/// The clock offset, the round trip time and the server processing time.
pub fn estimate(t0: f64, t1: f64, t2: f64, t3: f64) -> LatencyMetrics {
    LatencyMetrics {
        offset: ((t1 - t0) + (t2 - t3)) / 2.0,
        rtt: (t3 - t0) - (t2 - t1),
        server_proc_ms: t2 - t1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn textbook_exchange() {
        let metrics = estimate(0.0, 50.0, 60.0, 120.0);

        assert_eq!(metrics.server_proc_ms, 10.0);
        assert_eq!(metrics.rtt, 110.0);
        assert_eq!(metrics.offset, -5.0);
    }

    #[test]
    fn instant_server_has_no_processing_time() {
        let metrics = estimate(10.0, 30.0, 30.0, 50.0);

        assert_eq!(metrics.server_proc_ms, 0.0);
        assert_eq!(metrics.rtt, 40.0);
        assert_eq!(metrics.offset, 0.0);
    }

    #[test]
    fn server_clock_ahead_shows_positive_offset() {
        // 5ms each way, server clock 1000ms ahead, 2ms of processing.
        let metrics = estimate(0.0, 1005.0, 1007.0, 12.0);

        assert_eq!(metrics.offset, 1000.0);
        assert_eq!(metrics.rtt, 10.0);
        assert_eq!(metrics.server_proc_ms, 2.0);
    }
}
