//! The fixed wire payload: a DNS-A query for `example.com`.
//!
//! Grounded in `original_source/tcpclient.c` and `udpclient.c`'s
//! `send_query`, which hold the same bytes as a `static char data[]`
//! literal per transport. We keep the two layouts distinct rather than
//! deriving one from the other, matching the C: TCP carries a 2-byte
//! length prefix ahead of the query id, UDP does not.

/// 31-byte TCP/TLS payload template: 2-byte big-endian length (0x001d
/// == 29), 2-byte query id placeholder, 27-byte DNS body.
pub const TCP_PAYLOAD_LEN: usize = 31;
const TCP_TEMPLATE: [u8; TCP_PAYLOAD_LEN] = [
    0x00, 0x1d, // length prefix: 29
    0xff, 0xff, // query id placeholder
    0x01, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x07, 0x65, 0x78, 0x61, 0x6d,
    0x70, 0x6c, 0x65, 0x03, 0x63, 0x6f, 0x6d, 0x00, 0x00, 0x01, 0x00, 0x01,
];

/// 29-byte UDP payload template: 2-byte query id placeholder, 27-byte
/// DNS body (no length prefix; one datagram is one message).
pub const UDP_PAYLOAD_LEN: usize = 29;
const UDP_TEMPLATE: [u8; UDP_PAYLOAD_LEN] = [
    0xff, 0xff, // query id placeholder
    0x01, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x07, 0x65, 0x78, 0x61, 0x6d,
    0x70, 0x6c, 0x65, 0x03, 0x63, 0x6f, 0x6d, 0x00, 0x00, 0x01, 0x00, 0x01,
];

/// Build a TCP/TLS wire message with `query_id` stamped into bytes 2-3.
pub fn tcp_query(query_id: u16) -> [u8; TCP_PAYLOAD_LEN] {
    let mut buf = TCP_TEMPLATE;
    buf[2..4].copy_from_slice(&query_id.to_be_bytes());
    buf
}

/// Build a UDP datagram with `query_id` stamped into bytes 0-1.
pub fn udp_query(query_id: u16) -> [u8; UDP_PAYLOAD_LEN] {
    let mut buf = UDP_TEMPLATE;
    buf[0..2].copy_from_slice(&query_id.to_be_bytes());
    buf
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tcp_length_prefix_is_29() {
        let msg = tcp_query(0);
        assert_eq!(u16::from_be_bytes([msg[0], msg[1]]), 29);
        assert_eq!(msg.len(), 31);
    }

    #[test]
    fn tcp_query_id_round_trips() {
        let msg = tcp_query(0xbeef);
        assert_eq!(u16::from_be_bytes([msg[2], msg[3]]), 0xbeef);
    }

    #[test]
    fn udp_query_id_round_trips() {
        let msg = udp_query(0x1234);
        assert_eq!(u16::from_be_bytes([msg[0], msg[1]]), 0x1234);
        assert_eq!(msg.len(), 29);
    }
}
