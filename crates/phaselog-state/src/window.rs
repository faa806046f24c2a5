//! Windowing of complete log buffers (`tail_lines`, `limit_bytes`).

use crate::schema::LogRequest;

/// Apply the request's `tail_lines` then `limit_bytes` to a full log buffer.
pub fn apply_window(data: &[u8], request: &LogRequest) -> Vec<u8> {
    let mut out = match request.tail_lines {
        Some(n) => tail_lines(data, n),
        None => data,
    };
    if let Some(limit) = request.limit_bytes {
        let limit = usize::try_from(limit).unwrap_or(usize::MAX);
        if out.len() > limit {
            out = &out[..limit];
        }
    }
    out.to_vec()
}

fn tail_lines(data: &[u8], n: u64) -> &[u8] {
    if n == 0 {
        return &data[data.len()..];
    }
    // A trailing newline terminates the last line rather than starting a new one.
    let body = match data.last() {
        Some(b'\n') => &data[..data.len() - 1],
        _ => data,
    };
    let mut seen = 0u64;
    for (idx, byte) in body.iter().enumerate().rev() {
        if *byte == b'\n' {
            seen += 1;
            if seen == n {
                return &data[idx + 1..];
            }
        }
    }
    data
}
