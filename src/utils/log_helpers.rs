use tracing::{error, info, warn};

pub fn log_run_begin(cid: &str, message_id: &str, thread_id: &str) {
    info!(
        "[RUN] begin: cid={}, message={}, thread={}",
        cid, message_id, thread_id
    );
}

pub fn log_run_cancelled(message_id: &str, run_id: &str) {
    warn!("[RUN] cancelled: message={}, run={}", message_id, run_id);
}

pub fn log_run_error(message_id: &str, err: &str) {
    error!("[RUN] error: message={}, error={}", message_id, err);
}

pub fn truncate_log(value: &str, max_len: usize) -> String {
    if value.len() <= max_len {
        return value.to_string();
    }

    let mut cut = max_len;
    while !value.is_char_boundary(cut) {
        cut -= 1;
    }
    let mut out = value[..cut].to_string();
    out.push_str("...[truncated]");
    out
}
