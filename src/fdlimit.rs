//! Open-file limit handling (§4.3's connection-count sanity check).
//!
//! Grounded in `original_source/tcpclient.c`'s `main`: raise
//! `RLIMIT_NOFILE`'s soft limit to the hard limit, then warn (not
//! abort) if the requested connection count still exceeds it — a run
//! that can't open every flow degrades gracefully rather than refusing
//! to start.

#[cfg(unix)]
pub fn raise_and_check(connections: u32) {
    use nix::sys::resource::{getrlimit, setrlimit, Resource};

    match getrlimit(Resource::RLIMIT_NOFILE) {
        Ok((soft, hard)) => {
            if soft < hard {
                if let Err(e) = setrlimit(Resource::RLIMIT_NOFILE, hard, hard) {
                    tracing::warn!(error = %e, "failed to raise RLIMIT_NOFILE");
                }
            }
            tracing::info!(limit = hard, "maximum open files");
            if connections as u64 > hard {
                tracing::warn!(
                    connections,
                    limit = hard,
                    "requested connection count exceeds the open file limit"
                );
            }
        }
        Err(e) => {
            tracing::warn!(error = %e, "failed to read RLIMIT_NOFILE");
        }
    }
}

#[cfg(not(unix))]
pub fn raise_and_check(_connections: u32) {
    tracing::debug!("open file limit is not adjustable on this platform");
}
